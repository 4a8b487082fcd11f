//! Schema Engine (§4.C).
//!
//! Introspects, checksums, diffs, caches, samples, and formats schemas for
//! the LLM. Table/column ordering and the checksum algorithm are pinned by
//! §4.C's "Ordering/tie-breaks" so two runs against an unchanged database
//! produce byte-equal output (invariant 6, §8).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;

use crate::db::{Dialect, Executor};
use crate::error::Result;
use crate::model::connection::DbType;

/// Re-introspection deadline, unified across every trigger per the Open
/// Question resolution in SPEC_FULL.md §C.3 (manual refresh and a
/// selected-collections change alike).
pub const SCHEMA_REFRESH_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// One column's shape, as reported by a driver (§3 `TableSchema.columns`).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ColumnSchema {
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    #[serde(default)]
    pub is_pk: bool,
    #[serde(default)]
    pub is_fk: bool,
    pub fk_table: Option<String>,
    pub fk_column: Option<String>,
}

/// One table's shape plus the optional profiling fields the engine fills in
/// opportunistically (§3 `TableSchema`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TableSchema {
    /// Ordinal order as reported by the driver (§4.C ordering rule) —
    /// `Vec` rather than a map so insertion order survives serialization.
    pub columns: Vec<(String, ColumnSchema)>,
    pub row_count: Option<u64>,
    pub size_bytes: Option<u64>,
    pub example_rows: Option<Vec<Vec<crate::db::Value>>>,
    pub checksum: String,
}

impl TableSchema {
    pub fn compute_checksum(columns: &[(String, ColumnSchema)]) -> String {
        let mut hasher = Sha256::new();
        for (name, col) in columns {
            hasher.update(name.as_bytes());
            hasher.update(b"|");
            hasher.update(col.data_type.as_bytes());
            hasher.update(b"|");
            hasher.update(col.nullable.to_string().as_bytes());
            hasher.update(b"|");
            hasher.update(col.default.as_deref().unwrap_or("").as_bytes());
            hasher.update(b"|");
            hasher.update(col.is_pk.to_string().as_bytes());
            hasher.update(b"|");
            hasher.update(col.is_fk.to_string().as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }
}

/// The whole-database shape handed to the LLM and cached per chat (§3
/// `SchemaInfo`). Tables are kept in a `BTreeMap` so iteration is always
/// alphabetical (§4.C ordering rule).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SchemaInfo {
    pub tables: BTreeMap<String, TableSchema>,
    pub checksum: String,
}

impl SchemaInfo {
    pub fn compute_checksum(tables: &BTreeMap<String, TableSchema>) -> String {
        let mut hasher = Sha256::new();
        for (name, table) in tables {
            hasher.update(name.as_bytes());
            hasher.update(b":");
            hasher.update(table.checksum.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn finalize(tables: BTreeMap<String, TableSchema>) -> Self {
        let checksum = Self::compute_checksum(&tables);
        Self { tables, checksum }
    }

    pub fn filter_selected(&self, selected: &crate::model::chat::SelectedCollections) -> SchemaInfo {
        match selected {
            crate::model::chat::SelectedCollections::All(_) => self.clone(),
            crate::model::chat::SelectedCollections::Named(names) => {
                let tables = self
                    .tables
                    .iter()
                    .filter(|(name, _)| names.contains(name))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                SchemaInfo::finalize(tables)
            }
        }
    }
}

/// Result of comparing two schema snapshots (§4.C `diffSchema`). Used by the
/// connection-schema-change listener to emit a `schema_update` system
/// LLM-context message.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SchemaDiff {
    pub is_first_time: bool,
    pub added_tables: Vec<String>,
    pub removed_tables: Vec<String>,
    pub column_changes: Vec<String>,
}

pub fn diff_schema(prev: Option<&SchemaInfo>, curr: &SchemaInfo) -> SchemaDiff {
    let Some(prev) = prev else {
        return SchemaDiff {
            is_first_time: true,
            added_tables: curr.tables.keys().cloned().collect(),
            ..Default::default()
        };
    };

    let added_tables: Vec<String> = curr
        .tables
        .keys()
        .filter(|t| !prev.tables.contains_key(*t))
        .cloned()
        .collect();
    let removed_tables: Vec<String> = prev
        .tables
        .keys()
        .filter(|t| !curr.tables.contains_key(*t))
        .cloned()
        .collect();

    let mut column_changes = Vec::new();
    for (name, curr_table) in &curr.tables {
        if let Some(prev_table) = prev.tables.get(name) {
            if prev_table.checksum != curr_table.checksum {
                let prev_cols: Vec<&str> = prev_table.columns.iter().map(|(n, _)| n.as_str()).collect();
                let curr_cols: Vec<&str> = curr_table.columns.iter().map(|(n, _)| n.as_str()).collect();
                for added in curr_cols.iter().filter(|c| !prev_cols.contains(c)) {
                    column_changes.push(format!("{name}.{added} added"));
                }
                for removed in prev_cols.iter().filter(|c| !curr_cols.contains(c)) {
                    column_changes.push(format!("{name}.{removed} removed"));
                }
            }
        }
    }

    SchemaDiff {
        is_first_time: false,
        added_tables,
        removed_tables,
        column_changes,
    }
}

/// One cached schema entry, copy-on-write per §5 ("Schema cache entries
/// are copy-on-write").
#[derive(Clone)]
struct CacheEntry {
    schema: Arc<SchemaInfo>,
}

/// Caches and serves schema introspection per chat (§4.C).
#[derive(Default)]
pub struct SchemaEngine {
    cache: RwLock<BTreeMap<uuid::Uuid, CacheEntry>>,
}

impl SchemaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached schema if its checksum still matches a fresh,
    /// cheap checksum pass; otherwise re-introspects fully (§4.C
    /// `getSchema`).
    pub async fn get_schema(
        &self,
        chat_id: uuid::Uuid,
        executor: &dyn Executor,
        selected_tables: Option<&[String]>,
    ) -> Result<Arc<SchemaInfo>> {
        if let Some(cached) = self.cache.read().await.get(&chat_id).cloned() {
            if self.is_still_current(executor, &cached.schema).await {
                debug!(%chat_id, "schema cache hit");
                return Ok(cached.schema);
            }
        }

        let fresh = self.introspect(executor, selected_tables).await?;
        let fresh = Arc::new(fresh);
        self.cache.write().await.insert(
            chat_id,
            CacheEntry {
                schema: fresh.clone(),
            },
        );
        Ok(fresh)
    }

    pub async fn invalidate(&self, chat_id: uuid::Uuid) {
        self.cache.write().await.remove(&chat_id);
    }

    pub async fn previous(&self, chat_id: uuid::Uuid) -> Option<Arc<SchemaInfo>> {
        self.cache.read().await.get(&chat_id).map(|e| e.schema.clone())
    }

    async fn is_still_current(&self, executor: &dyn Executor, cached: &SchemaInfo) -> bool {
        for (name, table) in &cached.tables {
            match executor.table_checksum(name).await {
                Ok(checksum) if checksum == table.checksum => continue,
                _ => return false,
            }
        }
        true
    }

    async fn introspect(
        &self,
        executor: &dyn Executor,
        selected_tables: Option<&[String]>,
    ) -> Result<SchemaInfo> {
        executor.introspect_schema(selected_tables).await
    }

    /// Renders a compact, dialect-annotated representation suitable for
    /// prompt inclusion (§4.C `formatSchemaForLLM`).
    pub fn format_for_llm(schema: &SchemaInfo, dialect: Dialect, with_examples: bool) -> String {
        let mut out = format!("Database dialect: {dialect:?}\n\n");
        for (table_name, table) in &schema.tables {
            out.push_str(&format!("Table: {table_name}\n"));
            for (col_name, col) in &table.columns {
                let mut annotations = Vec::new();
                if col.is_pk {
                    annotations.push("PK".to_string());
                }
                if !col.nullable {
                    annotations.push("NOT NULL".to_string());
                }
                if let (true, Some(fk_table)) = (col.is_fk, &col.fk_table) {
                    let fk_col = col.fk_column.as_deref().unwrap_or("id");
                    annotations.push(format!("FK -> {fk_table}.{fk_col}"));
                }
                let annotation = if annotations.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", annotations.join(", "))
                };
                let default = col
                    .default
                    .as_ref()
                    .map(|d| format!(" DEFAULT {d}"))
                    .unwrap_or_default();
                out.push_str(&format!(
                    "  - {col_name}: {}{annotation}{default}\n",
                    col.data_type
                ));
            }
            if with_examples {
                if let Some(examples) = &table.example_rows {
                    out.push_str("  Examples:\n");
                    for row in examples.iter().take(3) {
                        let rendered: Vec<String> = row.iter().map(|v| v.to_display_string()).collect();
                        out.push_str(&format!("    ({})\n", rendered.join(", ")));
                    }
                }
            }
            out.push('\n');
        }
        out
    }
}

pub fn dialect_for(db_type: DbType) -> Dialect {
    Dialect::from_db_type(db_type)
}
