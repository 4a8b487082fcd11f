//! Merge strategies (§4.G "Merge strategies").

use std::collections::{HashMap, HashSet};

use crate::db::{Executor, Value, DEFAULT_QUERY_DEADLINE};
use crate::error::Result;
use crate::model::query::StatementKind;

use super::storage::{convert_row, create_table, drop_table, insert_converted_batches, insert_rows, quote_ident, value_literal, IngestedTable, RowIngestOutcome, RESERVED_COLUMNS};
use super::types::InferredType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    Replace,
    Append,
    Merge,
    SmartMerge,
}

impl Default for MergeStrategy {
    fn default() -> Self {
        Self::Replace
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MergeOptions {
    pub key_columns: Option<Vec<String>>,
    pub allow_add_columns: bool,
    pub allow_drop_columns: bool,
    pub delete_missing: bool,
}

/// Column-name match between an existing DB column and an incoming one.
/// `rename` is set when similarity is high enough to treat this as the same
/// column under a new name rather than an add/drop pair (§4.G).
struct ColumnMatch {
    existing: String,
    incoming: String,
    rename: bool,
}

const RENAME_THRESHOLD: f64 = 0.8;
const ACCEPT_THRESHOLD: f64 = 0.7;

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&normalize(a), &normalize(b))
}

/// Greedily pairs each existing column with its best unused incoming match
/// (§4.G: "normalized lowercase and Levenshtein similarity with acceptance
/// threshold 0.7; similarity >= 0.8 triggers a rename").
fn match_columns(existing: &[String], incoming: &[String]) -> (Vec<ColumnMatch>, Vec<String>, Vec<String>) {
    let mut used_incoming: HashSet<String> = HashSet::new();
    let mut matches = Vec::new();
    let mut unmatched_existing = Vec::new();

    for e in existing {
        let best = incoming
            .iter()
            .filter(|inc| !used_incoming.contains(*inc))
            .map(|inc| (inc, similarity(e, inc)))
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((inc, sim)) if sim >= ACCEPT_THRESHOLD => {
                used_incoming.insert(inc.clone());
                matches.push(ColumnMatch {
                    existing: e.clone(),
                    incoming: inc.clone(),
                    rename: sim >= RENAME_THRESHOLD && normalize(e) != normalize(inc),
                });
            }
            _ => unmatched_existing.push(e.clone()),
        }
    }

    let unmatched_incoming: Vec<String> = incoming.iter().filter(|i| !used_incoming.contains(*i)).cloned().collect();
    (matches, unmatched_existing, unmatched_incoming)
}

/// Detects key columns for `merge`/`smart_merge`: an explicit list, else the
/// first column matching `*id*`/`*key*`/`*code*`, else the first three
/// columns (§4.G).
fn detect_key_columns(columns: &[String], explicit: Option<&[String]>) -> Vec<String> {
    if let Some(explicit) = explicit {
        if !explicit.is_empty() {
            return explicit.to_vec();
        }
    }
    for pattern in ["id", "key", "code"] {
        if let Some(col) = columns.iter().find(|c| c.to_lowercase().contains(pattern)) {
            return vec![col.clone()];
        }
    }
    columns.iter().take(3).cloned().collect()
}

fn row_key(row: &[Value], key_idxs: &[usize]) -> String {
    key_idxs
        .iter()
        .map(|&i| row.get(i).map(|v| v.to_display_string().trim().to_lowercase()).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

pub async fn apply_strategy(
    executor: &dyn Executor,
    table: &IngestedTable,
    rows: Vec<Vec<Value>>,
    strategy: MergeStrategy,
    options: &MergeOptions,
) -> Result<RowIngestOutcome> {
    match strategy {
        MergeStrategy::Replace => {
            drop_table(executor, &table.name).await?;
            create_table(executor, table, false).await?;
            insert_rows(executor, table, &rows).await
        }
        MergeStrategy::Append => {
            let reconciled = reconcile_schema(executor, table, options).await?;
            insert_rows(executor, &reconciled, &rows).await
        }
        MergeStrategy::Merge | MergeStrategy::SmartMerge => smart_merge(executor, table, rows, options).await,
    }
}

/// Reconciles an existing table's columns against `table`'s incoming set:
/// renames likely-matching columns, adds brand-new ones, and optionally
/// drops ones absent from the new data (§4.G "append").
async fn reconcile_schema(executor: &dyn Executor, table: &IngestedTable, options: &MergeOptions) -> Result<IngestedTable> {
    let existing_schema = executor.introspect_schema(Some(std::slice::from_ref(&table.name))).await?;
    let Some(existing_table) = existing_schema.tables.get(&table.name) else {
        create_table(executor, table, false).await?;
        return Ok(table.clone());
    };

    let existing_cols: Vec<String> = existing_table
        .columns
        .iter()
        .map(|(n, _)| n.clone())
        .filter(|n| !RESERVED_COLUMNS.contains(&n.as_str()))
        .collect();
    let incoming_cols: Vec<String> = table.columns.iter().map(|(n, _)| n.clone()).collect();

    let (matches, unmatched_existing, unmatched_incoming) = match_columns(&existing_cols, &incoming_cols);

    for m in matches.iter().filter(|m| m.rename) {
        let sql = format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            quote_ident(&table.name),
            quote_ident(&m.existing),
            quote_ident(&m.incoming)
        );
        executor.execute_query(&sql, StatementKind::Ddl, false, DEFAULT_QUERY_DEADLINE).await?;
    }

    if options.allow_add_columns {
        for name in &unmatched_incoming {
            let ty = table
                .columns
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, t)| *t)
                .unwrap_or(InferredType::Text);
            let sql = format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                quote_ident(&table.name),
                quote_ident(name),
                ty.sql_type()
            );
            executor.execute_query(&sql, StatementKind::Ddl, false, DEFAULT_QUERY_DEADLINE).await?;
        }
    }

    if options.allow_drop_columns {
        for name in &unmatched_existing {
            let sql = format!("ALTER TABLE {} DROP COLUMN {}", quote_ident(&table.name), quote_ident(name));
            executor.execute_query(&sql, StatementKind::Ddl, false, DEFAULT_QUERY_DEADLINE).await?;
        }
    }

    Ok(table.clone())
}

/// Key-based upsert with optional stale-row deletion (§4.G "merge /
/// smart_merge").
async fn smart_merge(
    executor: &dyn Executor,
    table: &IngestedTable,
    rows: Vec<Vec<Value>>,
    options: &MergeOptions,
) -> Result<RowIngestOutcome> {
    let existing_schema = executor.introspect_schema(Some(std::slice::from_ref(&table.name))).await?;
    if !existing_schema.tables.contains_key(&table.name) {
        create_table(executor, table, false).await?;
    }

    let col_names: Vec<String> = table.columns.iter().map(|(n, _)| n.clone()).collect();
    let key_columns = detect_key_columns(&col_names, options.key_columns.as_deref());
    let key_idxs: Vec<usize> = key_columns.iter().filter_map(|k| col_names.iter().position(|c| c == k)).collect();

    let select_cols = std::iter::once("_row_id".to_string())
        .chain(col_names.iter().map(|c| quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("SELECT {} FROM {}", select_cols, quote_ident(&table.name));
    let existing = executor.execute_query(&sql, StatementKind::Select, false, DEFAULT_QUERY_DEADLINE).await?;

    let mut lookup: HashMap<String, (i64, Vec<Value>)> = HashMap::new();
    for erow in &existing.rows {
        let Some(Value::Int(row_id)) = erow.first() else { continue };
        let data = erow.get(1..).unwrap_or_default().to_vec();
        lookup.insert(row_key(&data, &key_idxs), (*row_id, data));
    }

    let mut outcome = RowIngestOutcome::default();
    let mut touched_ids: HashSet<i64> = HashSet::new();
    let mut to_insert: Vec<Vec<Value>> = Vec::new();

    for row in &rows {
        let (converted, ok) = convert_row(table, row);
        outcome = RowIngestOutcome {
            processed: outcome.processed + 1,
            successful: outcome.successful + ok as usize,
            failed: outcome.failed + (!ok) as usize,
        };

        let key = row_key(&converted, &key_idxs);
        match lookup.get(&key) {
            Some((row_id, existing_data)) => {
                touched_ids.insert(*row_id);
                if existing_data != &converted {
                    let assignments: Vec<String> = col_names
                        .iter()
                        .zip(converted.iter())
                        .map(|(n, v)| format!("{} = {}", quote_ident(n), value_literal(v)))
                        .collect();
                    let sql = format!(
                        "UPDATE {} SET {} WHERE _row_id = {}",
                        quote_ident(&table.name),
                        assignments.join(", "),
                        row_id
                    );
                    executor.execute_query(&sql, StatementKind::Dml, false, DEFAULT_QUERY_DEADLINE).await?;
                }
            }
            None => to_insert.push(converted),
        }
    }

    insert_converted_batches(executor, table, &to_insert).await?;

    if options.delete_missing {
        let stale: Vec<i64> = lookup.values().filter(|(id, _)| !touched_ids.contains(id)).map(|(id, _)| *id).collect();
        if !stale.is_empty() {
            let ids = stale.iter().map(i64::to_string).collect::<Vec<_>>().join(", ");
            let sql = format!("DELETE FROM {} WHERE _row_id IN ({})", quote_ident(&table.name), ids);
            executor.execute_query(&sql, StatementKind::Dml, false, DEFAULT_QUERY_DEADLINE).await?;
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_key_columns_prefers_explicit() {
        let cols = vec!["name".to_string(), "sku".to_string()];
        let keys = detect_key_columns(&cols, Some(&["sku".to_string()]));
        assert_eq!(keys, vec!["sku"]);
    }

    #[test]
    fn test_detect_key_columns_falls_back_to_id_pattern() {
        let cols = vec!["name".to_string(), "user_id".to_string(), "email".to_string()];
        assert_eq!(detect_key_columns(&cols, None), vec!["user_id"]);
    }

    #[test]
    fn test_detect_key_columns_falls_back_to_first_three() {
        let cols = vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string(), "delta".to_string()];
        assert_eq!(detect_key_columns(&cols, None), vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_match_columns_exact_and_rename() {
        let existing = vec!["email".to_string(), "full_nam".to_string()];
        let incoming = vec!["email".to_string(), "full_name".to_string()];
        let (matches, unmatched_existing, unmatched_incoming) = match_columns(&existing, &incoming);
        assert_eq!(matches.len(), 2);
        assert!(unmatched_existing.is_empty());
        assert!(unmatched_incoming.is_empty());
        let renamed = matches.iter().find(|m| m.existing == "full_nam").unwrap();
        assert!(renamed.rename);
        assert_eq!(renamed.incoming, "full_name");
    }

    #[test]
    fn test_match_columns_unrelated_names_unmatched() {
        let existing = vec!["zzzzzzzzzz".to_string()];
        let incoming = vec!["aaaaaaaaaa".to_string()];
        let (matches, unmatched_existing, unmatched_incoming) = match_columns(&existing, &incoming);
        assert!(matches.is_empty());
        assert_eq!(unmatched_existing, vec!["zzzzzzzzzz"]);
        assert_eq!(unmatched_incoming, vec!["aaaaaaaaaa"]);
    }

    #[test]
    fn test_row_key_joins_normalized_cells() {
        let row = vec![Value::String(" Alice ".to_string()), Value::Int(7)];
        assert_eq!(row_key(&row, &[0, 1]), "alice\u{1f}7");
    }
}
