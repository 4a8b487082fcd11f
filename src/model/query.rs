//! Query entity — one proposed or executed statement within a message
//! (§3, §5).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::safety::SafetyLevel;

/// Lifecycle state of a `Query`, per §5's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryType {
    Received,
    Classified,
    PendingConfirmation,
    Executing,
    Completed,
    Cancelled,
    Failed,
    RolledBack,
}

impl QueryType {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled | Self::Failed | Self::RolledBack
        )
    }
}

/// Cursor-based pagination state synthesized for result sets too large to
/// return in one response (§5: "pagination synthesis").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub total_rows: Option<u64>,
    pub has_more: bool,
}

impl Pagination {
    pub fn first_page(page_size: u32) -> Self {
        Self {
            page: 1,
            page_size,
            total_rows: None,
            has_more: false,
        }
    }
}

/// Dialect-neutral shape of a statement, used to route drivers to the
/// single-row, bulk, or transactional execution path (§4.A `queryType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Select,
    Dml,
    Ddl,
    Script,
}

/// One SQL (or dialect-equivalent) statement proposed by the LLM and tracked
/// through execution (§3 `Query`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub id: Uuid,
    pub message_id: Uuid,
    pub statement: String,
    pub statement_kind: StatementKind,
    pub state: QueryType,
    pub safety_level: Option<SafetyLevel>,
    /// Human-readable description of what the statement does, surfaced to
    /// the non-technical-mode UI (§3).
    pub description: String,
    pub affected_tables: Vec<String>,
    pub is_critical: bool,
    pub can_rollback: bool,
    /// The statement used to undo this one, if `can_rollback` and the
    /// rollback chain was computed (§5).
    pub rollback_statement: Option<String>,
    /// In-message reference to another query whose rollback this one
    /// depends on executing first (§3 `rollbackDependentQueryID`).
    pub rollback_dependent_query_id: Option<Uuid>,
    pub is_executed: bool,
    pub is_rolled_back: bool,
    /// Flipped when a user edits the statement before execution; resets the
    /// execution bookkeeping below (§4.D edge-case policy, S2).
    pub is_edited: bool,
    /// Opaque, encrypted-at-rest execution payload (§3, §4.J). `Some` iff
    /// `is_executed` (invariant 2, §8).
    pub execution_result: Option<String>,
    pub execution_time_ms: Option<u64>,
    /// Small pre-execution preview shown before the user confirms (§3).
    pub example_result: Option<serde_json::Value>,
    pub pagination: Option<Pagination>,
    pub visualization_id: Option<Uuid>,
    pub error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub action_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Query {
    pub fn new(message_id: Uuid, statement: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_id,
            statement: statement.into(),
            statement_kind: StatementKind::Select,
            state: QueryType::Received,
            safety_level: None,
            description: String::new(),
            affected_tables: Vec::new(),
            is_critical: false,
            can_rollback: false,
            rollback_statement: None,
            rollback_dependent_query_id: None,
            is_executed: false,
            is_rolled_back: false,
            is_edited: false,
            execution_result: None,
            execution_time_ms: None,
            example_result: None,
            pagination: None,
            visualization_id: None,
            error: None,
            created_at: chrono::Utc::now(),
            action_at: None,
        }
    }

    /// Re-editing a query before execution clears prior execution state and
    /// marks it edited (§4.D: "Re-editing an assistant's earlier query...").
    pub fn apply_edit(&mut self, new_statement: impl Into<String>) {
        self.statement = new_statement.into();
        self.is_edited = true;
        self.is_executed = false;
        self.is_rolled_back = false;
        self.execution_result = None;
        self.execution_time_ms = None;
        self.error = None;
        self.state = QueryType::Received;
        self.action_at = Some(chrono::Utc::now());
    }

    /// Records a successful execution (invariant 2, §8).
    pub fn mark_executed(&mut self, result: impl Into<String>, elapsed_ms: u64) {
        self.execution_result = Some(result.into());
        self.execution_time_ms = Some(elapsed_ms);
        self.is_executed = true;
        self.state = QueryType::Completed;
        self.action_at = Some(chrono::Utc::now());
    }

    /// Records a rollback, legal only once executed (invariant 2, §8).
    pub fn mark_rolled_back(&mut self) {
        debug_assert!(self.is_executed, "rollback requires prior execution");
        self.is_rolled_back = true;
        self.state = QueryType::RolledBack;
        self.action_at = Some(chrono::Utc::now());
    }
}
