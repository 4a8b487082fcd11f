//! Query Pipeline (§4.D): turns one user message into proposed statements,
//! optionally auto-executes them in order, and fans out progress as
//! `crate::pipeline::events::Event`s through the Stream Hub.
//!
//! The state machine is driven linearly by `MessagePipeline::handle_user_message`
//! rather than as an explicit enum-matched loop, the way the teacher's
//! `orchestrator_actor` drives `OrchestratorRequest` handling inline inside
//! one big `tokio::select!` — cancellation is raced against each phase the
//! same way.

pub mod cancellation;
pub mod events;

pub use cancellation::CancellationRegistry;
pub use events::Event;

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::connection::ConnectionManager;
use crate::crypto::CredCrypto;
use crate::db::{Dialect, DEFAULT_QUERY_DEADLINE};
use crate::error::{NeoBaseError, Result};
use crate::llm::{LlmManager, LlmResult, LlmService};
use crate::model::chat::Chat;
use crate::model::message::{LlmContextMessage, Message, MessageType};
use crate::model::query::{Query, QueryType, StatementKind};
use crate::persistence::MetadataStore;
use crate::query::QueryRunner;
use crate::safety::{classify_sql, SafetyLevel, StatementType};
use crate::schema::{diff_schema, SchemaEngine};
use crate::stream::StreamHub;

/// Maps a parsed statement's `StatementType` (safety classifier's view) to
/// the dialect-neutral `StatementKind` the execution loop dispatches on
/// (§4.A `queryType`).
fn statement_kind_for(stmt_type: &StatementType) -> StatementKind {
    match stmt_type {
        StatementType::Select | StatementType::Explain | StatementType::Show | StatementType::With => {
            StatementKind::Select
        }
        StatementType::Insert | StatementType::Update | StatementType::Delete | StatementType::Merge => {
            StatementKind::Dml
        }
        StatementType::Drop
        | StatementType::Truncate
        | StatementType::Alter
        | StatementType::Create
        | StatementType::Grant
        | StatementType::Revoke => StatementKind::Ddl,
        StatementType::Multiple(inner) => statement_kind_for(inner),
        StatementType::Unknown => StatementKind::Script,
    }
}

/// Builds a `Query` from one LLM-proposed statement, classified for safety
/// (§4.D step 1 precedes step 2: "Resolve pagination" only after a query
/// exists to carry it).
///
/// Rollback-statement synthesis (reverse-SQL generation) is out of scope:
/// the simplified `LlmResult::Statements` shape carries forward statements
/// only, so `can_rollback` marks DML as eligible but `rollback_statement`
/// stays unset until a future proposal round supplies one explicitly
/// (Open Question, see DESIGN.md).
fn build_query(message_id: Uuid, statement: String) -> Query {
    let classification = classify_sql(&statement);
    let kind = statement_kind_for(&classification.statement_type);
    let mut query = Query::new(message_id, statement);
    query.statement_kind = kind;
    query.safety_level = Some(classification.level);
    query.is_critical = classification.level == SafetyLevel::Destructive;
    query.can_rollback = kind == StatementKind::Dml;
    query.description = classification.statement_type.to_string();
    query.state = QueryType::Classified;
    query
}

/// Orchestrates the Query Pipeline's state machine (§4.D) over the shared,
/// process-wide collaborators every chat draws from.
pub struct MessagePipeline {
    connections: Arc<ConnectionManager>,
    schema_engine: Arc<SchemaEngine>,
    llm: Arc<LlmManager>,
    metadata: MetadataStore,
    crypto: Arc<dyn CredCrypto>,
    streams: Arc<StreamHub>,
    cancellations: Arc<CancellationRegistry>,
}

impl MessagePipeline {
    pub fn new(
        connections: Arc<ConnectionManager>,
        schema_engine: Arc<SchemaEngine>,
        llm: Arc<LlmManager>,
        metadata: MetadataStore,
        crypto: Arc<dyn CredCrypto>,
        streams: Arc<StreamHub>,
        cancellations: Arc<CancellationRegistry>,
    ) -> Self {
        Self {
            connections,
            schema_engine,
            llm,
            metadata,
            crypto,
            streams,
            cancellations,
        }
    }

    pub fn streams(&self) -> &Arc<StreamHub> {
        &self.streams
    }

    pub fn cancellations(&self) -> &Arc<CancellationRegistry> {
        &self.cancellations
    }

    async fn emit(&self, stream_id: Uuid, event: Event) {
        self.streams.publish(stream_id, event).await;
    }

    /// Idempotently cancels `stream_id`'s in-flight pipeline run (§4.F).
    /// The run loop itself notices via the registered token and emits the
    /// terminal `cancelled` event; this only flips the token.
    pub async fn cancel(&self, stream_id: Uuid) {
        self.cancellations.cancel(stream_id).await;
    }

    /// Runs the full pipeline for one user turn: persists the user message,
    /// dispatches to the LLM, classifies and (if `autoExecuteQuery`)
    /// executes the proposed statements in order (§4.D).
    ///
    /// Meant to be `tokio::spawn`ed by the API layer immediately after the
    /// caller has ensured `stream_id`'s channel is registered with the
    /// Stream Hub, so no early event is dropped (§4.E).
    pub async fn handle_user_message(&self, chat: &Chat, content: &str, stream_id: Uuid) -> Result<()> {
        let token = self.cancellations.register(stream_id).await;

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => {
                self.emit(stream_id, Event::Cancelled).await;
                Ok(())
            }
            result = self.run(chat, content, stream_id, &token) => result,
        };

        self.cancellations.sweep(stream_id).await;

        if let Err(ref e) = outcome {
            self.emit(
                stream_id,
                Event::Error {
                    code: e.code(),
                    message: e.to_string(),
                },
            )
            .await;
        }

        outcome
    }

    async fn run(
        &self,
        chat: &Chat,
        content: &str,
        stream_id: Uuid,
        token: &tokio_util::sync::CancellationToken,
    ) -> Result<()> {
        let user_message = Message::new(chat.id, chat.user_id, MessageType::User, content);
        self.metadata.messages().create(&user_message).await?;
        self.emit(
            stream_id,
            Event::MessageCreated {
                message_id: user_message.id,
            },
        )
        .await;
        self.metadata
            .llm_context()
            .append(&LlmContextMessage::user(chat.id, content, chat.settings.non_tech_mode))
            .await?;

        let entry = self.connections.acquire(chat.id, &chat.connection).await?;
        let dialect = Dialect::from_db_type(chat.connection.db_type);
        let selected = selected_table_names(chat);

        let previous_schema = self.schema_engine.previous(chat.id).await;
        let schema = self
            .schema_engine
            .get_schema(chat.id, entry.executor.as_ref(), selected.as_deref())
            .await?;
        let diff = diff_schema(previous_schema.as_deref(), &schema);
        if !diff.is_first_time && (!diff.added_tables.is_empty() || !diff.removed_tables.is_empty() || !diff.column_changes.is_empty())
        {
            let summary = format!(
                "added {:?}, removed {:?}, changed {:?}",
                diff.added_tables, diff.removed_tables, diff.column_changes
            );
            self.metadata
                .llm_context()
                .append(&LlmContextMessage::schema_update(chat.id, summary.clone()))
                .await?;
            self.streams
                .broadcast_to_chat(chat.id, Event::SchemaChanged { summary })
                .await;
        }
        let schema_for_llm = schema.filter_selected(&chat.selected_collections);

        self.emit(stream_id, Event::LlmStarted).await;
        let history = self.metadata.llm_context().history(chat.id).await?;
        let mut llm_service = LlmService::new(self.llm.client_handle());
        let streams = self.streams.clone();
        let llm_result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                self.connections.release(chat.id).await;
                self.emit(stream_id, Event::Cancelled).await;
                return Ok(());
            }
            result = llm_service.process_query_streaming(
                content,
                &schema_for_llm,
                dialect,
                chat.settings.non_tech_mode,
                &history,
                |token_text| {
                    let streams = streams.clone();
                    let token_text = token_text.to_string();
                    async move {
                        streams.publish(stream_id, Event::LlmToken { token: token_text }).await;
                    }
                },
            ) => result,
        };

        let llm_result = match llm_result {
            Ok(result) => result,
            Err(e) => {
                self.connections.release(chat.id).await;
                return Err(e);
            }
        };

        let (statements, explanation) = match llm_result {
            LlmResult::Statements { statements, explanation } => (statements, explanation),
            LlmResult::Explanation(text) => (Vec::new(), Some(text)),
        };
        self.emit(
            stream_id,
            Event::LlmFinished {
                explanation: explanation.clone(),
            },
        )
        .await;

        let assistant_text = explanation.clone().unwrap_or_default();
        let mut assistant_message = Message::new(chat.id, chat.user_id, MessageType::Assistant, assistant_text.clone());
        assistant_message.origin_message_id = Some(user_message.id);
        let mut queries: Vec<Query> = statements
            .into_iter()
            .map(|s| build_query(assistant_message.id, s))
            .collect();
        assistant_message.queries = queries.clone();
        self.metadata.messages().create(&assistant_message).await?;
        self.metadata
            .llm_context()
            .append(&LlmContextMessage::assistant(
                chat.id,
                assistant_text,
                queries.clone(),
                chat.settings.non_tech_mode,
            ))
            .await?;

        if !queries.is_empty() {
            self.emit(
                stream_id,
                Event::QueriesProposed {
                    queries: queries.clone(),
                },
            )
            .await;
        }

        if chat.settings.auto_execute_query && !queries.is_empty() {
            let runner = QueryRunner::new(entry.executor.as_ref(), self.crypto.as_ref(), dialect);
            for idx in 0..queries.len() {
                // §4.D step 1: a critical, non-rollback-able query waits for
                // an explicit confirmation event instead of auto-executing.
                if queries[idx].is_critical && !queries[idx].can_rollback {
                    queries[idx].state = QueryType::PendingConfirmation;
                    self.metadata.messages().save_queries(assistant_message.id, &queries).await?;
                    continue;
                }

                let query_id = queries[idx].id;
                self.emit(stream_id, Event::QueryExecStarted { query_id }).await;

                let exec_result = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        queries[idx].state = QueryType::Cancelled;
                        self.metadata.messages().save_queries(assistant_message.id, &queries).await?;
                        self.connections.release(chat.id).await;
                        self.emit(stream_id, Event::Cancelled).await;
                        return Ok(());
                    }
                    result = runner.run(&mut queries[idx], DEFAULT_QUERY_DEADLINE) => result,
                };

                if let Err(e) = exec_result {
                    warn!(%query_id, error = %e, "query execution failed");
                    if let Some(rollback_idx) = preceding_rollback_candidate(&queries, idx) {
                        if let Err(re) = runner.rollback(&mut queries[rollback_idx], DEFAULT_QUERY_DEADLINE).await {
                            warn!(query_id = %queries[rollback_idx].id, error = %re, "rollback failed");
                        }
                    }
                    self.metadata.messages().save_queries(assistant_message.id, &queries).await?;
                    self.emit(
                        stream_id,
                        Event::Error {
                            code: e.code(),
                            message: e.to_string(),
                        },
                    )
                    .await;
                    self.connections.release(chat.id).await;
                    return Err(e);
                }

                self.metadata.messages().save_queries(assistant_message.id, &queries).await?;
                self.emit(
                    stream_id,
                    Event::QueryExecFinished {
                        query_id,
                        query: queries[idx].clone(),
                    },
                )
                .await;
            }
        }

        self.connections.release(chat.id).await;
        self.emit(stream_id, Event::Done).await;
        info!(chat_id = %chat.id, message_id = %user_message.id, "pipeline run complete");
        Ok(())
    }

    /// Explicit confirmation for a query left `PendingConfirmation` by step
    /// 1 of the per-query loop (§4.D). Runs it (and any still-auto-eligible
    /// queries after it in the same message) to completion.
    pub async fn confirm_query(&self, chat: &Chat, message_id: Uuid, query_id: Uuid, stream_id: Uuid) -> Result<()> {
        let mut message = self.metadata.messages().get(message_id).await?;
        let idx = message
            .queries
            .iter()
            .position(|q| q.id == query_id)
            .ok_or_else(|| NeoBaseError::not_found(format!("query {query_id} not found")))?;

        if message.queries[idx].state.is_terminal() {
            return Err(NeoBaseError::conflict("query already reached a terminal state"));
        }

        let entry = self.connections.acquire(chat.id, &chat.connection).await?;
        let dialect = Dialect::from_db_type(chat.connection.db_type);
        let runner = QueryRunner::new(entry.executor.as_ref(), self.crypto.as_ref(), dialect);

        self.emit(stream_id, Event::QueryExecStarted { query_id }).await;
        let result = runner.run(&mut message.queries[idx], DEFAULT_QUERY_DEADLINE).await;
        self.metadata.messages().save_queries(message.id, &message.queries).await?;
        self.connections.release(chat.id).await;

        match result {
            Ok(()) => {
                self.emit(
                    stream_id,
                    Event::QueryExecFinished {
                        query_id,
                        query: message.queries[idx].clone(),
                    },
                )
                .await;
                Ok(())
            }
            Err(e) => {
                self.emit(
                    stream_id,
                    Event::Error {
                        code: e.code(),
                        message: e.to_string(),
                    },
                )
                .await;
                Err(e)
            }
        }
    }

    /// Edit-cascade policy (§4.D edge case): editing a user message resets
    /// the immediately following assistant message's queries to
    /// unexecuted, since they were proposed against the since-changed text.
    pub async fn edit_user_message(&self, message_id: Uuid, new_content: &str) -> Result<()> {
        let mut message = self.metadata.messages().get(message_id).await?;
        message.apply_edit(new_content);
        self.metadata
            .messages()
            .update_content(message.id, &message.content, message.is_edited)
            .await?;

        if let Some(mut following) = self.metadata.messages().following_assistant_message(message_id).await? {
            for query in &mut following.queries {
                if !query.is_executed {
                    continue;
                }
                query.is_executed = false;
                query.is_rolled_back = false;
                query.execution_result = None;
                query.execution_time_ms = None;
                query.error = None;
                query.state = QueryType::Classified;
            }
            self.metadata.messages().save_queries(following.id, &following.queries).await?;
        }
        Ok(())
    }

    /// Re-editing a proposed query before execution (§4.D edge case).
    pub async fn edit_query(&self, message_id: Uuid, query_id: Uuid, new_statement: &str) -> Result<()> {
        let mut message = self.metadata.messages().get(message_id).await?;
        let query = message
            .queries
            .iter_mut()
            .find(|q| q.id == query_id)
            .ok_or_else(|| NeoBaseError::not_found(format!("query {query_id} not found")))?;
        query.apply_edit(new_statement);
        self.metadata.messages().save_queries(message.id, &message.queries).await?;
        self.metadata
            .llm_context()
            .append(&LlmContextMessage::schema_update(
                message.chat_id,
                format!("EDITED by user: {new_statement}"),
            ))
            .await?;
        Ok(())
    }
}

/// A preceding query in the same message that can absorb a rollback when
/// `queries[failed_idx]` fails (§4.D step 4).
fn preceding_rollback_candidate(queries: &[Query], failed_idx: usize) -> Option<usize> {
    queries[..failed_idx]
        .iter()
        .rposition(|q| q.can_rollback && q.is_executed && !q.is_rolled_back)
}

pub(crate) fn selected_table_names(chat: &Chat) -> Option<Vec<String>> {
    match &chat.selected_collections {
        crate::model::chat::SelectedCollections::All(_) => None,
        crate::model::chat::SelectedCollections::Named(names) => Some(names.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_query_classifies_select_as_safe() {
        let query = build_query(Uuid::new_v4(), "SELECT * FROM users".to_string());
        assert_eq!(query.statement_kind, StatementKind::Select);
        assert!(!query.is_critical);
        assert!(!query.can_rollback);
    }

    #[test]
    fn test_build_query_marks_delete_critical() {
        let query = build_query(Uuid::new_v4(), "DELETE FROM users".to_string());
        assert_eq!(query.statement_kind, StatementKind::Dml);
        assert!(query.is_critical);
        assert!(query.can_rollback);
    }

    #[test]
    fn test_build_query_marks_ddl_not_rollbackable() {
        let query = build_query(Uuid::new_v4(), "DROP TABLE users".to_string());
        assert_eq!(query.statement_kind, StatementKind::Ddl);
        assert!(query.is_critical);
        assert!(!query.can_rollback);
    }

    #[test]
    fn test_preceding_rollback_candidate_finds_nearest_eligible() {
        let mut a = Query::new(Uuid::new_v4(), "INSERT INTO t VALUES (1)");
        a.can_rollback = true;
        a.is_executed = true;
        let b = Query::new(Uuid::new_v4(), "SELECT 1");
        let queries = vec![a, b];
        assert_eq!(preceding_rollback_candidate(&queries, 1), Some(0));
    }

    #[test]
    fn test_preceding_rollback_candidate_none_when_not_rollbackable() {
        let a = Query::new(Uuid::new_v4(), "SELECT 1");
        let b = Query::new(Uuid::new_v4(), "SELECT 2");
        let queries = vec![a, b];
        assert_eq!(preceding_rollback_candidate(&queries, 1), None);
    }
}
