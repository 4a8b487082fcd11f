//! LLM service for orchestrating natural language to query conversion
//! (§4.C, §4.D step 1).
//!
//! `LlmService` is the single entry point the pipeline uses to turn a user's
//! message plus the chat's schema and history into zero or more proposed
//! statements. It owns the prompt cache so repeated turns against an
//! unchanged schema don't re-render the system prompt.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;

use crate::db::Dialect;
use crate::error::Result;
use crate::model::message::LlmContextMessage;
use crate::schema::SchemaInfo;

use super::{build_messages, build_messages_cached, parse_llm_response, types::Conversation, LlmClient, PromptCache};
use super::parser::extract_all_statements;

/// LLM service that turns natural language into proposed statements.
///
/// Holds the client behind an `Arc` (shared with `LlmManager`) so the
/// pipeline can cheaply create one `LlmService` per chat — each gets its
/// own `PromptCache`, which is keyed by a single schema checksum and would
/// otherwise thrash across chats with different schemas (§4.C, §4.D).
pub struct LlmService {
    client: Arc<dyn LlmClient>,
    prompt_cache: PromptCache,
}

/// Result of one round of LLM processing (§4.D step 1: "the LLM proposes
/// zero or more statements").
#[derive(Debug, Clone)]
pub enum LlmResult {
    /// One or more statements were proposed, with optional prose.
    Statements {
        statements: Vec<String>,
        explanation: Option<String>,
    },
    /// No statement, just explanatory text.
    Explanation(String),
}

impl LlmService {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            prompt_cache: PromptCache::new(),
        }
    }

    fn to_result(response_content: &str) -> LlmResult {
        let statements = extract_all_statements(response_content);
        if !statements.is_empty() {
            let parsed = parse_llm_response(response_content);
            return LlmResult::Statements {
                statements,
                explanation: if parsed.text.is_empty() {
                    None
                } else {
                    Some(parsed.text)
                },
            };
        }
        LlmResult::Explanation(response_content.trim().to_string())
    }

    /// Processes one user turn against the chat's persisted LLM-context
    /// history, returning the proposed statements (if any).
    pub async fn process_query(
        &mut self,
        input: &str,
        schema: &SchemaInfo,
        dialect: Dialect,
        non_tech_mode: bool,
        history: &[LlmContextMessage],
    ) -> Result<LlmResult> {
        let start = Instant::now();
        tracing::debug!(input_len = input.len(), "starting NL->query processing");

        let mut messages = build_messages(schema, dialect, non_tech_mode, history);
        messages.push(super::types::Message::user(input));

        let response = self.client.complete(&messages).await?;
        let result = Self::to_result(&response);

        tracing::info!(
            duration_ms = start.elapsed().as_millis(),
            response_len = response.len(),
            "NL->query processing complete"
        );

        Ok(result)
    }

    /// Streaming variant used by the SSE pipeline to forward `llm_token`
    /// events as they arrive, falling back to a non-streaming call if the
    /// provider doesn't support streaming.
    pub async fn process_query_streaming<F, Fut>(
        &mut self,
        input: &str,
        schema: &SchemaInfo,
        dialect: Dialect,
        non_tech_mode: bool,
        history: &[LlmContextMessage],
        mut on_token: F,
    ) -> Result<LlmResult>
    where
        F: FnMut(&str) -> Fut,
        Fut: Future<Output = ()>,
    {
        let start = Instant::now();
        let mut messages = build_messages(schema, dialect, non_tech_mode, history);
        messages.push(super::types::Message::user(input));

        let mut response_content = String::new();
        match self.client.complete_stream(&messages).await {
            Ok(mut stream) => {
                while let Some(chunk) = stream.next().await {
                    let token = chunk?;
                    response_content.push_str(&token);
                    on_token(&token).await;
                }
            }
            Err(err) => {
                tracing::warn!("streaming unavailable, falling back: {}", err);
                response_content = self.client.complete(&messages).await?;
            }
        }

        tracing::info!(
            duration_ms = start.elapsed().as_millis(),
            response_len = response_content.len(),
            "streaming NL->query processing complete"
        );

        Ok(Self::to_result(&response_content))
    }

    /// Variant used when the caller is accumulating an in-memory
    /// `Conversation` rather than persisted context (used by tests and by
    /// the CLI-adjacent tooling that doesn't have a chat id yet).
    pub async fn process_conversation(
        &mut self,
        input: &str,
        schema: &SchemaInfo,
        dialect: Dialect,
        non_tech_mode: bool,
        conversation: &mut Conversation,
    ) -> Result<LlmResult> {
        conversation.add_user(input);
        let messages =
            build_messages_cached(&mut self.prompt_cache, schema, dialect, non_tech_mode, conversation);
        let response = self.client.complete(&messages).await?;
        conversation.add_assistant(response.as_str());
        Ok(Self::to_result(&response))
    }

    pub fn client(&self) -> &dyn LlmClient {
        self.client.as_ref()
    }

    pub fn set_client(&mut self, client: Arc<dyn LlmClient>) {
        self.client = client;
    }

    /// Invalidates the prompt cache (called after a schema refresh, §4.C).
    pub fn invalidate_cache(&mut self) {
        self.prompt_cache.invalidate();
    }
}
