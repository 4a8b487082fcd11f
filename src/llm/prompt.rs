//! Prompt construction for LLM requests.
//!
//! Builds system prompts with database schema context (§4.C) and turns the
//! chat's persisted `LlmContextMessage` history into the provider-neutral
//! `Message` list the `LlmClient` trait expects.

use crate::db::Dialect;
use crate::model::message::{LlmContextContent, LlmContextMessage};
use crate::model::MessageType;
use crate::schema::{SchemaEngine, SchemaInfo};

use super::types::{Conversation, Message};

const SYSTEM_PROMPT_TEMPLATE: &str = r#"You are the AI data copilot embedded in a multi-tenant chat product. Generate {dialect} queries based on the user's question against the schema below.

DATABASE SCHEMA ({dialect}):
{schema}

INSTRUCTIONS:
- Generate only valid {dialect} statements.
- You may propose more than one statement when the question genuinely
  requires a sequence; wrap each one in its own fenced code block.
- Prefer read-only statements; only propose DML/DDL when the user's request
  clearly asks for a change.
- Use appropriate joins/lookups based on the foreign keys shown above.
- Limit results to 100 rows unless the user specifies otherwise.
- Never generate a statement that drops or truncates the entire database.
- If the question cannot be answered with this schema, say so instead of
  guessing at table or column names.
{non_tech_clause}
OUTPUT FORMAT:
Wrap every statement in a ```sql fenced code block, in execution order.
Put any explanation before or after the code block(s), never inside."#;

const NON_TECH_CLAUSE: &str = "- The user is non-technical: keep any prose free of SQL jargon and \
explain results in plain language.\n";

/// Builds the system prompt with the database schema injected, dialect-aware
/// (§4.C) and with a conditional non-technical-mode instruction (§3
/// `Chat.settings.nonTechMode`).
pub fn build_system_prompt(schema: &SchemaInfo, dialect: Dialect, non_tech_mode: bool) -> String {
    let schema_text = SchemaEngine::format_for_llm(schema, dialect, true);
    let dialect_name = format!("{dialect:?}");
    SYSTEM_PROMPT_TEMPLATE
        .replace("{dialect}", &dialect_name)
        .replace("{schema}", &schema_text)
        .replace(
            "{non_tech_clause}",
            if non_tech_mode { NON_TECH_CLAUSE } else { "" },
        )
}

fn context_text(content: &LlmContextContent) -> String {
    match content {
        LlmContextContent::UserMessage { text } => text.clone(),
        LlmContextContent::AssistantResponse { text, queries } => {
            if queries.is_empty() {
                text.clone()
            } else {
                let blocks: Vec<String> = queries
                    .iter()
                    .map(|q| format!("```sql\n{}\n```", q.statement))
                    .collect();
                format!("{text}\n\n{}", blocks.join("\n\n"))
            }
        }
        LlmContextContent::SchemaUpdate { summary } => format!("[schema changed: {summary}]"),
    }
}

/// Converts persisted LLM-context history into the provider-neutral message
/// list, prefixed with the system prompt.
pub fn build_messages(
    schema: &SchemaInfo,
    dialect: Dialect,
    non_tech_mode: bool,
    history: &[LlmContextMessage],
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(Message::system(build_system_prompt(
        schema,
        dialect,
        non_tech_mode,
    )));

    for entry in history {
        let text = context_text(&entry.content);
        messages.push(match entry.role {
            MessageType::User => Message::user(text),
            MessageType::Assistant => Message::assistant(text),
            MessageType::System => Message::system(text),
        });
    }

    messages
}

/// In-process cache of the rendered system prompt, keyed by the schema
/// checksum so an unchanged schema doesn't pay `format_for_llm` again on
/// every turn (§4.D runs this once per pipeline step).
#[derive(Debug, Default)]
pub struct PromptCache {
    checksum: Option<String>,
    rendered: Option<String>,
}

impl PromptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached system prompt if the schema checksum matches,
    /// otherwise renders and caches a fresh one.
    pub fn system_prompt(
        &mut self,
        schema: &SchemaInfo,
        dialect: Dialect,
        non_tech_mode: bool,
    ) -> String {
        if self.checksum.as_deref() == Some(schema.checksum.as_str()) {
            if let Some(rendered) = &self.rendered {
                return rendered.clone();
            }
        }
        let rendered = build_system_prompt(schema, dialect, non_tech_mode);
        self.checksum = Some(schema.checksum.clone());
        self.rendered = Some(rendered.clone());
        rendered
    }

    /// Forces the next `system_prompt` call to re-render (§4.D: schema
    /// change invalidates any cached prompt text).
    pub fn invalidate(&mut self) {
        self.checksum = None;
        self.rendered = None;
    }
}

/// Builds messages using a cache for the (potentially expensive) system
/// prompt text, combined with the in-memory conversation the caller is
/// accumulating for this turn.
pub fn build_messages_cached(
    cache: &mut PromptCache,
    schema: &SchemaInfo,
    dialect: Dialect,
    non_tech_mode: bool,
    conversation: &Conversation,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(conversation.len() + 1);
    messages.push(Message::system(cache.system_prompt(
        schema,
        dialect,
        non_tech_mode,
    )));
    messages.extend(conversation.messages().iter().cloned());
    messages
}
