use chrono::{DateTime, Utc};
use docbrain_schema::KeyDocument;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Conversation resolution key. An explicit `conversation_id` targets that
/// conversation directly; otherwise the most recent conversation for the
/// (user, org, project, app) tuple is the reuse candidate.
#[derive(Debug, Clone, Default)]
pub struct ConversationKey {
    pub user_id: String,
    pub org_id: Option<String>,
    pub project_id: Option<String>,
    pub app_id: Option<String>,
    pub conversation_id: Option<Uuid>,
}

/// One stored message row. `sources` is the raw JSON text column; decoding
/// it is the context loader's job, not the store's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub role: String,
    pub content: String,
    pub at: DateTime<Utc>,
    pub sources: Option<String>,
}

/// Everything `resolve_conversation` returns in one aggregate lookup.
#[derive(Debug, Clone)]
pub struct ConversationSnapshot {
    pub conversation_id: Uuid,
    /// True when a fresh conversation was started (no reuse candidate, or
    /// the candidate's last activity exceeded the idle timeout).
    pub created: bool,
    /// Last N messages, oldest first.
    pub messages: Vec<MessageRecord>,
    pub summary: Option<String>,
    pub first_message: Option<String>,
    /// Raw JSON `sources` of the most recent assistant message.
    pub previous_sources: Option<String>,
    pub key_documents: Vec<KeyDocument>,
    pub message_count: i64,
}

/// Partial behavior row stored as one JSON config column. Every field is
/// optional; the config resolver merges present fields over compiled-in
/// defaults one by one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorRecord {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub history_limit: Option<usize>,
    pub idle_timeout_minutes: Option<i64>,
    pub rewrite_query: Option<bool>,
    pub detect_intent: Option<bool>,
    pub detect_documents: Option<bool>,
    pub generate_search_config: Option<bool>,
    pub skip_search_for_conversational: Option<bool>,
    pub emit_received_step: Option<bool>,
    pub emit_analyzing_step: Option<bool>,
    pub fallback_enabled: Option<bool>,
    pub system_prompt: Option<String>,
    pub identity: Option<Vec<String>>,
}
