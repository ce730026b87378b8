pub mod migrations;
pub mod models;
pub mod store;

use anyhow::Result;
use async_trait::async_trait;
use docbrain_schema::KeyDocument;
use uuid::Uuid;

pub use models::{BehaviorRecord, ConversationKey, ConversationSnapshot, MessageRecord};
pub use store::SqliteStore;

/// The context/config store the engine talks to. One aggregate call
/// resolves (or creates) a conversation; behavior rows carry per-app/org
/// engine configuration with org-specific rows taking precedence.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Atomically reuse a conversation whose last activity falls within
    /// `idle_timeout_minutes`, or start a new one, and return its recent
    /// history in a single snapshot.
    async fn resolve_conversation(
        &self,
        key: &ConversationKey,
        idle_timeout_minutes: i64,
        history_limit: usize,
    ) -> Result<ConversationSnapshot>;

    /// Active behavior row for (agent_type, app_id), org-scoped row first,
    /// app-wide (null-org) row as fallback. `None` when no row matches or
    /// the stored config is unreadable.
    async fn behavior_record(
        &self,
        agent_type: &str,
        app_id: &str,
        org_id: Option<&str>,
    ) -> Result<Option<BehaviorRecord>>;

    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: &str,
        content: &str,
        sources: &[String],
    ) -> Result<()>;

    async fn upsert_key_document(&self, org_id: Option<&str>, doc: &KeyDocument) -> Result<()>;

    async fn put_behavior(
        &self,
        agent_type: &str,
        app_id: &str,
        org_id: Option<&str>,
        config: &serde_json::Value,
        active: bool,
    ) -> Result<()>;
}
