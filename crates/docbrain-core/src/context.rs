use std::sync::Arc;

use docbrain_schema::{AgentContext, ChatMessage, ChatRequest};
use docbrain_store::{ContextStore, ConversationKey, ConversationSnapshot};

use crate::config::BrainConfig;
use crate::error::BrainError;

/// Builds the immutable per-request [`AgentContext`] from one aggregate
/// store lookup. Unlike config resolution, failure here is fatal: a request
/// cannot be routed correctly without its conversation context.
pub struct ContextLoader {
    store: Arc<dyn ContextStore>,
}

impl ContextLoader {
    pub fn new(store: Arc<dyn ContextStore>) -> Self {
        Self { store }
    }

    pub async fn load(
        &self,
        request: &ChatRequest,
        config: &BrainConfig,
    ) -> Result<AgentContext, BrainError> {
        let key = ConversationKey {
            user_id: request.user_id.clone(),
            org_id: request.org_id.clone(),
            project_id: request.project_id.clone(),
            app_id: request.app_id.clone(),
            conversation_id: request.conversation_id,
        };

        let snapshot = self
            .store
            .resolve_conversation(&key, config.idle_timeout_minutes, config.history_limit)
            .await
            .map_err(BrainError::Context)?;

        if snapshot.created {
            tracing::debug!(conversation_id = %snapshot.conversation_id, "started fresh conversation");
        }

        Ok(build_context(snapshot, request, config))
    }
}

fn build_context(
    snapshot: ConversationSnapshot,
    request: &ChatRequest,
    config: &BrainConfig,
) -> AgentContext {
    let recent_messages = snapshot
        .messages
        .into_iter()
        .map(|m| ChatMessage {
            role: m.role,
            content: m.content,
            at: m.at,
            sources: decode_string_list(m.sources.as_deref()),
        })
        .collect();

    AgentContext {
        conversation_id: snapshot.conversation_id,
        org_id: request.org_id.clone(),
        app_id: request.app_id.clone(),
        system_prompt: config.system_prompt.clone(),
        identity: config.identity.clone(),
        recent_messages,
        summary: snapshot.summary,
        first_message: snapshot.first_message,
        previous_sources: decode_string_list(snapshot.previous_sources.as_deref()),
        key_documents: snapshot.key_documents,
        message_count: snapshot.message_count,
    }
}

/// The single defensive-decode boundary for string-encoded JSON columns.
/// Everything downstream of the loader sees typed values; a malformed
/// column degrades to an empty collection, never an error.
fn decode_string_list(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(list) => list,
        Err(error) => {
            tracing::warn!(%error, "malformed JSON list column, using empty list");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use docbrain_schema::KeyDocument;
    use docbrain_store::{BehaviorRecord, SqliteStore};
    use uuid::Uuid;

    fn request() -> ChatRequest {
        ChatRequest {
            query: "question".into(),
            user_id: "user-1".into(),
            org_id: Some("org-1".into()),
            project_id: None,
            app_id: Some("app-1".into()),
            conversation_id: None,
            stream: false,
            generation_mode: None,
            layers: vec![],
            source_filters: vec![],
        }
    }

    #[test]
    fn decode_string_list_handles_all_shapes() {
        assert!(decode_string_list(None).is_empty());
        assert!(decode_string_list(Some("not json")).is_empty());
        assert!(decode_string_list(Some("{\"a\": 1}")).is_empty());
        assert_eq!(
            decode_string_list(Some(r#"["f1", "f2"]"#)),
            vec!["f1".to_string(), "f2".to_string()]
        );
    }

    #[tokio::test]
    async fn load_builds_context_with_decoded_sources() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let config = BrainConfig::default();
        let loader = ContextLoader::new(store.clone());

        let context = loader.load(&request(), &config).await.unwrap();
        store
            .append_message(context.conversation_id, "user", "q1", &[])
            .await
            .unwrap();
        store
            .append_message(
                context.conversation_id,
                "assistant",
                "a1",
                &["file-9".into()],
            )
            .await
            .unwrap();

        let context = loader.load(&request(), &config).await.unwrap();
        assert_eq!(context.recent_messages.len(), 2);
        assert_eq!(context.recent_messages[1].sources, vec!["file-9"]);
        assert_eq!(context.previous_sources, vec!["file-9"]);
        assert_eq!(context.first_message.as_deref(), Some("q1"));
        assert_eq!(context.message_count, 2);
    }

    #[tokio::test]
    async fn load_copies_identity_and_prompt_from_config() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let mut config = BrainConfig::default();
        config.apply(&BehaviorRecord {
            system_prompt: Some("You answer from the corpus only.".into()),
            identity: Some(vec!["Product: marchés publics assistant".into()]),
            ..Default::default()
        });

        let loader = ContextLoader::new(store);
        let context = loader.load(&request(), &config).await.unwrap();
        assert_eq!(
            context.system_prompt.as_deref(),
            Some("You answer from the corpus only.")
        );
        assert_eq!(context.identity.len(), 1);
    }

    struct DownStore;

    #[async_trait]
    impl ContextStore for DownStore {
        async fn resolve_conversation(
            &self,
            _key: &ConversationKey,
            _idle_timeout_minutes: i64,
            _history_limit: usize,
        ) -> Result<ConversationSnapshot> {
            anyhow::bail!("connection refused")
        }

        async fn behavior_record(
            &self,
            _agent_type: &str,
            _app_id: &str,
            _org_id: Option<&str>,
        ) -> Result<Option<BehaviorRecord>> {
            Ok(None)
        }

        async fn append_message(
            &self,
            _conversation_id: Uuid,
            _role: &str,
            _content: &str,
            _sources: &[String],
        ) -> Result<()> {
            Ok(())
        }

        async fn upsert_key_document(
            &self,
            _org_id: Option<&str>,
            _doc: &KeyDocument,
        ) -> Result<()> {
            Ok(())
        }

        async fn put_behavior(
            &self,
            _agent_type: &str,
            _app_id: &str,
            _org_id: Option<&str>,
            _config: &serde_json::Value,
            _active: bool,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn store_failure_is_fatal() {
        let loader = ContextLoader::new(Arc::new(DownStore));
        let err = loader
            .load(&request(), &BrainConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BrainError::Context(_)));
    }
}
