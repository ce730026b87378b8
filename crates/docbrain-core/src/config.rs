use std::sync::Arc;

use docbrain_store::{BehaviorRecord, ContextStore};
use serde::{Deserialize, Serialize};

/// Agent type key under which the engine's behavior rows are stored.
pub const AGENT_TYPE: &str = "brain";

/// App id used for behavior lookup when the request does not carry one.
pub const DEFAULT_APP_ID: &str = "default";

/// Per-request engine configuration. Built once per request by merging an
/// external, possibly-partial behavior record over these defaults
/// field-by-field; a partial record never zeroes an unspecified field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// How many recent messages the context window carries.
    pub history_limit: usize,
    /// Conversations idle longer than this are not reused.
    pub idle_timeout_minutes: i64,
    pub rewrite_query: bool,
    pub detect_intent: bool,
    pub detect_documents: bool,
    pub generate_search_config: bool,
    pub skip_search_for_conversational: bool,
    pub emit_received_step: bool,
    pub emit_analyzing_step: bool,
    pub fallback_enabled: bool,
    pub system_prompt: Option<String>,
    pub identity: Vec<String>,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".into(),
            temperature: 0.1,
            max_tokens: 500,
            history_limit: 10,
            idle_timeout_minutes: 30,
            rewrite_query: true,
            detect_intent: true,
            detect_documents: true,
            generate_search_config: true,
            skip_search_for_conversational: true,
            emit_received_step: true,
            emit_analyzing_step: true,
            fallback_enabled: true,
            system_prompt: None,
            identity: Vec::new(),
        }
    }
}

impl BrainConfig {
    /// Overlay the present fields of a partial record, one by one.
    pub fn apply(&mut self, record: &BehaviorRecord) {
        if let Some(v) = &record.model {
            self.model = v.clone();
        }
        if let Some(v) = record.temperature {
            self.temperature = v;
        }
        if let Some(v) = record.max_tokens {
            self.max_tokens = v;
        }
        if let Some(v) = record.history_limit {
            self.history_limit = v;
        }
        if let Some(v) = record.idle_timeout_minutes {
            self.idle_timeout_minutes = v;
        }
        if let Some(v) = record.rewrite_query {
            self.rewrite_query = v;
        }
        if let Some(v) = record.detect_intent {
            self.detect_intent = v;
        }
        if let Some(v) = record.detect_documents {
            self.detect_documents = v;
        }
        if let Some(v) = record.generate_search_config {
            self.generate_search_config = v;
        }
        if let Some(v) = record.skip_search_for_conversational {
            self.skip_search_for_conversational = v;
        }
        if let Some(v) = record.emit_received_step {
            self.emit_received_step = v;
        }
        if let Some(v) = record.emit_analyzing_step {
            self.emit_analyzing_step = v;
        }
        if let Some(v) = record.fallback_enabled {
            self.fallback_enabled = v;
        }
        if let Some(v) = &record.system_prompt {
            self.system_prompt = Some(v.clone());
        }
        if let Some(v) = &record.identity {
            self.identity = v.clone();
        }
    }

    pub fn merged(record: &BehaviorRecord) -> Self {
        let mut config = Self::default();
        config.apply(record);
        config
    }
}

/// Resolves the active behavior configuration for a request: org-scoped row
/// first, app-wide row second, compiled-in defaults last. A missing or
/// unreadable configuration row is never fatal.
pub struct ConfigResolver {
    store: Arc<dyn ContextStore>,
}

impl ConfigResolver {
    pub fn new(store: Arc<dyn ContextStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, app_id: Option<&str>, org_id: Option<&str>) -> BrainConfig {
        let app = app_id.unwrap_or(DEFAULT_APP_ID);

        if let Some(org) = org_id {
            match self.store.behavior_record(AGENT_TYPE, app, Some(org)).await {
                Ok(Some(record)) => return BrainConfig::merged(&record),
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(%error, app, org, "org behavior lookup failed, using defaults");
                    return BrainConfig::default();
                }
            }
        }

        match self.store.behavior_record(AGENT_TYPE, app, None).await {
            Ok(Some(record)) => BrainConfig::merged(&record),
            Ok(None) => BrainConfig::default(),
            Err(error) => {
                tracing::warn!(%error, app, "behavior lookup failed, using defaults");
                BrainConfig::default()
            }
        }
    }
}
