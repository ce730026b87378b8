use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inbound chat request as received on the HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    pub user_id: String,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub generation_mode: Option<String>,
    /// Layer filters forwarded untouched to the retrieval agent.
    #[serde(default)]
    pub layers: Vec<String>,
    /// Source-file filters forwarded untouched to the retrieval agent.
    #[serde(default)]
    pub source_filters: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Synthesis,
    Factual,
    Comparison,
    Citation,
    Conversational,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Synthesis => "synthesis",
            Self::Factual => "factual",
            Self::Comparison => "comparison",
            Self::Citation => "citation",
            Self::Conversational => "conversational",
        }
    }
}

impl Default for Intent {
    fn default() -> Self {
        Self::Factual
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    Narrow,
    Broad,
}

impl Default for SearchScope {
    fn default() -> Self {
        Self::Narrow
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerFormat {
    Paragraph,
    List,
    Table,
    Quote,
}

impl Default for AnswerFormat {
    fn default() -> Self {
        Self::Paragraph
    }
}

/// Retrieval tuning bundle handed to the downstream retrieval agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    pub scope: SearchScope,
    pub max_files: u32,
    pub min_similarity: f32,
    #[serde(default)]
    pub boost_documents: Vec<String>,
    #[serde(default)]
    pub file_filter: Option<Vec<String>>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            scope: SearchScope::Narrow,
            max_files: 3,
            min_similarity: 0.4,
            boost_documents: Vec::new(),
            file_filter: None,
        }
    }
}

/// Structured verdict produced once per message by the analyzer (LLM or
/// fallback path) and consumed once by the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub intent: Intent,
    pub requires_search: bool,
    pub rewritten_query: String,
    #[serde(default)]
    pub detected_documents: Vec<String>,
    pub search_config: SearchConfig,
    pub answer_format: AnswerFormat,
    #[serde(default)]
    pub key_concepts: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

impl Default for AnalysisResult {
    fn default() -> Self {
        Self {
            intent: Intent::Factual,
            requires_search: true,
            rewritten_query: String::new(),
            detected_documents: Vec::new(),
            search_config: SearchConfig::default(),
            answer_format: AnswerFormat::Paragraph,
            key_concepts: Vec::new(),
            reasoning: String::new(),
        }
    }
}

/// Org-level reference document, always eligible for detection and boost.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyDocument {
    pub slug: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Everything the engine knows about a conversation at request time.
/// Built fresh per request, never cached or mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    pub conversation_id: Uuid,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Project-identity facts (product name, corpus description, ...).
    #[serde(default)]
    pub identity: Vec<String>,
    /// Recent messages, oldest first.
    #[serde(default)]
    pub recent_messages: Vec<ChatMessage>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub first_message: Option<String>,
    /// Source-file ids used by the previous turn, for follow-up questions.
    #[serde(default)]
    pub previous_sources: Vec<String>,
    #[serde(default)]
    pub key_documents: Vec<KeyDocument>,
    pub message_count: i64,
}

/// Payload delegated to the downstream retrieval+generation agent.
/// `preloaded_context` is a read-only block so the agent never re-fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegatePayload {
    pub query: String,
    pub analysis: AnalysisResult,
    pub user_id: String,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    pub conversation_id: Uuid,
    #[serde(default)]
    pub generation_mode: Option<String>,
    #[serde(default)]
    pub layers: Vec<String>,
    #[serde(default)]
    pub source_filters: Vec<String>,
    pub preloaded_context: AgentContext,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStage {
    Received,
    Analyzing,
}

/// Typed frames of the client-facing event stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    Step {
        step: StepStage,
    },
    Message {
        text: String,
        conversation_id: Uuid,
    },
    Done {
        conversation_id: Uuid,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
    },
}

impl StreamFrame {
    /// SSE event name for this frame type.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Step { .. } => "step",
            Self::Message { .. } => "message",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_minimal_json() {
        let req: ChatRequest =
            serde_json::from_str(r#"{"query": "hello", "user_id": "u1"}"#).unwrap();
        assert_eq!(req.query, "hello");
        assert!(!req.stream);
        assert!(req.org_id.is_none());
        assert!(req.layers.is_empty());
    }

    #[test]
    fn search_config_defaults() {
        let config = SearchConfig::default();
        assert_eq!(config.scope, SearchScope::Narrow);
        assert_eq!(config.max_files, 3);
        assert!((config.min_similarity - 0.4).abs() < f32::EPSILON);
        assert!(config.file_filter.is_none());
    }

    #[test]
    fn analysis_result_default_requires_search() {
        let result = AnalysisResult::default();
        assert!(result.requires_search);
        assert_eq!(result.intent, Intent::Factual);
        assert_eq!(result.answer_format, AnswerFormat::Paragraph);
    }

    #[test]
    fn intent_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&Intent::Conversational).unwrap(),
            "\"conversational\""
        );
        let parsed: Intent = serde_json::from_str("\"comparison\"").unwrap();
        assert_eq!(parsed, Intent::Comparison);
    }

    #[test]
    fn stream_frame_tagging() {
        let frame = StreamFrame::Step {
            step: StepStage::Received,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "step");
        assert_eq!(json["step"], "received");
        assert_eq!(frame.event_name(), "step");
    }

    #[test]
    fn error_frame_omits_missing_status() {
        let frame = StreamFrame::Error {
            message: "boom".into(),
            status: None,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(!json.contains("status"));
    }
}
