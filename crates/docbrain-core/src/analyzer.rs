use std::sync::Arc;

use anyhow::{anyhow, Result};
use docbrain_provider::{LlmMessage, LlmProvider, LlmRequest};
use docbrain_schema::{AgentContext, AnalysisResult, AnswerFormat, Intent, SearchConfig, SearchScope};
use serde_json::Value;

use crate::config::BrainConfig;
use crate::fallback;

/// Each recent turn is capped to this many characters in the prompt.
const MAX_TURN_CHARS: usize = 300;

/// Fixed instruction mandating a single JSON object response.
const ANALYSIS_INSTRUCTION: &str = r#"You are the query-analysis step of a document-grounded assistant.
Given the conversation context and the user's question, respond with a SINGLE JSON object and nothing else:
{
  "intent": "synthesis" | "factual" | "comparison" | "citation" | "conversational",
  "requires_search": true | false,
  "rewritten_query": "the question rewritten as a standalone query, enriched with conversation context",
  "detected_documents": ["document labels the user explicitly names"],
  "search_config": {
    "scope": "narrow" | "broad",
    "max_files": 3,
    "min_similarity": 0.4,
    "boost_documents": ["slugs of documents to favor"],
    "file_filter": null
  },
  "answer_format": "paragraph" | "list" | "table" | "quote",
  "key_concepts": ["the main concepts of the question"],
  "reasoning": "one short sentence"
}
Set requires_search to false ONLY for pure greetings or acknowledgements with no question content."#;

/// LLM-backed classification and rewriting. Any transport error or failed
/// parse delegates to the keyword fallback instead of failing the request.
pub struct QueryAnalyzer {
    provider: Arc<dyn LlmProvider>,
}

impl QueryAnalyzer {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    pub async fn analyze(
        &self,
        query: &str,
        context: &AgentContext,
        config: &BrainConfig,
    ) -> AnalysisResult {
        match self.analyze_with_llm(query, context, config).await {
            Ok(result) => result,
            Err(error) if config.fallback_enabled => {
                tracing::warn!(%error, "llm analysis failed, using keyword fallback");
                fallback::analyze(query, &context.key_documents)
            }
            Err(error) => {
                tracing::warn!(%error, "llm analysis failed, fallback disabled, using defaults");
                AnalysisResult {
                    rewritten_query: query.trim().to_string(),
                    ..AnalysisResult::default()
                }
            }
        }
    }

    async fn analyze_with_llm(
        &self,
        query: &str,
        context: &AgentContext,
        config: &BrainConfig,
    ) -> Result<AnalysisResult> {
        let prompt = build_prompt(query, context, config);
        let request = LlmRequest {
            model: config.model.clone(),
            system: Some(ANALYSIS_INSTRUCTION.to_string()),
            messages: vec![LlmMessage::user(prompt)],
            max_tokens: config.max_tokens,
            temperature: Some(config.temperature),
        };

        let response = self.provider.chat(request).await?;
        let raw = extract_json_object(&response.text)
            .ok_or_else(|| anyhow!("no JSON object in analysis response"))?;
        let value: Value = serde_json::from_str(raw)?;
        Ok(parse_analysis(&value, query, config))
    }
}

/// Ordered, individually-omittable prompt layers: key documents, summary,
/// recent turns (reverse-chronological, each capped), identity facts, then
/// the question itself.
pub fn build_prompt(query: &str, context: &AgentContext, config: &BrainConfig) -> String {
    let mut sections: Vec<String> = Vec::new();

    if !context.key_documents.is_empty() {
        let mut lines = vec!["## Available reference documents".to_string()];
        for doc in &context.key_documents {
            lines.push(format!("- {} ({})", doc.label, doc.slug));
        }
        sections.push(lines.join("\n"));
    }

    if let Some(summary) = context.summary.as_deref().filter(|s| !s.trim().is_empty()) {
        sections.push(format!("## Conversation summary\n{summary}"));
    }

    if !context.recent_messages.is_empty() {
        let mut lines = vec!["## Recent turns (most recent first)".to_string()];
        for message in context.recent_messages.iter().rev().take(config.history_limit) {
            lines.push(format!(
                "{}: {}",
                message.role,
                cap_chars(&message.content, MAX_TURN_CHARS)
            ));
        }
        sections.push(lines.join("\n"));
    }

    if !context.identity.is_empty() {
        let mut lines = vec!["## Project facts".to_string()];
        for fact in &context.identity {
            lines.push(format!("- {fact}"));
        }
        sections.push(lines.join("\n"));
    }

    sections.push(format!("## Question\n{query}"));
    sections.join("\n\n")
}

fn cap_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let capped: String = text.chars().take(max).collect();
        format!("{capped}…")
    }
}

/// First balanced JSON object substring of `text`, tolerant of prose
/// wrapping and trailing garbage. Returns `None` on truncated objects.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Field-by-field parse: every missing or malformed field independently
/// takes its fixed default, honoring the feature toggles.
fn parse_analysis(value: &Value, query: &str, config: &BrainConfig) -> AnalysisResult {
    let intent = if config.detect_intent {
        value
            .get("intent")
            .and_then(|v| serde_json::from_value::<Intent>(v.clone()).ok())
            .unwrap_or_default()
    } else {
        Intent::Factual
    };

    let requires_search = value
        .get("requires_search")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    let rewritten_query = if config.rewrite_query {
        value
            .get("rewritten_query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(query.trim())
            .to_string()
    } else {
        query.trim().to_string()
    };

    let detected_documents = if config.detect_documents {
        string_list(value.get("detected_documents"))
    } else {
        Vec::new()
    };

    let search_config = if config.generate_search_config {
        parse_search_config(value.get("search_config"))
    } else {
        SearchConfig::default()
    };

    let answer_format = value
        .get("answer_format")
        .and_then(|v| serde_json::from_value::<AnswerFormat>(v.clone()).ok())
        .unwrap_or_default();

    AnalysisResult {
        intent,
        requires_search,
        rewritten_query,
        detected_documents,
        search_config,
        answer_format,
        key_concepts: string_list(value.get("key_concepts")),
        reasoning: value
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

fn parse_search_config(value: Option<&Value>) -> SearchConfig {
    let defaults = SearchConfig::default();
    let Some(value) = value else {
        return defaults;
    };

    SearchConfig {
        scope: value
            .get("scope")
            .and_then(|v| serde_json::from_value::<SearchScope>(v.clone()).ok())
            .unwrap_or(defaults.scope),
        max_files: value
            .get("max_files")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(defaults.max_files),
        min_similarity: value
            .get("min_similarity")
            .and_then(Value::as_f64)
            .map(|v| v as f32)
            .unwrap_or(defaults.min_similarity),
        boost_documents: string_list(value.get("boost_documents")),
        file_filter: value
            .get("file_filter")
            .filter(|v| !v.is_null())
            .map(|v| string_list(Some(v))),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;
    use docbrain_provider::LlmResponse;
    use docbrain_schema::{ChatMessage, KeyDocument};
    use uuid::Uuid;

    fn context() -> AgentContext {
        AgentContext {
            conversation_id: Uuid::new_v4(),
            org_id: Some("org-1".into()),
            app_id: Some("app-1".into()),
            system_prompt: None,
            identity: vec!["Corpus: marché public de travaux".into()],
            recent_messages: vec![
                ChatMessage {
                    role: "user".into(),
                    content: "quel est le délai d'exécution ?".into(),
                    at: Utc::now(),
                    sources: vec![],
                },
                ChatMessage {
                    role: "assistant".into(),
                    content: "Le délai est de 12 mois.".into(),
                    at: Utc::now(),
                    sources: vec!["file-1".into()],
                },
            ],
            summary: Some("Discussion sur les délais du marché.".into()),
            first_message: Some("quel est le délai d'exécution ?".into()),
            previous_sources: vec!["file-1".into()],
            key_documents: vec![KeyDocument {
                slug: "ccap".into(),
                label: "CCAP".into(),
            }],
            message_count: 2,
        }
    }

    struct CannedProvider(String);

    #[async_trait]
    impl LlmProvider for CannedProvider {
        async fn chat(&self, _request: LlmRequest) -> Result<LlmResponse> {
            Ok(LlmResponse {
                text: self.0.clone(),
                input_tokens: None,
                output_tokens: None,
            })
        }
    }

    struct BrokenProvider;

    #[async_trait]
    impl LlmProvider for BrokenProvider {
        async fn chat(&self, _request: LlmRequest) -> Result<LlmResponse> {
            anyhow::bail!("provider unreachable")
        }
    }

    #[test]
    fn extract_json_object_finds_first_balanced_object() {
        let text = r#"Sure! Here is the analysis: {"intent": "factual", "nested": {"a": 1}} trailing."#;
        let raw = extract_json_object(text).unwrap();
        assert_eq!(raw, r#"{"intent": "factual", "nested": {"a": 1}}"#);
    }

    #[test]
    fn extract_json_object_ignores_braces_in_strings() {
        let text = r#"{"reasoning": "uses {braces} and \"quotes\""}"#;
        assert_eq!(extract_json_object(text), Some(text));
    }

    #[test]
    fn extract_json_object_rejects_truncated_output() {
        assert!(extract_json_object(r#"{"intent": "factual""#).is_none());
        assert!(extract_json_object("no json here").is_none());
    }

    #[test]
    fn parse_analysis_fills_missing_fields_with_defaults() {
        let value: Value = serde_json::from_str(r#"{"intent": "comparison"}"#).unwrap();
        let result = parse_analysis(&value, "ma question", &BrainConfig::default());
        assert_eq!(result.intent, Intent::Comparison);
        assert!(result.requires_search);
        assert_eq!(result.rewritten_query, "ma question");
        assert_eq!(result.search_config.max_files, 3);
        assert!((result.search_config.min_similarity - 0.4).abs() < f32::EPSILON);
        assert_eq!(result.answer_format, AnswerFormat::Paragraph);
    }

    #[test]
    fn parse_analysis_honors_toggles() {
        let value: Value = serde_json::from_str(
            r#"{"intent": "citation", "rewritten_query": "rewritten", "detected_documents": ["CCAP"]}"#,
        )
        .unwrap();
        let mut config = BrainConfig::default();
        config.detect_intent = false;
        config.rewrite_query = false;
        config.detect_documents = false;
        let result = parse_analysis(&value, "original", &config);
        assert_eq!(result.intent, Intent::Factual);
        assert_eq!(result.rewritten_query, "original");
        assert!(result.detected_documents.is_empty());
    }

    #[test]
    fn prompt_layers_are_ordered_and_omittable() {
        let config = BrainConfig::default();
        let ctx = context();
        let prompt = build_prompt("nouvelle question", &ctx, &config);

        let docs = prompt.find("## Available reference documents").unwrap();
        let summary = prompt.find("## Conversation summary").unwrap();
        let turns = prompt.find("## Recent turns").unwrap();
        let facts = prompt.find("## Project facts").unwrap();
        let question = prompt.find("## Question").unwrap();
        assert!(docs < summary && summary < turns && turns < facts && facts < question);

        // most recent turn first
        let assistant = prompt.find("assistant: Le délai").unwrap();
        let user = prompt.find("user: quel est le délai").unwrap();
        assert!(assistant < user);

        let mut empty = ctx.clone();
        empty.key_documents.clear();
        empty.summary = None;
        empty.recent_messages.clear();
        empty.identity.clear();
        let prompt = build_prompt("q", &empty, &config);
        assert!(!prompt.contains("## Available reference documents"));
        assert!(!prompt.contains("## Conversation summary"));
        assert!(!prompt.contains("## Recent turns"));
        assert!(prompt.starts_with("## Question"));
    }

    #[test]
    fn long_turns_are_char_capped() {
        let long = "x".repeat(1000);
        assert_eq!(cap_chars(&long, MAX_TURN_CHARS).chars().count(), MAX_TURN_CHARS + 1);
        assert_eq!(cap_chars("court", MAX_TURN_CHARS), "court");
    }

    #[tokio::test]
    async fn analyze_parses_wrapped_json_response() {
        let provider = Arc::new(CannedProvider(
            r#"Voici l'analyse : {"intent": "synthesis", "requires_search": true, "rewritten_query": "résumé des pénalités du CCAP", "answer_format": "list"}"#.to_string(),
        ));
        let analyzer = QueryAnalyzer::new(provider);
        let result = analyzer
            .analyze("résume les pénalités", &context(), &BrainConfig::default())
            .await;
        assert_eq!(result.intent, Intent::Synthesis);
        assert_eq!(result.rewritten_query, "résumé des pénalités du CCAP");
        assert_eq!(result.answer_format, AnswerFormat::List);
    }

    #[tokio::test]
    async fn transport_failure_falls_back_to_keyword_analysis() {
        let analyzer = QueryAnalyzer::new(Arc::new(BrokenProvider));
        let result = analyzer
            .analyze(
                "incohérences entre le CCAG et le CCAP",
                &context(),
                &BrainConfig::default(),
            )
            .await;
        assert_eq!(result.intent, Intent::Comparison);
        assert!(result.requires_search);
    }

    #[tokio::test]
    async fn garbage_response_falls_back_to_keyword_analysis() {
        let analyzer = QueryAnalyzer::new(Arc::new(CannedProvider("I cannot help with that.".into())));
        let result = analyzer
            .analyze("résume le CCAP", &context(), &BrainConfig::default())
            .await;
        assert_eq!(result.intent, Intent::Synthesis);
    }

    #[tokio::test]
    async fn fallback_disabled_still_produces_a_result() {
        let mut config = BrainConfig::default();
        config.fallback_enabled = false;
        let analyzer = QueryAnalyzer::new(Arc::new(BrokenProvider));
        let result = analyzer.analyze("ma question ?", &context(), &config).await;
        assert_eq!(result.intent, Intent::Factual);
        assert!(result.requires_search);
        assert_eq!(result.rewritten_query, "ma question ?");
    }

    #[tokio::test]
    async fn identical_inputs_give_identical_results() {
        let provider = Arc::new(CannedProvider(
            r#"{"intent": "factual", "requires_search": true, "key_concepts": ["pénalités"]}"#.into(),
        ));
        let analyzer = QueryAnalyzer::new(provider);
        let a = analyzer
            .analyze("pénalités ?", &context(), &BrainConfig::default())
            .await;
        let b = analyzer
            .analyze("pénalités ?", &context(), &BrainConfig::default())
            .await;
        assert_eq!(a.intent, b.intent);
        assert_eq!(a.rewritten_query, b.rewritten_query);
        assert_eq!(a.key_concepts, b.key_concepts);
    }
}
