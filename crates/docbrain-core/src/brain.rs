use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use docbrain_provider::LlmProvider;
use docbrain_schema::{ChatRequest, Intent, StepStage, StreamFrame};
use docbrain_store::ContextStore;
use futures_core::Stream;
use serde_json::json;
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::analyzer::QueryAnalyzer;
use crate::config::{BrainConfig, ConfigResolver};
use crate::context::ContextLoader;
use crate::delegate::DelegateClient;
use crate::error::BrainError;
use crate::gate;
use crate::router::{self, RouteDecision};

/// The query-orchestration engine. One instance serves arbitrarily many
/// concurrent requests: it holds no mutable per-request state, only read
/// access to the store, the LLM provider and the downstream client.
pub struct Brain {
    config_resolver: ConfigResolver,
    context_loader: ContextLoader,
    analyzer: QueryAnalyzer,
    delegate: DelegateClient,
}

impl Brain {
    pub fn new(
        store: Arc<dyn ContextStore>,
        provider: Arc<dyn LlmProvider>,
        delegate: DelegateClient,
    ) -> Self {
        Self {
            config_resolver: ConfigResolver::new(store.clone()),
            context_loader: ContextLoader::new(store),
            analyzer: QueryAnalyzer::new(provider),
            delegate,
        }
    }

    /// Rejected before any work; the server maps this to a 4xx.
    pub fn validate(request: &ChatRequest) -> Result<(), BrainError> {
        if request.query.trim().is_empty() {
            return Err(BrainError::Validation("query is required".into()));
        }
        if request.user_id.trim().is_empty() {
            return Err(BrainError::Validation("user_id is required".into()));
        }
        Ok(())
    }

    /// Context load, analysis and safety gating, then the routing decision.
    /// Strictly sequential: each stage needs the prior stage's output.
    async fn analyze_and_route(
        &self,
        request: &ChatRequest,
        config: &BrainConfig,
    ) -> Result<(Uuid, RouteDecision), BrainError> {
        let context = self.context_loader.load(request, config).await?;
        let conversation_id = context.conversation_id;
        tracing::debug!(%conversation_id, "context loaded");

        let mut analysis = self.analyzer.analyze(&request.query, &context, config).await;
        tracing::debug!(intent = analysis.intent.as_str(), "query analyzed");

        analysis.requires_search = if config.skip_search_for_conversational {
            gate::safe_requires_search(&request.query, analysis.requires_search)
        } else {
            true
        };
        if !analysis.requires_search {
            analysis.intent = Intent::Conversational;
        }
        tracing::debug!(requires_search = analysis.requires_search, "safety gated");

        Ok((conversation_id, router::route(request, analysis, context)))
    }

    /// Buffered mode: one JSON object, with the analysis spliced in as
    /// metadata alongside the resolved conversation id.
    pub async fn handle_buffered(
        &self,
        request: &ChatRequest,
        bearer: Option<&str>,
    ) -> Result<serde_json::Value, BrainError> {
        Self::validate(request)?;
        let config = self
            .config_resolver
            .resolve(request.app_id.as_deref(), request.org_id.as_deref())
            .await;

        let (conversation_id, decision) = self.analyze_and_route(request, &config).await?;
        match decision {
            RouteDecision::Conversational { reply, analysis } => Ok(json!({
                "response": reply,
                "conversation_id": conversation_id,
                "analysis": analysis,
            })),
            RouteDecision::Delegate { payload } => {
                let mut body = self.delegate.invoke(&payload, bearer).await?;
                if let Some(object) = body.as_object_mut() {
                    object.insert(
                        "analysis".into(),
                        serde_json::to_value(&payload.analysis).unwrap_or_default(),
                    );
                    object.insert("conversation_id".into(), json!(conversation_id));
                }
                Ok(body)
            }
        }
    }

    /// Streaming mode. The returned sink is owned by this coordinator and
    /// written by exactly one producer at a time: synthetic acks first,
    /// then the pipeline, then the downstream bytes verbatim. A failure
    /// emits a single `error` frame and closes; bytes already sent are
    /// never retracted. The caller is expected to have validated the
    /// request already.
    pub fn event_stream(
        self: Arc<Self>,
        request: ChatRequest,
        bearer: Option<String>,
    ) -> Pin<Box<dyn Stream<Item = Bytes> + Send>> {
        Box::pin(async_stream::stream! {
            let config = self
                .config_resolver
                .resolve(request.app_id.as_deref(), request.org_id.as_deref())
                .await;

            // Synthetic acks go out before context loading or analysis has
            // even begun, so the client observes activity immediately.
            if config.emit_received_step {
                yield encode_frame(&StreamFrame::Step { step: StepStage::Received });
            }
            if config.emit_analyzing_step {
                yield encode_frame(&StreamFrame::Step { step: StepStage::Analyzing });
            }

            let (conversation_id, decision) =
                match self.analyze_and_route(&request, &config).await {
                    Ok(outcome) => outcome,
                    Err(error) => {
                        tracing::warn!(%error, "pipeline failed after stream start");
                        yield error_frame(&error);
                        return;
                    }
                };

            match decision {
                RouteDecision::Conversational { reply, .. } => {
                    yield encode_frame(&StreamFrame::Message {
                        text: reply,
                        conversation_id,
                    });
                    yield encode_frame(&StreamFrame::Done { conversation_id });
                }
                RouteDecision::Delegate { payload } => {
                    match self.delegate.invoke_stream(&payload, bearer.as_deref()).await {
                        Ok(downstream) => {
                            tokio::pin!(downstream);
                            while let Some(chunk) = downstream.next().await {
                                match chunk {
                                    // forwarded verbatim and in order, no re-buffering
                                    Ok(bytes) => yield bytes,
                                    Err(error) => {
                                        tracing::warn!(%error, "downstream stream interrupted");
                                        yield error_frame(&BrainError::Stream(error.to_string()));
                                        return;
                                    }
                                }
                            }
                            // downstream closed; this stream closes with it
                        }
                        Err(error) => {
                            tracing::warn!(%error, "downstream call failed");
                            yield error_frame(&error);
                        }
                    }
                }
            }
        })
    }
}

/// Typed SSE encoding for synthetic frames.
pub fn encode_frame(frame: &StreamFrame) -> Bytes {
    let data = serde_json::to_string(frame).unwrap_or_else(|_| String::from("{}"));
    Bytes::from(format!("event: {}\ndata: {data}\n\n", frame.event_name()))
}

fn error_frame(error: &BrainError) -> Bytes {
    let status = match error {
        BrainError::Downstream { status, .. } => *status,
        _ => None,
    };
    encode_frame(&StreamFrame::Error {
        message: error.to_string(),
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbrain_provider::StubProvider;
    use docbrain_store::SqliteStore;

    fn request(query: &str) -> ChatRequest {
        ChatRequest {
            query: query.into(),
            user_id: "user-1".into(),
            org_id: None,
            project_id: None,
            app_id: None,
            conversation_id: None,
            stream: false,
            generation_mode: None,
            layers: vec![],
            source_filters: vec![],
        }
    }

    fn brain() -> Arc<Brain> {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        Arc::new(Brain::new(
            store,
            Arc::new(StubProvider),
            DelegateClient::new("http://127.0.0.1:9"),
        ))
    }

    #[test]
    fn validate_rejects_blank_fields() {
        let mut req = request("  ");
        assert!(matches!(
            Brain::validate(&req),
            Err(BrainError::Validation(_))
        ));
        req.query = "ok".into();
        req.user_id = String::new();
        assert!(matches!(
            Brain::validate(&req),
            Err(BrainError::Validation(_))
        ));
        req.user_id = "user-1".into();
        assert!(Brain::validate(&req).is_ok());
    }

    #[tokio::test]
    async fn buffered_salutation_short_circuits_without_delegate() {
        // the delegate base url points nowhere; a delegation attempt would fail
        let brain = brain();
        let body = brain
            .handle_buffered(&request("Bonjour"), None)
            .await
            .unwrap();
        assert!(body["response"].as_str().unwrap().starts_with("Bonjour !"));
        assert!(body["conversation_id"].as_str().is_some());
        assert_eq!(body["analysis"]["requires_search"], false);
        assert_eq!(body["analysis"]["intent"], "conversational");
    }

    #[tokio::test]
    async fn encode_frame_produces_sse_lines() {
        let bytes = encode_frame(&StreamFrame::Step {
            step: StepStage::Received,
        });
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with("event: step\n"));
        assert!(text.contains("data: {\"type\":\"step\",\"step\":\"received\"}"));
        assert!(text.ends_with("\n\n"));
    }

    #[tokio::test]
    async fn stream_first_frame_is_received_step() {
        let brain = brain();
        let mut stream = brain.event_stream(request("Bonjour"), None);
        let first = stream.next().await.unwrap();
        let text = String::from_utf8(first.to_vec()).unwrap();
        assert!(text.starts_with("event: step"));
        assert!(text.contains("\"received\""));
    }

    #[tokio::test]
    async fn stream_conversational_ends_with_done() {
        let brain = brain();
        let mut stream = brain.event_stream(request("Merci !"), None);
        let mut frames = Vec::new();
        while let Some(bytes) = stream.next().await {
            frames.push(String::from_utf8(bytes.to_vec()).unwrap());
        }
        assert_eq!(frames.len(), 4); // received, analyzing, message, done
        assert!(frames[2].starts_with("event: message"));
        assert!(frames[3].starts_with("event: done"));
    }
}
