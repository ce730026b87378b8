use docbrain_schema::{AgentContext, AnalysisResult, ChatRequest, DelegatePayload};

/// Canned replies for the conversational short-circuit, keyed by normalized
/// greeting/thanks tokens.
const CANNED_REPLIES: &[(&str, &str)] = &[
    (
        "bonjour",
        "Bonjour ! Posez-moi une question sur vos documents et je chercherai la réponse.",
    ),
    (
        "bonsoir",
        "Bonsoir ! Posez-moi une question sur vos documents et je chercherai la réponse.",
    ),
    (
        "salut",
        "Salut ! Que souhaitez-vous savoir sur vos documents ?",
    ),
    (
        "hello",
        "Hello! Ask me anything about your documents and I'll look it up.",
    ),
    ("hi", "Hi! Ask me anything about your documents."),
    (
        "merci",
        "Avec plaisir ! N'hésitez pas si vous avez d'autres questions.",
    ),
    ("thanks", "You're welcome! Let me know if you have more questions."),
    ("thank you", "You're welcome! Let me know if you have more questions."),
    ("au revoir", "Au revoir, à bientôt !"),
    ("bye", "Goodbye! Come back any time."),
];

const GENERIC_REPLY: &str =
    "Je suis là pour répondre à vos questions sur vos documents. Que souhaitez-vous savoir ?";

/// Tail tolerated after a canned-reply key for a prefix match.
const MAX_PREFIX_TAIL: usize = 10;

/// Per-request routing outcome: a conversational short-circuit (no
/// generation call) or delegation to the retrieval+generation agent.
#[derive(Debug)]
pub enum RouteDecision {
    Conversational {
        reply: String,
        analysis: AnalysisResult,
    },
    Delegate {
        payload: Box<DelegatePayload>,
    },
}

pub fn route(
    request: &ChatRequest,
    analysis: AnalysisResult,
    context: AgentContext,
) -> RouteDecision {
    if !analysis.requires_search {
        return RouteDecision::Conversational {
            reply: conversational_reply(&request.query).to_string(),
            analysis,
        };
    }
    RouteDecision::Delegate {
        payload: Box::new(build_payload(request, analysis, context)),
    }
}

/// Exact or short-prefix match against the canned table, generic fallback
/// otherwise.
pub fn conversational_reply(query: &str) -> &'static str {
    let normalized = query.trim().to_lowercase();
    let trimmed =
        normalized.trim_end_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation());

    for (key, reply) in CANNED_REPLIES {
        if trimmed == *key {
            return reply;
        }
        if let Some(rest) = trimmed.strip_prefix(key) {
            let boundary = rest
                .chars()
                .next()
                .map(|c| !c.is_alphanumeric())
                .unwrap_or(true);
            if boundary && rest.chars().count() <= MAX_PREFIX_TAIL {
                return reply;
            }
        }
    }
    GENERIC_REPLY
}

fn build_payload(
    request: &ChatRequest,
    analysis: AnalysisResult,
    context: AgentContext,
) -> DelegatePayload {
    DelegatePayload {
        query: request.query.clone(),
        analysis,
        user_id: request.user_id.clone(),
        org_id: request.org_id.clone(),
        project_id: request.project_id.clone(),
        app_id: request.app_id.clone(),
        conversation_id: context.conversation_id,
        generation_mode: request.generation_mode.clone(),
        layers: request.layers.clone(),
        source_filters: request.source_filters.clone(),
        preloaded_context: context,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbrain_schema::Intent;
    use uuid::Uuid;

    fn request(query: &str) -> ChatRequest {
        ChatRequest {
            query: query.into(),
            user_id: "user-1".into(),
            org_id: Some("org-1".into()),
            project_id: Some("project-1".into()),
            app_id: Some("app-1".into()),
            conversation_id: None,
            stream: false,
            generation_mode: Some("balanced".into()),
            layers: vec!["layer-a".into()],
            source_filters: vec![],
        }
    }

    fn context() -> AgentContext {
        AgentContext {
            conversation_id: Uuid::new_v4(),
            org_id: Some("org-1".into()),
            app_id: Some("app-1".into()),
            system_prompt: None,
            identity: vec![],
            recent_messages: vec![],
            summary: None,
            first_message: None,
            previous_sources: vec![],
            key_documents: vec![],
            message_count: 0,
        }
    }

    #[test]
    fn canned_reply_exact_and_prefix() {
        assert!(conversational_reply("Bonjour").starts_with("Bonjour !"));
        assert!(conversational_reply("bonjour !!").starts_with("Bonjour !"));
        assert!(conversational_reply("Merci beaucoup").starts_with("Avec plaisir"));
        assert!(conversational_reply("thanks a lot").starts_with("You're welcome"));
    }

    #[test]
    fn unknown_conversational_query_gets_generic_reply() {
        assert_eq!(conversational_reply("coucou"), GENERIC_REPLY);
        assert_eq!(conversational_reply("ça va"), GENERIC_REPLY);
    }

    #[test]
    fn prefix_match_requires_word_boundary() {
        // "historique" must not match the "hi" key
        assert_eq!(conversational_reply("historique"), GENERIC_REPLY);
    }

    #[test]
    fn no_search_routes_conversational_with_conversation_id_available() {
        let ctx = context();
        let conversation_id = ctx.conversation_id;
        let mut analysis = AnalysisResult::default();
        analysis.requires_search = false;
        analysis.intent = Intent::Conversational;

        match route(&request("Bonjour"), analysis, ctx) {
            RouteDecision::Conversational { reply, analysis } => {
                assert!(reply.starts_with("Bonjour !"));
                assert!(!analysis.requires_search);
            }
            RouteDecision::Delegate { .. } => panic!("expected conversational route"),
        }
        // the caller still owns the conversation id for the reply envelope
        assert_ne!(conversation_id, Uuid::nil());
    }

    #[test]
    fn search_routes_delegate_with_full_payload() {
        let ctx = context();
        let conversation_id = ctx.conversation_id;
        let analysis = AnalysisResult {
            intent: Intent::Comparison,
            ..AnalysisResult::default()
        };

        match route(&request("incohérences ?"), analysis, ctx) {
            RouteDecision::Delegate { payload } => {
                assert_eq!(payload.query, "incohérences ?");
                assert_eq!(payload.analysis.intent, Intent::Comparison);
                assert_eq!(payload.user_id, "user-1");
                assert_eq!(payload.org_id.as_deref(), Some("org-1"));
                assert_eq!(payload.project_id.as_deref(), Some("project-1"));
                assert_eq!(payload.conversation_id, conversation_id);
                assert_eq!(payload.generation_mode.as_deref(), Some("balanced"));
                assert_eq!(payload.layers, vec!["layer-a"]);
                assert_eq!(payload.preloaded_context.conversation_id, conversation_id);
            }
            RouteDecision::Conversational { .. } => panic!("expected delegate route"),
        }
    }
}
