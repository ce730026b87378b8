//! Keyword-based substitute for the LLM analyzer. Pure function of the
//! query and the org's key documents; must honor the same output contract
//! as the LLM path so the rest of the pipeline cannot tell them apart.

use docbrain_schema::{AnalysisResult, AnswerFormat, Intent, KeyDocument, SearchConfig, SearchScope};

use crate::gate;

/// Comparison markers outrank synthesis markers outrank citation markers.
const COMPARISON_MARKERS: &[&str] = &[
    "incohérence",
    "incoherence",
    "écart",
    "ecart",
    "discrepan",
    "différence",
    "difference",
    "diverge",
    "contradiction",
    "versus",
    " vs ",
    "compare",
    "comparer",
    "comparaison",
];

const SYNTHESIS_MARKERS: &[&str] = &[
    "résume",
    "résumé",
    "resume",
    "synthèse",
    "synthese",
    "synthétise",
    "summar",
    "explique",
    "explain",
    "vulgarise",
    "vue d'ensemble",
    "overview",
];

const CITATION_MARKERS: &[&str] = &[
    "cite",
    "citation",
    "verbatim",
    "extrait exact",
    "mot pour mot",
    "texte exact",
    "quote",
    "quelle clause",
    "quel article",
];

const STOPWORDS: &[&str] = &[
    "les", "des", "une", "dans", "pour", "avec", "sur", "par", "est", "sont", "que", "qui", "quoi",
    "quel", "quelle", "quels", "quelles", "entre", "comment", "pourquoi", "the", "and", "for",
    "with", "what", "which", "how", "why", "this", "that", "est-ce", "vous", "nous", "leur",
    "votre", "notre", "mais", "donc", "pas", "plus", "aux", "ces", "son", "ses",
];

pub fn analyze(query: &str, key_documents: &[KeyDocument]) -> AnalysisResult {
    let lower = query.to_lowercase();
    let intent = classify_intent(query, &lower);
    let detected = detect_documents(&lower, key_documents);

    let mut search_config = preset(intent);
    search_config.boost_documents = key_documents
        .iter()
        .filter(|d| detected.iter().any(|label| *label == d.label))
        .map(|d| d.slug.clone())
        .collect();

    AnalysisResult {
        intent,
        requires_search: intent != Intent::Conversational,
        rewritten_query: query.trim().to_string(),
        detected_documents: detected,
        search_config,
        answer_format: format_for(intent),
        key_concepts: key_concepts(&lower),
        reasoning: "keyword analysis".into(),
    }
}

fn classify_intent(query: &str, lower: &str) -> Intent {
    if gate::is_pure_salutation(query) {
        return Intent::Conversational;
    }
    if COMPARISON_MARKERS.iter().any(|m| lower.contains(m)) {
        return Intent::Comparison;
    }
    if SYNTHESIS_MARKERS.iter().any(|m| lower.contains(m)) {
        return Intent::Synthesis;
    }
    if CITATION_MARKERS.iter().any(|m| lower.contains(m)) {
        return Intent::Citation;
    }
    Intent::Factual
}

/// One fixed search-config preset per intent.
fn preset(intent: Intent) -> SearchConfig {
    match intent {
        Intent::Comparison => SearchConfig {
            scope: SearchScope::Broad,
            max_files: 5,
            min_similarity: 0.35,
            boost_documents: Vec::new(),
            file_filter: None,
        },
        Intent::Synthesis => SearchConfig {
            scope: SearchScope::Broad,
            max_files: 4,
            min_similarity: 0.35,
            boost_documents: Vec::new(),
            file_filter: None,
        },
        Intent::Citation => SearchConfig {
            scope: SearchScope::Narrow,
            max_files: 3,
            min_similarity: 0.5,
            boost_documents: Vec::new(),
            file_filter: None,
        },
        Intent::Factual => SearchConfig::default(),
        Intent::Conversational => SearchConfig {
            scope: SearchScope::Narrow,
            max_files: 0,
            min_similarity: 0.0,
            boost_documents: Vec::new(),
            file_filter: None,
        },
    }
}

fn format_for(intent: Intent) -> AnswerFormat {
    match intent {
        Intent::Comparison => AnswerFormat::Table,
        Intent::Citation => AnswerFormat::Quote,
        Intent::Synthesis | Intent::Factual | Intent::Conversational => AnswerFormat::Paragraph,
    }
}

/// Up to 5 longest non-stopword tokens, longest first.
fn key_concepts(lower: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut tokens: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric() && c != '\'' && c != '-')
        .filter(|t| t.chars().count() >= 3)
        .filter(|t| !STOPWORDS.contains(t))
        .filter(|t| seen.insert(*t))
        .collect();
    tokens.sort_by_key(|t| std::cmp::Reverse(t.chars().count()));
    tokens.truncate(5);
    tokens.into_iter().map(ToOwned::to_owned).collect()
}

/// Literal case-insensitive matches of key-document slugs/labels.
fn detect_documents(lower: &str, key_documents: &[KeyDocument]) -> Vec<String> {
    key_documents
        .iter()
        .filter(|d| {
            lower.contains(&d.slug.to_lowercase()) || lower.contains(&d.label.to_lowercase())
        })
        .map(|d| d.label.clone())
        .collect()
}
