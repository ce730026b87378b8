//! Safety override on top of the analyzers' "skip retrieval" decision.
//!
//! A false "skip" (missing a real question) is far costlier than an
//! unnecessary retrieval before a greeting, so no single classifier is
//! trusted with a pure "do nothing" decision.

/// Canonical salutation/acknowledgement tokens. Hand-tuned and deliberately
/// conservative; anything beyond these forces retrieval.
pub const SALUTATIONS: &[&str] = &[
    "bonjour",
    "bonsoir",
    "salut",
    "coucou",
    "hello",
    "hi",
    "hey",
    "merci",
    "merci beaucoup",
    "thanks",
    "thank you",
    "ok",
    "d'accord",
    "parfait",
    "super",
    "très bien",
    "au revoir",
    "bonne journée",
    "bye",
    "goodbye",
    "ça va",
];

/// Closing punctuation tolerated after a salutation token. A question mark
/// is intentionally NOT in this set: "Bonjour ?" still retrieves.
fn is_closing_punct(c: char) -> bool {
    matches!(c, '.' | ',' | '!' | ';' | ':' | '…')
}

/// True when the raw query is nothing but a canonical salutation: an exact
/// match after trimming trailing punctuation, or a prefix match where
/// everything after the matched token is punctuation/whitespace only.
pub fn is_pure_salutation(query: &str) -> bool {
    let normalized = query.trim().to_lowercase();
    let trimmed = normalized.trim_end_matches(|c: char| c.is_whitespace() || is_closing_punct(c));
    if trimmed.is_empty() {
        return false;
    }

    SALUTATIONS.iter().any(|token| {
        if trimmed == *token {
            return true;
        }
        match normalized.strip_prefix(token) {
            Some(rest) => {
                !rest.is_empty()
                    && rest
                        .chars()
                        .all(|c| c.is_whitespace() || is_closing_punct(c))
            }
            None => false,
        }
    })
}

/// Accepts a "retrieval required" verdict unconditionally; re-checks a
/// "skip" verdict against the salutation allow-list and forces retrieval
/// when the query carries any real content.
pub fn safe_requires_search(query: &str, analyzer_verdict: bool) -> bool {
    if analyzer_verdict {
        return true;
    }
    if is_pure_salutation(query) {
        false
    } else {
        tracing::debug!("skip-search verdict overridden, query is not a pure salutation");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_salutations_pass() {
        assert!(is_pure_salutation("Bonjour"));
        assert!(is_pure_salutation("bonjour"));
        assert!(is_pure_salutation("  Merci  "));
        assert!(is_pure_salutation("Hello!"));
        assert!(is_pure_salutation("merci beaucoup"));
    }

    #[test]
    fn trailing_closing_punctuation_is_trimmed() {
        assert!(is_pure_salutation("Bonjour !"));
        assert!(is_pure_salutation("Bonjour..."));
        assert!(is_pure_salutation("ok."));
    }

    #[test]
    fn question_mark_is_never_a_pure_salutation() {
        assert!(!is_pure_salutation("Bonjour ?"));
        assert!(!is_pure_salutation("ça va?"));
    }

    #[test]
    fn trailing_content_fails() {
        assert!(!is_pure_salutation("Bonjour, quelle est l'équipe ?"));
        assert!(!is_pure_salutation("bonjour je voudrais le montant du marché"));
        assert!(!is_pure_salutation("merci de me citer l'article 12"));
    }

    #[test]
    fn prefix_of_longer_word_fails() {
        assert!(!is_pure_salutation("historique"));
        assert!(!is_pure_salutation("okay donc"));
        assert!(!is_pure_salutation(""));
        assert!(!is_pure_salutation("   "));
    }

    #[test]
    fn gate_never_overrides_toward_skip() {
        assert!(safe_requires_search("Bonjour", true));
        assert!(safe_requires_search("quelle est la pénalité de retard ?", true));
    }

    #[test]
    fn gate_honors_skip_only_for_pure_salutations() {
        assert!(!safe_requires_search("Bonjour", false));
        assert!(!safe_requires_search("Merci !", false));
        assert!(safe_requires_search("Bonjour, quelle est l'équipe ?", false));
        assert!(safe_requires_search("quelle est la date limite", false));
    }
}
