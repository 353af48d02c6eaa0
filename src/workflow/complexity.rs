//! Query complexity classification.
//!
//! A query is complex when it has more than [`COMPLEX_TOKEN_THRESHOLD`]
//! whitespace-separated tokens, or when it contains any of the
//! explanatory/comparative/analytical markers below as whole words.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const COMPLEX_TOKEN_THRESHOLD: usize = 7;

const COMPLEX_PATTERNS: &[&str] = &[
    "why",
    "how",
    "explain",
    "compare",
    "comparison",
    "difference between",
    "analyze",
    "analysis",
    "comprehensive",
    "in-depth",
    "detailed",
    "history of",
    "implications",
    "impact of",
    "pros and cons",
    "advantages and disadvantages",
    "relationship between",
    "evaluate",
    "versus",
    "vs",
];

static COMPLEX_RE: LazyLock<Regex> = LazyLock::new(|| {
    let alternation = COMPLEX_PATTERNS
        .iter()
        .map(|p| regex::escape(p).replace(' ', r"\s+"))
        .collect::<Vec<_>>()
        .join("|");
    #[allow(clippy::expect_used)]
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).expect("complexity patterns are valid")
});

/// Which search strategy a run takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPath {
    Deep,
    Standard,
}

impl SearchPath {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deep => "deep",
            Self::Standard => "standard",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "deep" => Some(Self::Deep),
            "standard" => Some(Self::Standard),
            _ => None,
        }
    }
}

impl std::fmt::Display for SearchPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn is_complex_query(query: &str) -> bool {
    query.split_whitespace().count() > COMPLEX_TOKEN_THRESHOLD || COMPLEX_RE.is_match(query)
}

pub fn classify(query: &str) -> SearchPath {
    if is_complex_query(query) {
        SearchPath::Deep
    } else {
        SearchPath::Standard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_plain_query_is_standard() {
        assert!(!is_complex_query("what is quantum computing"));
        assert_eq!(classify("rust async runtime"), SearchPath::Standard);
    }

    #[test]
    fn test_long_query_is_complex_without_patterns() {
        let query = "best budget laptops for students with long battery life";
        assert!(query.split_whitespace().count() > COMPLEX_TOKEN_THRESHOLD);
        assert!(is_complex_query(query));
    }

    #[test]
    fn test_exactly_threshold_tokens_is_not_complex() {
        assert!(!is_complex_query("one two three four five six seven"));
        assert!(is_complex_query("one two three four five six seven eight"));
    }

    #[test]
    fn test_every_pattern_triggers_regardless_of_length() {
        for pattern in COMPLEX_PATTERNS {
            assert!(is_complex_query(pattern), "pattern {pattern:?} should match");
            assert!(
                is_complex_query(&pattern.to_uppercase()),
                "pattern {pattern:?} should match case-insensitively"
            );
        }
    }

    #[test]
    fn test_patterns_match_whole_words_only() {
        assert!(!is_complex_query("showcase rust"));
        assert!(!is_complex_query("vscode plugins"));
        assert!(!is_complex_query("whyte notation"));
        assert!(is_complex_query("rust vs go"));
        assert!(is_complex_query("Why rust?"));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let q = "history of the transistor";
        let first = classify(q);
        for _ in 0..10 {
            assert_eq!(classify(q), first);
        }
        assert_eq!(first, SearchPath::Deep);
    }

    #[test]
    fn test_search_path_round_trips_names() {
        assert_eq!(SearchPath::parse("deep"), Some(SearchPath::Deep));
        assert_eq!(SearchPath::parse(SearchPath::Standard.as_str()), Some(SearchPath::Standard));
        assert_eq!(SearchPath::parse("other"), None);
    }
}
