#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl Complexity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subsystem keywords that signal cross-cutting work.
const HEAVY_KEYWORDS: &[&str] = &[
    "auth",
    "authentication",
    "authorization",
    "jwt",
    "rbac",
    "oauth",
    "database",
    "migration",
    "integration",
    "audit",
    "cache",
    "caching",
    "redis",
    "queue",
    "websocket",
    "concurrency",
    "concurrent",
];

/// Word count above which a requirement is treated as multi-concern.
const LONG_REQUIREMENT_WORDS: usize = 25;
/// Word count at or below which a keyword-free requirement stays low.
const SHORT_REQUIREMENT_WORDS: usize = 6;
/// Distinct heavy keywords needed to escalate to high.
const HIGH_KEYWORD_HITS: usize = 3;

/// Classifies a requirement by length and subsystem keyword membership.
///
/// Rule table:
/// - three or more distinct heavy keywords, or more than 25 words -> high
/// - at most 6 words and no heavy keyword -> low
/// - everything else -> medium
#[must_use]
pub fn estimate(requirements: &str) -> Complexity {
    let words: Vec<String> = requirements
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect();

    let mut hits: Vec<&str> = Vec::new();
    for keyword in HEAVY_KEYWORDS {
        if words.iter().any(|w| w == keyword) && !hits.contains(keyword) {
            hits.push(keyword);
        }
    }

    if hits.len() >= HIGH_KEYWORD_HITS || words.len() > LONG_REQUIREMENT_WORDS {
        Complexity::High
    } else if words.len() <= SHORT_REQUIREMENT_WORDS && hits.is_empty() {
        Complexity::Low
    } else {
        Complexity::Medium
    }
}
