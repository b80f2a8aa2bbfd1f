use regex::Regex;
use tracing::debug;

use crate::error::{Result, ShieldError};
use crate::models::{Verdict, VerdictSource};

/// Phrases that each add one point when present in the lower-cased content
pub const SPAM_KEYWORDS: &[&str] = &[
    "congrat",
    "won",
    "prize",
    "lottery",
    "cash",
    "claim",
    "free",
    "offer",
    "limited time",
    "click",
    "link",
    "verify",
    "account",
    "urgent",
    "alert",
    "bank",
    "credit",
    "update",
    "confirm",
    "password",
    "login",
    "suspended",
    "unusual activity",
    "gift card",
    "bitcoin",
];

const URL_MARKERS: &[&str] = &["http://", "https://", "www."];
const URL_WEIGHT: u32 = 2;
const URGENCY_MARKS: &[char] = &['$', '€', '%', '!'];

/// Content up to this many characters uses the lower threshold
pub const SHORT_MESSAGE_CHARS: usize = 50;
const SHORT_THRESHOLD: u32 = 2;
const LONG_THRESHOLD: u32 = 3;

/// Breakdown of a heuristic score
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeuristicScore {
    /// Keywords found
    pub keyword_hits: u32,
    /// A URL-like pattern was found
    pub has_url: bool,
    /// Currency or urgency punctuation was found
    pub has_urgency_marks: bool,
    /// Total points
    pub score: u32,
    /// Points needed to call the content spam
    pub threshold: u32,
}

impl HeuristicScore {
    /// Spam when the score reaches the threshold
    #[must_use]
    pub const fn is_spam(&self) -> bool {
        self.score >= self.threshold
    }
}

/// Deterministic, network-free spam scorer used when the remote classifier
/// cannot answer
#[derive(Debug, Clone)]
pub struct HeuristicScorer {
    bare_domain_regex: Regex,
}

impl HeuristicScorer {
    /// Create a scorer, compiling its patterns once
    pub fn new() -> Result<Self> {
        let bare_domain_regex = Regex::new(r"\.[a-z]{2,}")
            .map_err(|e| ShieldError::Other(format!("Failed to compile domain regex: {e}")))?;

        Ok(Self { bare_domain_regex })
    }

    /// Score content without deciding
    #[must_use]
    pub fn score(&self, content: &str) -> HeuristicScore {
        let content = content.to_lowercase();

        let keyword_hits = SPAM_KEYWORDS.iter().filter(|k| content.contains(*k)).count();
        let keyword_hits = u32::try_from(keyword_hits).unwrap_or(u32::MAX);

        let has_url =
            URL_MARKERS.iter().any(|m| content.contains(m)) || self.bare_domain_regex.is_match(&content);
        let has_urgency_marks = content.contains(URGENCY_MARKS);

        let mut score = keyword_hits;
        if has_url {
            score += URL_WEIGHT;
        }
        if has_urgency_marks {
            score += 1;
        }

        let threshold = if content.chars().count() <= SHORT_MESSAGE_CHARS {
            SHORT_THRESHOLD
        } else {
            LONG_THRESHOLD
        };

        HeuristicScore {
            keyword_hits,
            has_url,
            has_urgency_marks,
            score,
            threshold,
        }
    }

    /// True when `content` looks like spam. Empty content is never spam.
    #[must_use]
    pub fn is_spam(&self, content: &str) -> bool {
        !content.is_empty() && self.score(content).is_spam()
    }

    /// Classify content as a heuristic verdict
    #[must_use]
    pub fn classify(&self, content: &str) -> Verdict {
        let score = self.score(content);
        let is_spam = !content.is_empty() && score.is_spam();
        debug!(score = score.score, threshold = score.threshold, is_spam, "Local analysis scored");

        Verdict {
            is_spam,
            explanation: format!(
                "Determined using local analysis (score {} of {} needed)",
                score.score, score.threshold
            ),
            source: VerdictSource::Heuristic,
        }
    }
}
