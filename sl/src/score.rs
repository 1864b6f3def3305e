//! Score extraction from free-form role output
//!
//! Reviewer roles answer in prose ("Score: 8/10", "I'd give this a 7"), so the
//! score has to be dug out of the text. Lookup order:
//!
//! 1. The whole text is a JSON object with a numeric `score` field
//! 2. The first `N/10` pattern, N being a standalone 1-2 digit run
//! 3. The first standalone 1-2 digit run anywhere in the text
//!
//! Runs of three or more digits are never read as a score, so a stray "100"
//! does not become a 10. A decimal score reads as its whole part: "8.5/10"
//! is 8, never the 5 after the point.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

/// Highest score on the scale
pub const MAX_SCORE: u8 = 10;

// A digit run may not follow a digit, nor a `.`/`,` that itself follows a digit
static OUT_OF_TEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^[.,]?|[^0-9.,]|[^0-9][.,])([0-9]{1,2})(?:[.,][0-9]+)?\s*/\s*10(?:[^0-9]|$)").expect("valid regex")
});

static DIGIT_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^[.,]?|[^0-9.,]|[^0-9][.,])([0-9]{1,2})(?:[.,][0-9]+)?(?:[^0-9]|$)").expect("valid regex")
});

/// Result of reading a score out of text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreReading {
    /// A score was found (not yet clamped)
    Parsed(u8),
    /// No score could be found; distinct from a genuine zero
    Unparsed,
}

impl ScoreReading {
    /// The parsed value, if any
    pub fn value(self) -> Option<u8> {
        match self {
            ScoreReading::Parsed(n) => Some(n),
            ScoreReading::Unparsed => None,
        }
    }

    /// Whether a score was found
    pub fn is_parsed(self) -> bool {
        matches!(self, ScoreReading::Parsed(_))
    }
}

/// Read a score from text, reporting explicitly when none was found
pub fn read_score(text: &str) -> ScoreReading {
    debug!(text_len = text.len(), "read_score: called");

    if let Some(n) = structured_score(text) {
        debug!(score = n, "read_score: structured score");
        return ScoreReading::Parsed(n);
    }

    for pattern in [&*OUT_OF_TEN, &*DIGIT_RUN] {
        if let Some(n) = pattern
            .captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u8>().ok())
        {
            debug!(score = n, "read_score: matched");
            return ScoreReading::Parsed(n);
        }
    }

    debug!("read_score: no score found");
    ScoreReading::Unparsed
}

/// Extract the first score in the text, or None when there is no digit run
///
/// The value is not range-checked; callers clamp with [`clamp_score`].
pub fn extract_score(text: &str) -> Option<u8> {
    read_score(text).value()
}

/// Clamp a raw score into the 0-10 scale
pub fn clamp_score(n: u8) -> u8 {
    n.min(MAX_SCORE)
}

/// Extract and clamp a score, falling back when none is found
pub fn score_or(text: &str, fallback: u8) -> u8 {
    extract_score(text).map(clamp_score).unwrap_or(fallback)
}

/// `{"score": N}` when the whole text is a JSON object
fn structured_score(text: &str) -> Option<u8> {
    let trimmed = text.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    let score = value.get("score")?.as_f64()?;
    if !(0.0..=f64::from(u8::MAX)).contains(&score) {
        return None;
    }
    Some(score.round() as u8)
}
