//! Hallucination detection for committed transcripts.
//!
//! Whisper fabricates text when the audio has poor SNR or trailing silence
//! slipped past the VAD: stuck repetition loops, bare punctuation, and stock
//! subtitle phrases it memorised from captioned training data. A candidate
//! matching any of those patterns is dropped rather than delivered.

use regex::RegexSetBuilder;
use tracing::warn;

/// Texts shorter than this are never classified as hallucinations — single
/// words and short confirmations legitimately repeat.
const MIN_SUSPECT_LEN: usize = 20;

/// Repetition rule: a run of at least this many characters...
const REPEAT_MIN_LEN: usize = 5;
/// ...repeated at least this many times back-to-back.
const REPEAT_MIN_COUNT: usize = 3;

/// Stock artifacts, matched case-insensitively.
const ARTIFACT_PATTERNS: &[&str] = &[
    r"subt[ií]tulos",
    r"subtitles",
    r"thanks for watching",
    r"gracias por ver",
    r"suscr[ií]bete",
    r"like and subscribe",
    r"m[uú]sica",
    r"♪",
    r"♫",
];

pub struct HallucinationFilter {
    artifacts: regex::RegexSet,
}

impl HallucinationFilter {
    pub fn new() -> Self {
        let artifacts = RegexSetBuilder::new(ARTIFACT_PATTERNS)
            .case_insensitive(true)
            .build()
            .expect("artifact patterns are statically valid");
        Self { artifacts }
    }

    /// `true` when `text` should be discarded.
    pub fn is_hallucination(&self, text: &str) -> bool {
        if text.chars().count() < MIN_SUSPECT_LEN {
            return false;
        }

        if is_punctuation_only(text) {
            warn!(preview = %preview(text), "dropping punctuation-only transcript");
            return true;
        }
        if self.artifacts.is_match(text) {
            warn!(
                preview = %preview(text),
                "dropping transcript matching a stock artifact"
            );
            return true;
        }
        if has_repeated_run(text, REPEAT_MIN_LEN, REPEAT_MIN_COUNT) {
            warn!(preview = %preview(text), "dropping repetitive transcript");
            return true;
        }
        false
    }
}

impl Default for HallucinationFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn preview(text: &str) -> String {
    text.chars().take(50).collect()
}

/// Nothing but `.`, `,`, `!`, `?` and whitespace after trimming.
fn is_punctuation_only(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| matches!(c, '.' | ',' | '!' | '?') || c.is_whitespace())
}

/// Detect a substring of at least `min_len` bytes repeated `min_count`
/// times consecutively. The regex crate has no backreferences, so this is a
/// direct scan; transcripts are short enough that the quadratic bound is
/// irrelevant.
fn has_repeated_run(text: &str, min_len: usize, min_count: usize) -> bool {
    let bytes = text.as_bytes();
    let n = bytes.len();
    if n < min_len * min_count {
        return false;
    }

    let max_run = n / min_count;
    for run_len in min_len..=max_run {
        for start in 0..=(n - run_len * min_count) {
            let pattern = &bytes[start..start + run_len];
            let mut repeats = 1;
            let mut pos = start + run_len;
            while pos + run_len <= n && &bytes[pos..pos + run_len] == pattern {
                repeats += 1;
                pos += run_len;
                if repeats >= min_count {
                    return true;
                }
            }
        }
    }
    false
}
