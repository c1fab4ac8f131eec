//! Sentence segmentation for the streaming path.

use unicode_normalization::UnicodeNormalization;

const TERMINATORS: [char; 3] = ['.', '?', '!'];

/// Split `text` into sentence segments.
///
/// A segment ends after a run of `.`, `?` or `!`; following whitespace is
/// consumed. Segments are trimmed and empty ones dropped. A trailing fragment
/// without a terminator is kept as the last segment.
#[must_use]
pub fn split_sentences(text: &str) -> Vec<String> {
    let normalized: String = text.nfc().collect();
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = normalized.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if !TERMINATORS.contains(&c) {
            continue;
        }
        while let Some(&next) = chars.peek() {
            if TERMINATORS.contains(&next) {
                current.push(next);
                chars.next();
            } else {
                break;
            }
        }
        push_trimmed(&mut segments, &current);
        current.clear();
    }
    push_trimmed(&mut segments, &current);
    segments
}

fn push_trimmed(segments: &mut Vec<String>, candidate: &str) {
    let trimmed = candidate.trim();
    if !trimmed.is_empty() {
        segments.push(trimmed.to_string());
    }
}
