// src/util.rs — Small text helpers for console and log output

use std::borrow::Cow;

/// Clip to at most `max_chars` characters, marking the cut with "...".
pub fn clip(s: &str, max_chars: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_chars) {
        None => Cow::Borrowed(s),
        Some((end, _)) => Cow::Owned(format!("{}...", s[..end].trim_end())),
    }
}
