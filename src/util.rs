//! Small string helpers shared by the provider and tool code.

/// Truncate to at most `max_chars` characters, appending "..." when cut.
///
/// Cuts on character boundaries, so multi-byte text never panics.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", s[..idx].trim_end()),
        None => s.to_string(),
    }
}

/// Collapse all whitespace runs (including newlines) to single spaces.
pub fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
