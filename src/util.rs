//! Small shared helpers.

/// Truncate a string to at most `max_len` bytes on a char boundary,
/// appending an ellipsis when anything was cut.
pub(crate) fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let target = max_len.saturating_sub(3);
    let mut end = target;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
