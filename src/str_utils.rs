/// Safely returns a prefix of the string with at most `max_chars` characters.
/// This respects UTF-8 character boundaries.
pub fn prefix_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Truncated form of a line for log output.
pub fn log_snippet(s: &str, max_chars: usize) -> String {
    let prefix = prefix_chars(s, max_chars);
    if prefix.len() < s.len() {
        format!("{}...", prefix)
    } else {
        s.to_string()
    }
}

/// Byte length of the longest suffix of `text` that is a proper prefix of `marker`.
///
/// Returns 0 when no suffix could be the start of `marker`. The returned length
/// always lands on a char boundary of `text`.
pub fn partial_marker_suffix_len(text: &str, marker: &str) -> usize {
    let max = marker.len().saturating_sub(1).min(text.len());
    for len in (1..=max).rev() {
        let start = text.len() - len;
        if !text.is_char_boundary(start) {
            continue;
        }
        if marker.starts_with(&text[start..]) {
            return len;
        }
    }
    0
}
