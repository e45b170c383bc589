//! String helpers.

/// Find the nearest valid UTF-8 char boundary at or before the given byte index.
#[inline]
pub fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Truncate a string to at most `max_len` bytes on a char boundary.
#[inline]
pub fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        s
    } else {
        &s[..floor_char_boundary(s, max_len)]
    }
}

/// Truncate a string to at most `max_chars` characters.
#[inline]
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte, _)) => &s[..byte],
        None => s,
    }
}

/// Trim and truncate to `max_chars`, returning an owned string.
pub fn clamp_text(s: &str, max_chars: usize) -> String {
    truncate_chars(s.trim(), max_chars).trim_end().to_string()
}

/// Single-line preview for terminal output.
pub fn preview(s: &str, max_len: usize) -> String {
    let flat: String = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.len() <= max_len {
        flat
    } else {
        format!("{}...", truncate_str(&flat, max_len.saturating_sub(3)))
    }
}
