

/// Cuts `s` to at most `max_chars` characters without splitting a code point.
#[inline]
pub fn safe_truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &s[..byte_index],
        None => s,
    }
}


#[inline]
pub fn safe_truncate_ellipsis(s: &str, max_chars: usize) -> String {
    let cut = safe_truncate(s, max_chars);
    if cut.len() < s.len() {
        format!("{cut}...")
    } else {
        s.to_string()
    }
}
