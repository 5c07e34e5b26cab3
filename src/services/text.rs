/// Decode bytes as UTF-8, dropping invalid byte sequences instead of replacing them.
pub fn sanitize_utf8(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
    }
    out
}

/// Prepare scraped text for storage: strips replacement and NUL characters,
/// trims, and maps empty strings to `None`.
pub fn clean_text(text: &str) -> Option<String> {
    let cleaned: String = text
        .chars()
        .filter(|c| *c != char::REPLACEMENT_CHARACTER && *c != '\0')
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// The first `max` characters of `text` (not bytes).
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_utf8() {
        let cases: [(&[u8], &str); 8] = [
            (b"Hello, World!", "Hello, World!"),
            ("Hello 🌍 World".as_bytes(), "Hello 🌍 World"),
            ("日本語 Ελληνικά עברית".as_bytes(), "日本語 Ελληνικά עברית"),
            (b"", ""),
            (b"Hello \xf0\x9f..World", "Hello ..World"),
            (b"Hello \xff World", "Hello  World"),
            (b"\xfe start \xff middle \xf0\x9f end", " start  middle  end"),
            (b"\xff\xfe\xf0\x9f", ""),
        ];

        for (input, want) in cases {
            assert_eq!(sanitize_utf8(input), want, "input {:?}", input);
        }
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  Title \u{FFFD}\0 "), Some("Title".to_string()));
        assert_eq!(clean_text(" \u{FFFD} "), None);
        assert_eq!(clean_text(""), None);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
