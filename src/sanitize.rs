//! Query sanitization for the public HTTP surface.

/// Strips markup and injection characters from untrusted query text.
///
/// Drops `<...>` tag spans wholesale, then keeps only word characters,
/// whitespace and basic punctuation, and trims the result. An all-noise
/// input sanitizes to the empty string, which callers reject.
pub fn sanitize_query(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for ch in input.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if in_tag => {}
            _ if allowed(ch) => out.push(ch),
            _ => {}
        }
    }
    out.trim().to_string()
}

fn allowed(ch: char) -> bool {
    ch.is_alphanumeric()
        || ch == '_'
        || ch.is_whitespace()
        || matches!(ch, '.' | ',' | '!' | '?' | '\'' | '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_plain_questions_through() {
        assert_eq!(
            sanitize_query("How do I unlock the final boss?"),
            "How do I unlock the final boss?"
        );
    }

    #[test]
    fn strips_tag_spans_entirely() {
        assert_eq!(
            sanitize_query("<script>alert('x')</script>hello"),
            "alert'x'hello"
        );
    }

    #[test]
    fn drops_injection_characters() {
        assert_eq!(sanitize_query("a{b}[c](d);e"), "abcde");
    }

    #[test]
    fn trims_surrounding_whitespace() {
        assert_eq!(sanitize_query("  spaced out  "), "spaced out");
    }

    #[test]
    fn all_noise_input_becomes_empty() {
        assert_eq!(sanitize_query("{};()[]<tag>"), "");
        assert_eq!(sanitize_query("   "), "");
    }
}
