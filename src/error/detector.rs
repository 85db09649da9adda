//! Pattern extraction from persistence-engine diagnostic text
//!
//! Upstream engines report constraint violations as free text, e.g.
//! `E11000 duplicate key error collection: natours.tours index: name_1 dup key: { name: "The Forest Hiker" }`.
//! The classifier only needs the offending value, which is the first quoted
//! substring (single or double quotes, backslash escapes allowed).

use regex::Regex;
use std::sync::OnceLock;

/// Double- or single-quoted text, backslash escapes allowed.
const QUOTED_VALUE: &str = r#""(?:\\.|[^"\\])*"|'(?:\\.|[^'\\])*'"#;

fn quoted_value_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(QUOTED_VALUE).expect("Invalid regex pattern"))
}

/// First quoted substring of `errmsg`, including its quotes.
///
/// ```
/// use natours::error::detector::first_quoted_value;
///
/// let errmsg = r#"E11000 duplicate key error dup key: { name: "The Forest Hiker" }"#;
/// assert_eq!(first_quoted_value(errmsg), Some(r#""The Forest Hiker""#));
/// ```
pub fn first_quoted_value(errmsg: &str) -> Option<&str> {
    quoted_value_pattern().find(errmsg).map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_quoted_value() {
        let errmsg = r#"E11000 duplicate key error collection: natours.tours index: name_1 dup key: { name: "The Forest Hiker" }"#;
        assert_eq!(first_quoted_value(errmsg), Some(r#""The Forest Hiker""#));
    }

    #[test]
    fn test_single_quoted_value() {
        let errmsg = "E11000 duplicate key error dup key: { email: 'jonas@example.io' }";
        assert_eq!(first_quoted_value(errmsg), Some("'jonas@example.io'"));
    }

    #[test]
    fn test_first_of_several_quoted_values_wins() {
        let errmsg = r#"dup key: { name: "A", slug: "b" }"#;
        assert_eq!(first_quoted_value(errmsg), Some(r#""A""#));
    }

    #[test]
    fn test_escaped_quote_inside_value() {
        let errmsg = r#"dup key: { name: "The \"Sea\" Explorer" }"#;
        assert_eq!(
            first_quoted_value(errmsg),
            Some(r#""The \"Sea\" Explorer""#)
        );
    }

    #[test]
    fn test_no_quoted_value() {
        assert_eq!(first_quoted_value("E11000 duplicate key error"), None);
        assert_eq!(first_quoted_value("unterminated \"value"), None);
    }

    #[test]
    fn test_mixed_quotes() {
        let errmsg = r#"dup key: { title: "Jonas's Tour" }"#;
        assert_eq!(first_quoted_value(errmsg), Some(r#""Jonas's Tour""#));
    }
}
