//! Utility functions and helpers.

pub mod http;
pub mod log;
pub mod rate_limit;
pub mod retry;

use unicode_segmentation::UnicodeSegmentation;

/// Truncate a string to `limit` graphemes, appending an ellipsis when cut.
pub fn truncate(value: &str, limit: usize) -> String {
    let graphemes: Vec<&str> = value.graphemes(true).collect();
    if graphemes.len() > limit {
        let mut out: String = graphemes[..limit].concat();
        out.push('…');
        out
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_string_unchanged() {
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn test_truncate_long_string() {
        assert_eq!(truncate("abcdefgh", 4), "abcd…");
    }

    #[test]
    fn test_truncate_respects_graphemes() {
        // Family emoji is one grapheme built from several code points
        let s = "👨‍👩‍👧‍👦ab";
        assert_eq!(truncate(s, 1), "👨‍👩‍👧‍👦…");
    }
}
