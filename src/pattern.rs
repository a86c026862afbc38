//! Name-mask matching for architectures, configurations, and module names.
//!
//! Masks are case-insensitive glob patterns (`*`, `?`) with comma-separated
//! alternatives: `x64,arm*` matches `x64` and everything starting with
//! `arm`. An empty mask or a bare `*` matches everything.

use glob::{MatchOptions, Pattern};

/// True when `text` matches the (possibly comma-separated) `mask`.
pub fn matches_mask(mask: &str, text: &str) -> bool {
    if mask.is_empty() || mask == "*" {
        return true;
    }
    mask.split(',').filter(|p| !p.is_empty()).any(|p| matches_single(p, text))
}

fn matches_single(pattern: &str, text: &str) -> bool {
    let options = MatchOptions {
        case_sensitive: false,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };
    match Pattern::new(pattern) {
        Ok(pattern) => pattern.matches_with(text, options),
        // a mask that isn't a valid glob degrades to a literal comparison
        Err(_) => pattern.eq_ignore_ascii_case(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_star_match_everything() {
        assert!(matches_mask("", "anything"));
        assert!(matches_mask("*", "anything"));
        assert!(matches_mask("*", ""));
    }

    #[test]
    fn exact_match_ignores_case() {
        assert!(matches_mask("Debug", "debug"));
        assert!(matches_mask("x64", "X64"));
        assert!(!matches_mask("x64", "x86"));
    }

    #[test]
    fn affix_wildcards() {
        assert!(matches_mask("lib*", "libpng"));
        assert!(matches_mask("*png", "libpng"));
        assert!(matches_mask("*ibp*", "libpng"));
        assert!(!matches_mask("lib*", "zlib"));
    }

    #[test]
    fn comma_separated_alternatives() {
        assert!(matches_mask("zlib,libpng", "libpng"));
        assert!(matches_mask("zlib,lib*", "libjpeg"));
        assert!(!matches_mask("zlib,libpng", "boost"));
    }
}
