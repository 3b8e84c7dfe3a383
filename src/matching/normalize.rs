// src/matching/normalize.rs
use once_cell::sync::Lazy;
use regex::Regex;

pub const MIN_TOKEN_LENGTH: usize = 2;

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

const CHAR_SUBSTITUTIONS: [(&str, &str); 9] = [
    ("&", " and "),
    ("+", " plus "),
    ("/", " "),
    ("-", " "),
    (".", " "),
    ("'", ""),
    ("(", " "),
    (")", " "),
    (",", " "),
];

/// Lowercases, expands a few symbols, drops remaining punctuation and collapses
/// whitespace. Deterministic, so features and predicates derived from it are too.
pub fn normalize_value(value: &str) -> String {
    let mut normalized = value.to_lowercase();
    for (pattern, replacement) in &CHAR_SUBSTITUTIONS {
        normalized = normalized.replace(pattern, replacement);
    }
    let normalized: String = normalized
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    WHITESPACE_RE.replace_all(normalized.trim(), " ").into_owned()
}

/// Whitespace tokens of an already-normalized value, shorter tokens dropped.
pub fn tokenize(normalized: &str) -> Vec<String> {
    normalized
        .split_whitespace()
        .filter(|t| t.chars().count() >= MIN_TOKEN_LENGTH)
        .map(|t| t.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_value() {
        assert_eq!(normalize_value("  Jon   SMITH "), "jon smith");
        assert_eq!(normalize_value("Smith & Sons, Inc."), "smith and sons inc");
        assert_eq!(normalize_value("O'Brien-Hall (Main)"), "obrien hall main");
        assert_eq!(normalize_value(""), "");
    }

    #[test]
    fn test_tokenize_drops_short_tokens() {
        assert_eq!(tokenize("j r smith"), vec!["smith".to_string()]);
        assert_eq!(tokenize("unrelated corp"), vec!["unrelated".to_string(), "corp".to_string()]);
        assert!(tokenize("").is_empty());
    }
}
