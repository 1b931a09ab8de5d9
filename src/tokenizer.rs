//! Code-aware tokenizer for the inverted index.
//!
//! Handles code-specific patterns:
//! - snake_case → [snake_case, snake, case]
//! - camelCase → [camelcase, camel, case]
//! - HTTPServer → [httpserver, http, server]
//!
//! Whole identifiers are emitted alongside their parts so exact-name queries
//! and natural-language queries both match. Pure and deterministic: no I/O,
//! no global mutable state.

use std::collections::HashMap;
use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// Token emitted for every numeric literal when folding is enabled.
pub const NUMBER_TOKEN: &str = "<num>";

/// Identifier and number extraction.
static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*|[0-9]+(?:\.[0-9]+)?").expect("invalid regex"));

/// camelCase boundary: lowercase followed by uppercase.
static CAMEL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").expect("invalid regex"));

/// Acronym boundary: HTTPServer → HTTP Server.
static ACRONYM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Z]+)([A-Z][a-z])").expect("invalid regex"));

/// Fixed stop list: English function words plus keywords common across the
/// indexed languages. Dropping them keeps the term space focused on
/// identifiers.
static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // English
        "the", "a", "an", "is", "are", "was", "were", "be", "been", "and", "or", "not", "no",
        "if", "in", "of", "to", "for", "with", "on", "at", "by", "this", "that", "it", "as",
        "from", "do", "does", "will", "can", "we", "you",
        // Shared keywords
        "fn", "let", "mut", "pub", "use", "mod", "impl", "const", "static", "var", "val",
        "def", "class", "struct", "enum", "trait", "interface", "type", "return", "func",
        "function", "import", "export", "package", "new", "null", "nil", "none", "true",
        "false", "void", "self", "super", "pass", "break", "continue", "else", "elif",
        "while", "match", "case", "switch", "try", "catch", "except", "finally", "throw",
        "throws", "async", "await", "yield", "public", "private", "protected", "extends",
        "implements", "abstract", "final", "where", "loop", "ref", "dyn",
    ]
    .into_iter()
    .collect()
});

/// Code tokenizer.
#[derive(Debug, Clone)]
pub struct CodeTokenizer {
    /// Fold numeric literals into [`NUMBER_TOKEN`].
    fold_numbers: bool,
}

impl Default for CodeTokenizer {
    fn default() -> Self {
        Self { fold_numbers: true }
    }
}

impl CodeTokenizer {
    /// Create a tokenizer with the given numeric-folding behavior.
    pub fn new(fold_numbers: bool) -> Self {
        Self { fold_numbers }
    }

    /// Tokenize text into a bag of terms (multiset as a vec, in scan order).
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let mut terms = Vec::new();

        for m in TOKEN_RE.find_iter(text) {
            let raw = m.as_str();

            if raw.starts_with(|c: char| c.is_ascii_digit()) {
                if self.fold_numbers {
                    terms.push(NUMBER_TOKEN.to_string());
                } else {
                    terms.push(raw.to_string());
                }
                continue;
            }

            let whole = raw.to_lowercase();
            let parts = split_identifier(raw);

            if keep(&whole) {
                terms.push(whole.clone());
            }
            // Emit parts only when the identifier actually split; otherwise
            // the whole token already covers it.
            if parts.len() > 1 {
                for part in parts {
                    if part != whole && keep(&part) {
                        terms.push(part);
                    }
                }
            }
        }

        terms
    }

    /// Tokenize and count raw term frequencies.
    pub fn term_frequencies(&self, text: &str) -> HashMap<String, i64> {
        let mut freqs = HashMap::new();
        for term in self.tokenize(text) {
            *freqs.entry(term).or_insert(0) += 1;
        }
        freqs
    }
}

/// Split an identifier on snake_case and camelCase boundaries, lowercased.
fn split_identifier(ident: &str) -> Vec<String> {
    let spaced = ACRONYM_RE.replace_all(ident, "$1 $2");
    let spaced = CAMEL_RE.replace_all(&spaced, "$1 $2");
    spaced
        .split(|c: char| c == '_' || c == ' ')
        .filter(|part| !part.is_empty())
        .map(|part| part.to_lowercase())
        .collect()
}

/// Keep terms longer than one character that are not stop words.
fn keep(term: &str) -> bool {
    term.len() > 1 && !STOP_WORDS.contains(term)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(text: &str) -> Vec<String> {
        CodeTokenizer::default().tokenize(text)
    }

    #[test]
    fn test_snake_case_splits() {
        let terms = tokens("get_user_by_id");
        assert!(terms.contains(&"get_user_by_id".to_string()));
        assert!(terms.contains(&"get".to_string()));
        assert!(terms.contains(&"user".to_string()));
        assert!(terms.contains(&"id".to_string()));
        // "by" is a stop word
        assert!(!terms.contains(&"by".to_string()));
    }

    #[test]
    fn test_camel_case_splits() {
        let terms = tokens("getUserName");
        assert!(terms.contains(&"getusername".to_string()));
        assert!(terms.contains(&"get".to_string()));
        assert!(terms.contains(&"user".to_string()));
        assert!(terms.contains(&"name".to_string()));
    }

    #[test]
    fn test_acronym_splits() {
        let terms = tokens("HTTPServer");
        assert!(terms.contains(&"httpserver".to_string()));
        assert!(terms.contains(&"http".to_string()));
        assert!(terms.contains(&"server".to_string()));
    }

    #[test]
    fn test_plain_identifier_not_duplicated() {
        let terms = tokens("authenticate");
        assert_eq!(terms, vec!["authenticate".to_string()]);
    }

    #[test]
    fn test_stop_words_and_short_parts_dropped() {
        let terms = tokens("fn x() { return a_b; }");
        assert!(!terms.contains(&"fn".to_string()));
        assert!(!terms.contains(&"return".to_string()));
        // 1-char identifiers and parts are dropped, but the whole compound
        // identifier survives.
        assert!(!terms.contains(&"x".to_string()));
        assert!(terms.contains(&"a_b".to_string()));
    }

    #[test]
    fn test_number_folding() {
        let terms = tokens("let timeout = 5000;");
        assert!(terms.contains(&NUMBER_TOKEN.to_string()));
        assert!(!terms.contains(&"5000".to_string()));

        let terms = CodeTokenizer::new(false).tokenize("timeout = 5000");
        assert!(terms.contains(&"5000".to_string()));
    }

    #[test]
    fn test_deterministic() {
        let text = "async fn fetchUserProfile(user_id: u64) -> Result<Profile>";
        assert_eq!(tokens(text), tokens(text));
    }

    #[test]
    fn test_multiset_counts() {
        let freqs = CodeTokenizer::default().term_frequencies("user user user profile");
        assert_eq!(freqs.get("user"), Some(&3));
        assert_eq!(freqs.get("profile"), Some(&1));
    }

    #[test]
    fn test_separator_punctuation_ignored() {
        let terms = tokens("store.query(conn) || store::exec->run");
        assert!(terms.contains(&"store".to_string()));
        assert!(terms.contains(&"query".to_string()));
        assert!(terms.contains(&"conn".to_string()));
        assert!(terms.contains(&"exec".to_string()));
        assert!(terms.contains(&"run".to_string()));
    }
}
