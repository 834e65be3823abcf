// SPDX-License-Identifier: Apache-2.0
//! Tag extraction and stopword filtering, used by memo tagging and lookup.

const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "all", "and", "any", "because", "been",
    "before", "being", "below", "between", "both", "but", "could", "did", "does", "doing",
    "down", "during", "each", "few", "for", "from", "further", "had", "has", "have", "having",
    "here", "how", "into", "its", "just", "more", "most", "now", "off", "once", "only", "other",
    "ought", "our", "ours", "out", "own", "same", "she", "should", "some", "such", "than", "that",
    "the", "their", "theirs", "them", "then", "there", "these", "they", "this", "those",
    "through", "too", "under", "until", "very", "was", "were", "what", "when", "where", "which",
    "while", "who", "whom", "why", "with", "would", "you", "your", "yours", "yourself",
    "yourselves",
];

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

/// Lowercase, split on whitespace and punctuation, keep tokens longer than 3
/// characters that aren't stopwords, de-duplicate preserving first-seen order.
pub fn extract_tags(text: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for raw in text.split(|c: char| c.is_whitespace() || ".,;:()[]{}<>\"'-".contains(c)) {
        let word = raw.trim().to_lowercase();
        if word.len() > 3 && !is_stopword(&word) && seen.insert(word.clone()) {
            tags.push(word);
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_meaningful_words_only() {
        let tags = extract_tags("The quick brown fox jumps over the lazy dog.");
        assert!(tags.contains(&"quick".to_string()));
        assert!(tags.contains(&"brown".to_string()));
        assert!(!tags.contains(&"the".to_string()));
        assert!(!tags.contains(&"fox".to_string())); // len 3, excluded
    }

    #[test]
    fn dedups_preserving_first_seen_order() {
        let tags = extract_tags("database database sqlite database");
        assert_eq!(tags, vec!["database".to_string(), "sqlite".to_string()]);
    }

    #[test]
    fn splits_on_punctuation() {
        let tags = extract_tags("sqlite,database;(schema)[index]");
        assert!(tags.contains(&"sqlite".to_string()));
        assert!(tags.contains(&"database".to_string()));
        assert!(tags.contains(&"schema".to_string()));
        assert!(tags.contains(&"index".to_string()));
    }

    #[test]
    fn is_stopword_matches_known_set() {
        assert!(is_stopword("their"));
        assert!(is_stopword("yourselves"));
        assert!(!is_stopword("database"));
    }
}
