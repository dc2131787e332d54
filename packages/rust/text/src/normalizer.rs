//! Stopword removal and lemmatization.
//!
//! The normalized form is stored beside each page's raw text. Nothing ranks
//! on it yet; it is the hook for relevance scoring of sections.

use std::collections::HashSet;

/// NLTK English stopword list.
const ENGLISH_STOPWORDS: [&str; 179] = [
    "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "you're", "you've",
    "you'll", "you'd", "your", "yours", "yourself", "yourselves", "he", "him", "his", "himself",
    "she", "she's", "her", "hers", "herself", "it", "it's", "its", "itself", "they", "them",
    "their", "theirs", "themselves", "what", "which", "who", "whom", "this", "that", "that'll",
    "these", "those", "am", "is", "are", "was", "were", "be", "been", "being", "have", "has",
    "had", "having", "do", "does", "did", "doing", "a", "an", "the", "and", "but", "if", "or",
    "because", "as", "until", "while", "of", "at", "by", "for", "with", "about", "against",
    "between", "into", "through", "during", "before", "after", "above", "below", "to", "from",
    "up", "down", "in", "out", "on", "off", "over", "under", "again", "further", "then", "once",
    "here", "there", "when", "where", "why", "how", "all", "any", "both", "each", "few", "more",
    "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than",
    "too", "very", "s", "t", "can", "will", "just", "don", "don't", "should", "should've", "now",
    "d", "ll", "m", "o", "re", "ve", "y", "ain", "aren", "aren't", "couldn", "couldn't", "didn",
    "didn't", "doesn", "doesn't", "hadn", "hadn't", "hasn", "hasn't", "haven", "haven't", "isn",
    "isn't", "ma", "mightn", "mightn't", "mustn", "mustn't", "needn", "needn't", "shan", "shan't",
    "shouldn", "shouldn't", "wasn", "wasn't", "weren", "weren't", "won", "won't", "wouldn",
    "wouldn't",
];

/// Plurals no suffix rule recovers.
const IRREGULAR_NOUNS: [(&str, &str); 16] = [
    ("men", "man"),
    ("women", "woman"),
    ("children", "child"),
    ("feet", "foot"),
    ("teeth", "tooth"),
    ("mice", "mouse"),
    ("geese", "goose"),
    ("data", "datum"),
    ("criteria", "criterion"),
    ("analyses", "analysis"),
    ("indices", "index"),
    ("wives", "wife"),
    ("knives", "knife"),
    ("lives", "life"),
    ("leaves", "leaf"),
    ("shelves", "shelf"),
];

/// Lowercases, drops stopwords and lemmatizes whitespace-separated tokens.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    stopwords: HashSet<&'static str>,
}

impl TextNormalizer {
    pub fn new() -> Self {
        Self {
            stopwords: ENGLISH_STOPWORDS.iter().copied().collect(),
        }
    }

    /// Normalize `text` into a single space-separated line of lemmas.
    pub fn normalize(&self, text: &str) -> String {
        text.to_lowercase()
            .split_whitespace()
            .filter(|token| !self.stopwords.contains(*token))
            .map(lemmatize)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn is_stopword(&self, token: &str) -> bool {
        self.stopwords.contains(token)
    }
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Reduce a lowercase noun to its singular lemma.
///
/// Tokens with punctuation or digits, and tokens of three characters or
/// fewer, are returned unchanged.
pub fn lemmatize(token: &str) -> String {
    if let Some((_, lemma)) = IRREGULAR_NOUNS.iter().find(|(plural, _)| *plural == token) {
        return (*lemma).to_string();
    }

    if token.len() <= 3 || !token.chars().all(|c| c.is_ascii_lowercase()) {
        return token.to_string();
    }

    if let Some(stem) = token.strip_suffix("ies") {
        if token.len() > 4 {
            return format!("{stem}y");
        }
    }

    for suffix in ["sses", "xes", "ches", "shes", "zes"] {
        if token.ends_with(suffix) {
            return token[..token.len() - 2].to_string();
        }
    }

    if token.ends_with("ss") || token.ends_with("us") || token.ends_with("is") {
        return token.to_string();
    }

    match token.strip_suffix('s') {
        Some(stem) => stem.to_string(),
        None => token.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopword_list_is_complete() {
        let normalizer = TextNormalizer::new();
        assert_eq!(normalizer.stopwords.len(), ENGLISH_STOPWORDS.len());
        assert!(normalizer.is_stopword("the"));
        assert!(normalizer.is_stopword("wouldn't"));
        assert!(!normalizer.is_stopword("cards"));
    }

    #[test]
    fn lemmatize_regular_plurals() {
        assert_eq!(lemmatize("cards"), "card");
        assert_eq!(lemmatize("companies"), "company");
        assert_eq!(lemmatize("boxes"), "box");
        assert_eq!(lemmatize("churches"), "church");
        assert_eq!(lemmatize("classes"), "class");
    }

    #[test]
    fn lemmatize_leaves_non_plurals() {
        assert_eq!(lemmatize("business"), "business");
        assert_eq!(lemmatize("status"), "status");
        assert_eq!(lemmatize("analysis"), "analysis");
        assert_eq!(lemmatize("gas"), "gas");
        assert_eq!(lemmatize("cards."), "cards.");
    }

    #[test]
    fn lemmatize_irregulars() {
        assert_eq!(lemmatize("children"), "child");
        assert_eq!(lemmatize("women"), "woman");
        assert_eq!(lemmatize("data"), "datum");
    }

    #[test]
    fn normalize_drops_stopwords_and_lemmatizes() {
        let normalizer = TextNormalizer::new();
        let result = normalizer.normalize("We sell   Gift Cards to the COMPANIES of the world");
        assert_eq!(result, "sell gift card company world");
    }

    #[test]
    fn normalize_empty() {
        let normalizer = TextNormalizer::new();
        assert_eq!(normalizer.normalize("  the a an "), "");
    }
}
