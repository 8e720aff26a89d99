//! Small text helpers shared by caching, batching and retrieval.

/// Normalize text into a cache key.
///
/// Trims and collapses internal whitespace. Case is preserved: "US" and "us"
/// are different surface forms and may deserve different labels.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whitespace tokenizer with case folding.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(|w| w.to_lowercase()).collect()
}

/// Coarse token estimate (roughly four characters per token).
///
/// Never returns zero so every item carries some weight against a budget.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() / 4).max(1)
}
