//! Lightweight text helpers: keyword extraction for associative recall,
//! token-set similarity for pattern dedup, and topic counting for summaries.
//! None of this tries to understand language; that is the Judge's job.

use std::collections::{BTreeSet, HashMap};

/// Words shorter than this many characters are too common to be useful as recall keys.
pub const MIN_KEYWORD_CHARS: usize = 4;

const STOPWORDS: &[&str] = &[
    "about", "after", "again", "also", "because", "been", "before", "being", "could", "does",
    "doing", "from", "have", "having", "here", "just", "like", "more", "much", "really", "should",
    "some", "than", "that", "their", "them", "then", "there", "these", "they", "this", "those",
    "very", "want", "were", "what", "when", "where", "which", "while", "will", "with", "would",
    "your", "yours", "yeah", "okay",
];

fn trim_word(word: &str) -> &str {
    word.trim_matches(|c: char| !c.is_alphanumeric())
}

/// Words of more than 3 characters, lowercased, de-duplicated, in first-seen order.
pub fn keywords(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    text.split_whitespace()
        .map(trim_word)
        .filter(|w| w.chars().count() >= MIN_KEYWORD_CHARS)
        .map(|w| w.to_lowercase())
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
pub fn escape_like(word: &str) -> String {
    let mut out = String::with_capacity(word.len() + 2);
    for c in word.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn token_set(text: &str) -> BTreeSet<String> {
    text.split_whitespace()
        .map(trim_word)
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Jaccard similarity of the two texts' token sets, in `[0, 1]`.
pub fn token_similarity(a: &str, b: &str) -> f32 {
    let sa = token_set(a);
    let sb = token_set(b);
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    let inter = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    if union == 0 {
        0.0
    } else {
        inter as f32 / union as f32
    }
}

/// The `limit` most frequent non-stopword keywords, ties broken alphabetically.
pub fn key_topics<'a, I>(texts: I, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: HashMap<String, usize> = HashMap::new();
    for text in texts {
        for word in text.split_whitespace().map(trim_word) {
            if word.chars().count() < MIN_KEYWORD_CHARS {
                continue;
            }
            let word = word.to_lowercase();
            if STOPWORDS.contains(&word.as_str()) {
                continue;
            }
            *counts.entry(word).or_insert(0) += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(limit).map(|(w, _)| w).collect()
}
