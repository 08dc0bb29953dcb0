//! Lightweight text heuristics used when the assistant is unavailable.

use std::collections::{BTreeMap, HashSet};

const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "also", "am", "an", "and", "any",
    "are", "as", "at", "be", "because", "been", "before", "being", "below", "between", "both",
    "but", "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "even",
    "few", "for", "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers",
    "him", "his", "how", "however", "i", "if", "in", "into", "is", "it", "its", "itself", "just",
    "may", "me", "might", "more", "most", "much", "must", "my", "no", "nor", "not", "now", "of",
    "off", "on", "once", "one", "only", "or", "other", "our", "ours", "out", "over", "own",
    "really", "same", "she", "should", "so", "some", "such", "than", "that", "the", "their",
    "theirs", "them", "then", "there", "these", "they", "this", "those", "through", "to", "too",
    "under", "until", "up", "us", "very", "was", "we", "were", "what", "when", "where", "which",
    "while", "who", "whom", "why", "will", "with", "would", "you", "your", "yours",
];

const POSITIVE: &[&str] = &[
    "benefit", "benefits", "beneficial", "better", "effective", "efficient", "enable", "enables",
    "improve", "improved", "improves", "improvement", "increase", "positive", "success",
    "successful", "support", "supports", "helpful", "helps", "good", "great", "gain", "gains",
    "advantage", "strong", "strengthen", "reliable", "satisfied", "trust", "useful", "valuable",
];

const NEGATIVE: &[&str] = &[
    "barrier", "barriers", "burden", "concern", "concerns", "decline", "decrease", "difficult",
    "difficulty", "fail", "failed", "failure", "harm", "harmful", "ineffective", "limitation",
    "limited", "negative", "poor", "problem", "problems", "reduce", "reduced", "risk", "risks",
    "weak", "worse", "worsen", "distrust", "frustrating", "frustration", "costly", "unreliable",
];

const NEGATIONS: &[&str] = &["not", "no", "never", "without", "hardly", "neither", "nor"];

/// Lowercased alphanumeric tokens of at least two characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .collect()
}

/// Whether `token` (lowercase) is a stopword.
pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.binary_search(&token).is_ok()
}

/// Tokens of three or more characters that are not stopwords or numbers.
pub fn content_tokens(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| t.chars().count() >= 3 && !is_stopword(t) && !t.chars().all(|c| c.is_ascii_digit()))
        .collect()
}

/// Top `n` keywords across `texts`.
///
/// Terms are scored by frequency, boosted by how many texts mention them;
/// ties break alphabetically so output is stable.
pub fn keywords<S: AsRef<str>>(texts: &[S], n: usize) -> Vec<String> {
    let mut tf: BTreeMap<String, usize> = BTreeMap::new();
    let mut df: BTreeMap<String, usize> = BTreeMap::new();
    for text in texts {
        let tokens = content_tokens(text.as_ref());
        let mut seen = HashSet::new();
        for t in tokens {
            *tf.entry(t.clone()).or_insert(0) += 1;
            if seen.insert(t.clone()) {
                *df.entry(t).or_insert(0) += 1;
            }
        }
    }
    let docs = texts.len().max(1) as f64;
    let mut scored: Vec<(String, f64)> = tf
        .into_iter()
        .map(|(t, f)| {
            let spread = df.get(&t).copied().unwrap_or(0) as f64 / docs;
            (t, f as f64 * (1.0 + spread))
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    scored.into_iter().take(n).map(|(t, _)| t).collect()
}

/// Keyword label such as `"Privacy, Consent, Data"`.
pub fn keyword_label<S: AsRef<str>>(texts: &[S], n: usize) -> String {
    let words = keywords(texts, n);
    if words.is_empty() {
        return "Untitled theme".to_string();
    }
    words.iter().map(|w| capitalize(w)).collect::<Vec<_>>().join(", ")
}

/// Uppercase the first character.
pub fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Share of `candidate`'s content tokens that also occur in `source`.
///
/// Used to catch assistant output that is not grounded in the excerpt.
pub fn token_overlap(candidate: &str, source: &str) -> f64 {
    let cand = content_tokens(candidate);
    if cand.is_empty() {
        return 0.0;
    }
    let src: HashSet<String> = content_tokens(source).into_iter().collect();
    let hits = cand.iter().filter(|t| src.contains(*t)).count();
    hits as f64 / cand.len() as f64
}

/// Lexicon polarity in `[-1, 1]`; a negation flips the next sentiment word.
pub fn sentiment(text: &str) -> f64 {
    let tokens = tokenize(text);
    let (mut pos, mut neg) = (0usize, 0usize);
    let mut negate = false;
    for t in &tokens {
        let t = t.as_str();
        if NEGATIONS.contains(&t) {
            negate = true;
            continue;
        }
        let polarity = if POSITIVE.contains(&t) {
            1
        } else if NEGATIVE.contains(&t) {
            -1
        } else {
            0
        };
        match (polarity, negate) {
            (1, false) | (-1, true) => pos += 1,
            (-1, false) | (1, true) => neg += 1,
            _ => {}
        }
        if polarity != 0 {
            negate = false;
        }
    }
    let total = pos + neg;
    if total == 0 {
        0.0
    } else {
        (pos as f64 - neg as f64) / total as f64
    }
}

/// Truncate to at most `max` characters on a char boundary, adding `...`.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{}...", cut.trim_end())
}
