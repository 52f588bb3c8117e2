//! Content Filter: flags concerning or offensive messages before they reach the generator.
//!
//! Normalization is lower-case → drop everything that is not an ASCII letter or whitespace
//! → split on whitespace → remove stopwords. A message is flagged when any remaining token
//! is on the denylist. Flagged messages are answered with a canned empathetic reply chosen
//! by the session's step counter, so repeated flags cycle predictably.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::BufRead;
use std::path::Path;

static NON_ALPHA: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z\s]").expect("static pattern"));

const FLAGGED_TERMS: &[&str] = &[
    "idiot", "stupid", "dumb", "hate", "kill", "suicide",
    "depressed", "worthless", "useless", "failure", "loser",
    "die", "death", "hurt", "pain", "hopeless", "helpless",
];

const MENTAL_HEALTH_KEYWORDS: &[&str] = &[
    "anxious", "anxiety", "depressed", "depression", "sad",
    "lonely", "overwhelmed", "stressed", "panic", "worry",
    "scared", "afraid", "hopeless", "tired", "exhausted",
];

const EMPATHETIC_RESPONSES: &[&str] = &[
    "I'm really sorry you're feeling this way. You're not alone. There are people who care about you.",
    "It sounds like you're going through a difficult time. I'm here to listen and support you.",
    "Your feelings are completely valid. It's okay to feel overwhelmed sometimes.",
    "Thank you for sharing that with me. It takes courage to express difficult emotions.",
    "I can hear that you're struggling right now. Would you like to talk more about what's going on?",
    "Remember that difficult times don't last forever. You've gotten through hard times before.",
    "It's important that you're reaching out. That shows real strength, even when you don't feel strong.",
];

/// English stopwords (NLTK corpus). Replaceable via `stopwords_path`.
pub const ENGLISH_STOPWORDS: &[&str] = &[
    "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "you're", "you've",
    "you'll", "you'd", "your", "yours", "yourself", "yourselves", "he", "him", "his",
    "himself", "she", "she's", "her", "hers", "herself", "it", "it's", "its", "itself",
    "they", "them", "their", "theirs", "themselves", "what", "which", "who", "whom", "this",
    "that", "that'll", "these", "those", "am", "is", "are", "was", "were", "be", "been",
    "being", "have", "has", "had", "having", "do", "does", "did", "doing", "a", "an", "the",
    "and", "but", "if", "or", "because", "as", "until", "while", "of", "at", "by", "for",
    "with", "about", "against", "between", "into", "through", "during", "before", "after",
    "above", "below", "to", "from", "up", "down", "in", "out", "on", "off", "over", "under",
    "again", "further", "then", "once", "here", "there", "when", "where", "why", "how",
    "all", "any", "both", "each", "few", "more", "most", "other", "some", "such", "no",
    "nor", "not", "only", "own", "same", "so", "than", "too", "very", "s", "t", "can",
    "will", "just", "don", "don't", "should", "should've", "now", "d", "ll", "m", "o", "re",
    "ve", "y", "ain", "aren", "aren't", "couldn", "couldn't", "didn", "didn't", "doesn",
    "doesn't", "hadn", "hadn't", "hasn", "hasn't", "haven", "haven't", "isn", "isn't", "ma",
    "mightn", "mightn't", "mustn", "mustn't", "needn", "needn't", "shan", "shan't",
    "shouldn", "shouldn't", "wasn", "wasn't", "weren", "weren't", "won", "won't", "wouldn",
    "wouldn't",
];

/// Outcome of classifying one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterVerdict {
    pub is_flagged: bool,
}

/// Stateless keyword gate. Construction is the only place the word lists change.
#[derive(Debug, Clone)]
pub struct ContentFilter {
    flagged_terms: HashSet<String>,
    stopwords: HashSet<String>,
    mental_health_keywords: HashSet<String>,
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self::with_stopwords(ENGLISH_STOPWORDS.iter().map(|s| s.to_string()))
    }
}

impl ContentFilter {
    /// Built-in denylist with an injected stopword resource.
    pub fn with_stopwords(stopwords: impl IntoIterator<Item = String>) -> Self {
        Self {
            flagged_terms: FLAGGED_TERMS.iter().map(|s| s.to_string()).collect(),
            stopwords: stopwords
                .into_iter()
                .map(|s| NON_ALPHA.replace_all(&s.trim().to_lowercase(), "").to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            mental_health_keywords: MENTAL_HEALTH_KEYWORDS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Filter from optional word-list files. Missing paths fall back to the built-ins.
    pub fn from_paths(stopwords_path: Option<&Path>, flagged_terms_path: Option<&Path>) -> std::io::Result<Self> {
        let mut filter = match stopwords_path {
            Some(p) => Self::with_stopwords(read_word_list(p)?),
            None => Self::default(),
        };
        if let Some(p) = flagged_terms_path {
            filter.merge_flagged_terms(read_word_list(p)?);
        }
        Ok(filter)
    }

    /// Add extra denylist terms. Terms are normalized the same way messages are.
    pub fn merge_flagged_terms(&mut self, terms: impl IntoIterator<Item = String>) {
        self.flagged_terms.extend(
            terms
                .into_iter()
                .map(|t| NON_ALPHA.replace_all(&t.to_lowercase(), "").trim().to_string())
                .filter(|t| !t.is_empty()),
        );
    }

    pub fn classify(&self, text: &str) -> FilterVerdict {
        let is_flagged = normalize(text)
            .into_iter()
            .filter(|t| !self.stopwords.contains(t))
            .any(|t| self.flagged_terms.contains(&t));
        FilterVerdict { is_flagged }
    }

    pub fn is_flagged(&self, text: &str) -> bool {
        self.classify(text).is_flagged
    }

    /// True when the message mentions common mental-health terms (no stopword removal).
    pub fn contains_mental_health_keywords(&self, text: &str) -> bool {
        normalize(text)
            .iter()
            .any(|t| self.mental_health_keywords.contains(t))
    }

    /// Canned reply for the given rotation step: `responses[step mod N]`.
    pub fn get_canned_response(&self, step: usize) -> &'static str {
        EMPATHETIC_RESPONSES[step % EMPATHETIC_RESPONSES.len()]
    }

    pub fn canned_response_count(&self) -> usize {
        EMPATHETIC_RESPONSES.len()
    }
}

fn normalize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    NON_ALPHA
        .replace_all(&lower, "")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// One word per line; blank lines and `#` comments ignored.
fn read_word_list(path: &Path) -> std::io::Result<Vec<String>> {
    let f = fs::File::open(path)?;
    let mut words = Vec::new();
    for line in std::io::BufReader::new(f).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        words.push(line.to_string());
    }
    Ok(words)
}
