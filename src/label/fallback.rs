//! Keyword label heuristic with no external dependency.

use std::collections::HashMap;

pub const MISCELLANEOUS: &str = "Miscellaneous";

/// Tokens of this many chars or fewer are dropped.
const MIN_TOKEN_CHARS: usize = 3;

/// Tokens shorter than four chars are dropped anyway, so only longer
/// function words need listing.
const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "also", "always", "another", "around",
    "because", "been", "before", "being", "below", "between", "both", "could", "didn",
    "does", "doesn", "doing", "down", "during", "each", "even", "every", "from", "further",
    "have", "having", "here", "into", "just", "like", "made", "make", "many", "more",
    "most", "much", "must", "myself", "never", "only", "other", "ourselves", "over",
    "really", "same", "should", "some", "something", "still", "such", "than", "that",
    "their", "theirs", "them", "themselves", "then", "there", "these", "they", "thing",
    "things", "this", "those", "through", "today", "under", "until", "very", "want",
    "were", "what", "when", "where", "which", "while", "will", "with", "would", "your",
    "yours", "yourself",
];

fn is_hangul(c: char) -> bool {
    ('\u{AC00}'..='\u{D7A3}').contains(&c)
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || is_hangul(c)
}

/// Length in chars, not bytes, so Hangul is measured like Latin text.
fn long_enough(token: &str) -> bool {
    token.chars().count() > MIN_TOKEN_CHARS
}

fn title_case(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Default)]
struct Candidate {
    score: f64,
    first_seen: usize,
    capitalized: Option<String>,
}

/// Two most salient keywords joined by `" & "`, or [`MISCELLANEOUS`] when
/// nothing survives filtering. Never fails.
///
/// Each surviving token scores its frequency weighted toward earlier
/// positions: occurrence `i` of `total` adds `1 + (total - i) / total`.
pub fn fallback_label<S: AsRef<str>>(contents: &[S]) -> String {
    let joined = contents
        .iter()
        .map(|c| c.as_ref())
        .collect::<Vec<_>>()
        .join(" ");

    let tokens: Vec<&str> = joined
        .split(|c: char| !is_token_char(c))
        .filter(|t| !t.is_empty())
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .filter(|t| long_enough(t))
        .filter(|t| !STOP_WORDS.contains(&t.to_ascii_lowercase().as_str()))
        .collect();

    let total = tokens.len() as f64;
    let mut candidates: HashMap<String, Candidate> = HashMap::new();
    for (index, surface) in tokens.iter().enumerate() {
        let key = surface.to_ascii_lowercase();
        let next = candidates.len();
        let candidate = candidates.entry(key).or_insert_with(|| Candidate {
            first_seen: next,
            ..Candidate::default()
        });
        candidate.score += 1.0 + (total - index as f64) / total;
        if candidate.capitalized.is_none()
            && surface.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        {
            candidate.capitalized = Some((*surface).to_string());
        }
    }

    let mut ranked: Vec<(String, Candidate)> = candidates.into_iter().collect();
    ranked.sort_by(|(_, a), (_, b)| {
        b.score
            .total_cmp(&a.score)
            .then(a.first_seen.cmp(&b.first_seen))
    });

    let words: Vec<String> = ranked
        .into_iter()
        .take(2)
        .map(|(token, candidate)| candidate.capitalized.unwrap_or_else(|| title_case(&token)))
        .collect();

    if words.is_empty() {
        MISCELLANEOUS.to_string()
    } else {
        words.join(" & ")
    }
}
