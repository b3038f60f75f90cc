//! Name to node resolution.
//!
//! Matches free-text names against node titles. Exact matching is a case-insensitive equality
//! test; fuzzy matching scores candidates with the Dice coefficient over character bigrams.
//! Semantic matching needs an embedder and is handled by the sync engine; here it never matches.

use crate::properties::{MatchStrategy, ResolveOptions, ResolvedName};
use std::collections::HashMap;
use unicode_normalization::UnicodeNormalization;

/// A resolution candidate: node id and title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub id: String,
    pub title: String,
}

fn fold(text: &str) -> String {
    text.nfc().collect::<String>().to_lowercase()
}

fn bigrams(chars: &[char]) -> HashMap<(char, char), usize> {
    let mut counts = HashMap::new();
    for pair in chars.windows(2) {
        *counts.entry((pair[0], pair[1])).or_insert(0) += 1;
    }
    counts
}

/// Dice coefficient over character bigrams of the case-folded, whitespace-stripped inputs.
/// Identical inputs score 1; inputs shorter than two characters score 0 unless identical.
pub fn bigram_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = fold(a).chars().filter(|c| !c.is_whitespace()).collect();
    let b: Vec<char> = fold(b).chars().filter(|c| !c.is_whitespace()).collect();
    if a == b {
        return 1.0;
    }
    if a.len() < 2 || b.len() < 2 {
        return 0.0;
    }
    let mut left = bigrams(&a);
    let mut shared = 0usize;
    for pair in b.windows(2) {
        if let Some(count) = left.get_mut(&(pair[0], pair[1])) {
            if *count > 0 {
                *count -= 1;
                shared += 1;
            }
        }
    }
    (2 * shared) as f64 / (a.len() + b.len() - 2) as f64
}

/// Resolve each name in `names` against `candidates`. Output order matches input order.
///
/// Candidates are considered in ascending id order, so equal scores resolve to the smallest id.
pub fn resolve_names(
    names: &[String],
    candidates: &[Candidate],
    options: ResolveOptions,
) -> Vec<ResolvedName> {
    let mut sorted: Vec<&Candidate> = candidates.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));
    let folded: Vec<String> = sorted.iter().map(|c| fold(&c.title)).collect();

    names
        .iter()
        .map(|name| {
            let (id, score) = match options.strategy {
                MatchStrategy::Exact => {
                    let query = fold(name);
                    folded
                        .iter()
                        .position(|title| *title == query)
                        .map(|idx| (Some(sorted[idx].id.clone()), 1.0))
                        .unwrap_or((None, 0.0))
                }
                MatchStrategy::Fuzzy => {
                    let mut best: Option<(usize, f64)> = None;
                    for (idx, candidate) in sorted.iter().enumerate() {
                        let score = bigram_similarity(name, &candidate.title);
                        if best.map_or(true, |(_, s)| score > s) {
                            best = Some((idx, score));
                        }
                    }
                    match best {
                        Some((idx, score)) if score >= options.threshold => {
                            (Some(sorted[idx].id.clone()), score)
                        }
                        _ => (None, 0.0),
                    }
                }
                MatchStrategy::Semantic => (None, 0.0),
            };
            ResolvedName {
                query: name.clone(),
                id,
                score,
            }
        })
        .collect()
}
