// SPDX-License-Identifier: MIT OR Apache-2.0
//! Capability Router (C10, spec §4.9): free-text query to pattern id.
//!
//! Both matchers are pure functions of a `&[RouteEntry]` pattern index (built
//! by the Pattern Loader, spec C6) plus the query string. Neither ever falls
//! back to a default pattern on failure: a non-match is always surfaced as
//! [`RouterError::NoMatch`] or [`RouterError::UnresolvedIntent`], never
//! silently routed.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::BTreeSet;

use serde::Serialize;

/// The slice of a loaded pattern the router needs to score it against a
/// query. Built once by the Pattern Loader and handed to a matcher; the
/// router never reads pattern bodies.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    /// Pattern id this entry represents.
    pub pattern_id: String,
    /// Free-text tags declared on the pattern.
    pub tags: BTreeSet<String>,
    /// Category label(s) declared on the pattern.
    pub categories: BTreeSet<String>,
    /// Human-readable description, tokenized for keyword scoring.
    pub description: String,
    /// Optional precomputed embedding for the description, used only by
    /// [`EmbeddingRouter`].
    pub embedding: Option<Vec<f32>>,
}

/// A resolved routing decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteMatch {
    /// Winning pattern id.
    pub pattern_id: String,
    /// Matcher-specific confidence score (not comparable across matchers).
    pub score: f64,
}

/// Errors the router surfaces (spec §4.9, §7: `UnresolvedIntent`).
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RouterError {
    /// No pattern scored at or above the matcher's threshold.
    #[error("no pattern matched query {query:?} (best score {best_score:.3})")]
    NoMatch {
        /// The query that failed to match.
        query: String,
        /// Highest score seen among candidates, for diagnostics.
        best_score: f64,
    },
    /// The pattern index was empty; there was nothing to match against.
    #[error("pattern index is empty, cannot resolve intent")]
    EmptyIndex,
}

fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Baseline deterministic matcher: scores each pattern by the overlap
/// between tokenized query terms and the union of its tags, categories, and
/// tokenized description.
pub struct KeywordRouter {
    /// Minimum overlap score (0..=1) required to return a match.
    pub threshold: f64,
}

impl Default for KeywordRouter {
    fn default() -> Self {
        Self { threshold: 0.2 }
    }
}

impl KeywordRouter {
    /// Construct a matcher with an explicit threshold.
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Score `query` against every entry in `index`, returning the top match
    /// if it clears the threshold.
    pub fn route(&self, index: &[RouteEntry], query: &str) -> Result<RouteMatch, RouterError> {
        if index.is_empty() {
            return Err(RouterError::EmptyIndex);
        }
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Err(RouterError::NoMatch {
                query: query.to_string(),
                best_score: 0.0,
            });
        }

        let mut best: Option<RouteMatch> = None;
        for entry in index {
            let mut corpus: BTreeSet<String> = entry.tags.clone();
            corpus.extend(entry.categories.clone());
            corpus.extend(tokenize(&entry.description));

            let overlap = query_tokens.intersection(&corpus).count();
            let score = overlap as f64 / query_tokens.len() as f64;

            if best.as_ref().map(|b| score > b.score).unwrap_or(true) {
                best = Some(RouteMatch {
                    pattern_id: entry.pattern_id.clone(),
                    score,
                });
            }
        }

        match best {
            Some(m) if m.score >= self.threshold => Ok(m),
            Some(m) => Err(RouterError::NoMatch {
                query: query.to_string(),
                best_score: m.score,
            }),
            None => Err(RouterError::NoMatch {
                query: query.to_string(),
                best_score: 0.0,
            }),
        }
    }
}

/// Optional matcher: picks the pattern whose description embedding is
/// closest (cosine similarity) to the query embedding. Vectors are supplied
/// by the caller; this crate embeds no ML runtime.
pub struct EmbeddingRouter {
    /// Minimum cosine similarity required to return a match.
    pub min_similarity: f64,
}

impl Default for EmbeddingRouter {
    fn default() -> Self {
        Self { min_similarity: 0.75 }
    }
}

impl EmbeddingRouter {
    /// Construct a matcher with an explicit similarity floor.
    pub fn new(min_similarity: f64) -> Self {
        Self { min_similarity }
    }

    /// Score `query_embedding` against every entry in `index` that carries
    /// an embedding, returning the closest match above the floor.
    pub fn route(&self, index: &[RouteEntry], query_embedding: &[f32]) -> Result<RouteMatch, RouterError> {
        let candidates: Vec<&RouteEntry> = index.iter().filter(|e| e.embedding.is_some()).collect();
        if candidates.is_empty() {
            return Err(RouterError::EmptyIndex);
        }

        let mut best: Option<RouteMatch> = None;
        for entry in candidates {
            let embedding = entry.embedding.as_ref().expect("filtered to Some above");
            let score = cosine_similarity(query_embedding, embedding);
            if best.as_ref().map(|b| score > b.score).unwrap_or(true) {
                best = Some(RouteMatch {
                    pattern_id: entry.pattern_id.clone(),
                    score,
                });
            }
        }

        match best {
            Some(m) if m.score >= self.min_similarity => Ok(m),
            Some(m) => Err(RouterError::NoMatch {
                query: "<embedding>".to_string(),
                best_score: m.score,
            }),
            None => Err(RouterError::EmptyIndex),
        }
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| *x as f64 * *x as f64).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|y| *y as f64 * *y as f64).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
