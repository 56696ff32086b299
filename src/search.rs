//! Ranked retrieval over the embedding space.
//!
//! Two modes:
//!
//! - **Vector** ([`search_by_embedding`]): cosine similarity of each node's
//!   embedding against the query vector. Undefined comparisons (zero norm,
//!   dimension mismatch) are dropped rather than ranked.
//! - **Hybrid** ([`search_hybrid`]): a bounded lexical score blended with
//!   the vector score:
//!
//! ```text
//! hybrid = LEXICAL_WEIGHT × lexical + VECTOR_WEIGHT × vector
//! ```
//!
//! The blend weights are fixed constants, not configuration.
//!
//! Both modes scan every node (O(n)) and sort with a stable sort, so equal
//! scores keep store order and results are reproducible for a given
//! snapshot.

use serde::Serialize;

use crate::embedding::cosine;
use crate::error::{CatalogError, CatalogResult};
use crate::models::{Node, NodeKind, SearchHit};
use crate::store::NodeStore;

pub const LEXICAL_WEIGHT: f32 = 0.4;
pub const VECTOR_WEIGHT: f32 = 0.6;

/// Relevancy at or above which a theory hit counts as supporting evidence.
pub const SUPPORT_THRESHOLD: f64 = 5.5;

/// Rank stored nodes by cosine similarity to `query`.
///
/// # Errors
///
/// [`CatalogError::Validation`] for an empty query vector or a zero limit.
pub async fn search_by_embedding(
    store: &dyn NodeStore,
    query: &[f32],
    limit: usize,
    kind: Option<NodeKind>,
) -> CatalogResult<Vec<SearchHit>> {
    if query.is_empty() {
        return Err(CatalogError::Validation("query embedding is empty".into()));
    }
    check_limit(limit)?;

    let nodes = store.all_nodes().await?;
    Ok(rank_by_embedding(nodes, query, limit, kind))
}

/// Pure ranking step of [`search_by_embedding`].
pub fn rank_by_embedding(
    nodes: Vec<Node>,
    query: &[f32],
    limit: usize,
    kind: Option<NodeKind>,
) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = nodes
        .into_iter()
        .filter(|n| kind.map_or(true, |k| n.kind == k))
        .filter_map(|n| cosine(query, &n.embedding).map(|score| SearchHit { node: n, score }))
        .collect();

    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(limit);
    hits
}

/// Free-text search blending lexical and vector scores.
///
/// `query_vector` is the embedding of `text`; pass `None` when embeddings
/// are disabled and ranking falls back to the lexical part alone.
pub async fn search_hybrid(
    store: &dyn NodeStore,
    text: &str,
    query_vector: Option<&[f32]>,
    limit: usize,
    kind: Option<NodeKind>,
) -> CatalogResult<Vec<SearchHit>> {
    if text.trim().is_empty() {
        return Err(CatalogError::Validation("search query is empty".into()));
    }
    check_limit(limit)?;

    let nodes = store.all_nodes().await?;
    let mut hits: Vec<SearchHit> = nodes
        .into_iter()
        .filter(|n| kind.map_or(true, |k| n.kind == k))
        .map(|n| {
            let lexical = lexical_score(text, &n);
            let vector = query_vector
                .and_then(|q| cosine(q, &n.embedding))
                .unwrap_or(0.0);
            SearchHit {
                score: LEXICAL_WEIGHT * lexical + VECTOR_WEIGHT * vector,
                node: n,
            }
        })
        .collect();

    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(limit);
    Ok(hits)
}

/// Bounded substring-density score in `[0, 1]`.
///
/// Counts non-overlapping occurrences of the lowercased query in the
/// lowercased title, abstract, summary and tags, scaled by 80 per
/// character of haystack. A query equal to one of the node's tags scores
/// at least 0.5.
pub fn lexical_score(query: &str, node: &Node) -> f32 {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return 0.0;
    }

    let haystack = [
        node.title.as_str(),
        node.abstract_text.as_deref().unwrap_or(""),
        node.summary.as_str(),
        &node.tags.join(" "),
    ]
    .join(" ")
    .to_lowercase();

    let occurrences = haystack.matches(q.as_str()).count() as f32;
    let len = haystack.chars().count().max(1) as f32;
    let mut score = (occurrences / len * 80.0).min(1.0);

    if node.tags.iter().any(|t| t.trim().to_lowercase() == q) {
        score = score.max(0.5);
    }
    score
}

/// Hits for a free-text theory, split by how strongly each item is rated.
#[derive(Debug, Clone, Serialize)]
pub struct TheoryReport {
    pub theory: String,
    pub support: Vec<SearchHit>,
    pub oppose: Vec<SearchHit>,
    pub suggestions: Vec<String>,
}

impl TheoryReport {
    pub fn from_hits(theory: &str, hits: Vec<SearchHit>) -> Self {
        let suggestions = if hits.is_empty() {
            vec![
                "Broaden the scope or start ingestion to gather more items.".to_string(),
                format!(
                    "Try related phrasing such as '{} in practice' or 'real-world evidence about {}'.",
                    theory, theory
                ),
            ]
        } else {
            vec![
                "Look for contrasting methods in adjacent subfields.".to_string(),
                "Search for recent replications or benchmarks.".to_string(),
            ]
        };

        let (support, oppose): (Vec<SearchHit>, Vec<SearchHit>) = hits
            .into_iter()
            .partition(|h| h.node.relevancy_score >= SUPPORT_THRESHOLD);

        Self {
            theory: theory.to_string(),
            support,
            oppose,
            suggestions,
        }
    }
}

fn check_limit(limit: usize) -> CatalogResult<()> {
    if limit == 0 {
        return Err(CatalogError::Validation("limit must be >= 1".into()));
    }
    Ok(())
}
