//! Storage abstraction for the catalog.
//!
//! The [`NodeStore`] trait owns node records and the directed adjacency
//! list that encodes the similarity graph. Two backends are provided:
//!
//! - [`memory::InMemoryStore`]: insertion-ordered, behind a single async
//!   `RwLock`; used by tests and ephemeral runs.
//! - [`sqlite::SqliteStore`]: persistent, via `sqlx`.
//!
//! Implementations must be `Send + Sync`: the two ingestion loops and any
//! direct API caller share one store instance.
//!
//! # Upsert semantics
//!
//! `upsert` is keyed by `id`, and `id` is derived from the canonical source
//! URL, so two concurrent ingestions of the same item converge on one
//! record (last write wins). `created_at` is kept from the first insertion.
//! A node whose `id` or `source_url` is not the canonical pair is rejected,
//! so no caller can slip a second record in under a different id.
//!
//! # Edge semantics
//!
//! The graph builder writes links with [`NodeStore::link`], which stores
//! both directions in one atomic step. Readers never observe half a link.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::canonical::{canonicalize, node_id};
use crate::error::{CatalogError, CatalogResult};
use crate::models::{Edge, Node, NodeKind};

/// Abstract node/edge storage.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_by_source`](NodeStore::get_by_source) | Dedup lookup by raw URL |
/// | [`get_by_id`](NodeStore::get_by_id) | Point lookup |
/// | [`all_nodes`](NodeStore::all_nodes) | Snapshot scan in stable order |
/// | [`upsert`](NodeStore::upsert) | Insert or replace by id |
/// | [`add_edge`](NodeStore::add_edge) | Insert or overwrite one directed edge |
/// | [`link`](NodeStore::link) | Write both directions of a link atomically |
/// | [`unlink_all`](NodeStore::unlink_all) | Drop every edge touching a node |
/// | [`neighbors`](NodeStore::neighbors) | Outgoing edges, strongest first |
/// | [`edges`](NodeStore::edges) | Full edge scan |
/// | [`count_by_kind`](NodeStore::count_by_kind) | Node counts per kind |
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Canonicalizes `raw_url` and looks the node up by `(kind, canonical)`.
    ///
    /// The default implementation resolves the deterministic id and defers
    /// to [`get_by_id`](NodeStore::get_by_id).
    async fn get_by_source(&self, kind: NodeKind, raw_url: &str) -> CatalogResult<Option<Node>> {
        self.get_by_id(&node_id(kind, raw_url)).await
    }

    async fn get_by_id(&self, id: &str) -> CatalogResult<Option<Node>>;

    /// Every node, in insertion order.
    async fn all_nodes(&self) -> CatalogResult<Vec<Node>>;

    /// Insert `node`, or replace the stored node with the same id.
    ///
    /// Returns the node as stored, carrying the original `created_at` when
    /// it replaced an existing record.
    async fn upsert(&self, node: Node) -> CatalogResult<Node>;

    /// Insert the directed edge, or overwrite its weight if present.
    async fn add_edge(&self, source_id: &str, target_id: &str, weight: f32) -> CatalogResult<()>;

    /// Insert or overwrite `a -> b` and `b -> a` with the same weight, as
    /// one atomic write.
    async fn link(&self, a: &str, b: &str, weight: f32) -> CatalogResult<()>;

    /// Remove every edge with `id` at either end. Returns the number of
    /// directed edges removed.
    async fn unlink_all(&self, id: &str) -> CatalogResult<usize>;

    /// Outgoing neighbors of `id`, sorted by weight descending.
    async fn neighbors(&self, id: &str) -> CatalogResult<Vec<(Node, f32)>>;

    async fn edges(&self) -> CatalogResult<Vec<Edge>>;

    /// Node counts in [`NodeKind::ALL`] order, zero counts included.
    async fn count_by_kind(&self) -> CatalogResult<Vec<(NodeKind, usize)>>;
}

/// Checks applied by every backend before a node is written.
pub(crate) fn validate_node(node: &Node) -> CatalogResult<()> {
    if node.id.trim().is_empty() {
        return Err(CatalogError::Validation("node id is empty".into()));
    }
    let canonical = canonicalize(node.kind, &node.source_url);
    if node.source_url != canonical {
        return Err(CatalogError::Validation(format!(
            "node {} source_url '{}' is not canonical (expected '{}')",
            node.id, node.source_url, canonical
        )));
    }
    let expected = node_id(node.kind, &canonical);
    if node.id != expected {
        return Err(CatalogError::Validation(format!(
            "node id '{}' does not match its source (expected '{}')",
            node.id, expected
        )));
    }
    if node.embedding.is_empty() {
        return Err(CatalogError::Validation(format!(
            "node {} has no embedding",
            node.id
        )));
    }
    if node.embedding.iter().any(|x| !x.is_finite()) {
        return Err(CatalogError::Validation(format!(
            "node {} has a non-finite embedding component",
            node.id
        )));
    }
    for (name, score) in [
        ("relevancy_score", node.relevancy_score),
        ("interestingness_score", node.interestingness_score),
    ] {
        if !(0.0..=10.0).contains(&score) {
            return Err(CatalogError::Validation(format!(
                "{} {} out of range [0, 10] for node {}",
                name, score, node.id
            )));
        }
    }
    Ok(())
}

pub(crate) fn validate_edge(source_id: &str, target_id: &str, weight: f32) -> CatalogResult<()> {
    if source_id == target_id {
        return Err(CatalogError::Validation(format!(
            "self edge on {}",
            source_id
        )));
    }
    if !weight.is_finite() {
        return Err(CatalogError::Validation(format!(
            "edge {} -> {} has non-finite weight",
            source_id, target_id
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;

    use crate::models::{Enrichment, Node, NodeKind, RawItem};

    /// A valid node for `url` with the given embedding.
    pub fn node(kind: NodeKind, url: &str, title: &str, embedding: Vec<f32>) -> Node {
        let raw = RawItem {
            title: title.to_string(),
            url: url.to_string(),
            raw_text: format!("{} abstract", title),
        };
        let enrichment = Enrichment {
            summary: format!("{} summary", title),
            tags: vec!["test".to_string()],
            questions_answered: Vec::new(),
            key_findings: vec!["finding".to_string()],
            relevancy: 7.0,
            interestingness: 6.0,
        };
        let mut node = Node::from_enrichment(kind, &raw, enrichment, embedding);
        node.created_at = Utc::now();
        node
    }
}
