//! Similarity graph builder.
//!
//! Materializes capped nearest-neighbor links between nodes. Each link is
//! stored as two directed edges of equal weight, so neighbor lookups work
//! from either end without a reverse index.
//!
//! # Algorithm
//!
//! For a node `n` carrying an embedding:
//!
//! 1. Compute [`cosine`] against every other stored node. Undefined
//!    comparisons (zero norm, mismatched length) are dropped.
//! 2. Stable-sort by similarity descending, so equal scores keep store order.
//! 3. Keep candidates with similarity ≥ `threshold`, then the first
//!    `max_neighbors` of those.
//! 4. Drop every edge already touching `n`, then write `n → m` and `m → n`
//!    with the same weight as one atomic [`NodeStore::link`].
//!
//! Step 4's reset means relinking a node whose embedding changed leaves no
//! stale weights behind, and `n` never holds more than `max_neighbors`
//! links of its own choosing. Links that other nodes chose to `n` are
//! dropped with it; they come back when those nodes are relinked.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::embedding::cosine;
use crate::error::{CatalogError, CatalogResult};
use crate::models::{Edge, GraphEdge, GraphNode, GraphSnapshot, Node};
use crate::store::NodeStore;

pub struct GraphBuilder {
    store: Arc<dyn NodeStore>,
    threshold: f32,
    max_neighbors: usize,
}

impl GraphBuilder {
    pub fn new(store: Arc<dyn NodeStore>, threshold: f32, max_neighbors: usize) -> Self {
        Self {
            store,
            threshold,
            max_neighbors,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn max_neighbors(&self) -> usize {
        self.max_neighbors
    }

    /// Link `node` to its strongest neighbors above the threshold.
    ///
    /// Replaces any links `node` already had. Returns the outgoing edges
    /// written from `node`; the mirrored edges are written too but not
    /// returned.
    pub async fn connect_similar(&self, node: &Node) -> CatalogResult<Vec<Edge>> {
        if node.embedding.is_empty() {
            return Err(CatalogError::Validation(format!(
                "node {} has no embedding to compare",
                node.id
            )));
        }

        let others = self.store.all_nodes().await?;
        let selected = select_neighbors(node, &others, self.threshold, self.max_neighbors);

        let dropped = self.store.unlink_all(&node.id).await?;

        let mut written = Vec::with_capacity(selected.len());
        for (other_id, weight) in selected {
            self.store.link(&node.id, &other_id, weight).await?;
            written.push(Edge {
                source_id: node.id.clone(),
                target_id: other_id,
                weight,
            });
        }

        debug!(node_id = %node.id, dropped, edges = written.len(), "Linked similar nodes");
        Ok(written)
    }

    /// Up to `limit` nodes in store order plus the links among them.
    ///
    /// Each undirected link appears once, with `source < target`.
    pub async fn snapshot(&self, limit: usize) -> CatalogResult<GraphSnapshot> {
        let nodes: Vec<Node> = self.store.all_nodes().await?.into_iter().take(limit).collect();
        let ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();

        let mut edges = Vec::new();
        for edge in self.store.edges().await? {
            if edge.source_id < edge.target_id
                && ids.contains(edge.source_id.as_str())
                && ids.contains(edge.target_id.as_str())
            {
                edges.push(GraphEdge {
                    source: edge.source_id,
                    target: edge.target_id,
                    weight: edge.weight,
                });
            }
        }

        let nodes = nodes
            .iter()
            .map(|n| GraphNode {
                id: n.id.clone(),
                title: n.title.clone(),
                kind: n.kind,
                score: n.combined_score(),
            })
            .collect();

        Ok(GraphSnapshot { nodes, edges })
    }
}

/// Pick the neighbors `node` should link to, strongest first.
pub fn select_neighbors(
    node: &Node,
    candidates: &[Node],
    threshold: f32,
    max_neighbors: usize,
) -> Vec<(String, f32)> {
    let mut scored: Vec<(String, f32)> = candidates
        .iter()
        .filter(|other| other.id != node.id)
        .filter_map(|other| {
            cosine(&node.embedding, &other.embedding).map(|sim| (other.id.clone(), sim))
        })
        .collect();

    // sort_by is stable: ties keep first-encountered order
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));

    scored
        .into_iter()
        .filter(|(_, sim)| *sim >= threshold)
        .take(max_neighbors)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeKind;
    use crate::store::memory::InMemoryStore;
    use crate::store::test_support::node;

    fn builder(store: Arc<InMemoryStore>, threshold: f32, max: usize) -> GraphBuilder {
        GraphBuilder::new(store, threshold, max)
    }

    #[tokio::test]
    async fn test_connect_similar_threshold_scenario() {
        // cos(A,B) = 0.9, cos(A,C) = 0.3
        let store = Arc::new(InMemoryStore::new());
        let a = node(NodeKind::Paper, "https://x.org/a", "A", vec![1.0, 0.0]);
        let b = node(NodeKind::Paper, "https://x.org/b", "B", vec![0.9, (1.0f32 - 0.81).sqrt()]);
        let c = node(NodeKind::Paper, "https://x.org/c", "C", vec![0.3, (1.0f32 - 0.09).sqrt()]);
        for n in [&a, &b, &c] {
            store.upsert(n.clone()).await.unwrap();
        }

        let g = builder(store.clone(), 0.5, 5);
        let edges = g.connect_similar(&a).await.unwrap();

        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target_id, b.id);
        assert!((edges[0].weight - 0.9).abs() < 1e-5);

        let back = store.neighbors(&b.id).await.unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].0.id, a.id);
        assert_eq!(back[0].1, edges[0].weight);
        assert!(store.neighbors(&c.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connect_similar_respects_cap_and_tie_order() {
        let store = Arc::new(InMemoryStore::new());
        let a = node(NodeKind::Paper, "https://x.org/a", "A", vec![1.0, 0.0]);
        store.upsert(a.clone()).await.unwrap();
        let mut ids = Vec::new();
        for i in 0..5 {
            let n = node(NodeKind::Repo, &format!("https://x.org/r{}", i), "R", vec![2.0, 0.0]);
            ids.push(n.id.clone());
            store.upsert(n).await.unwrap();
        }

        let g = builder(store.clone(), 0.5, 3);
        let edges = g.connect_similar(&a).await.unwrap();
        let targets: Vec<String> = edges.into_iter().map(|e| e.target_id).collect();
        assert_eq!(targets, ids[..3].to_vec());
        assert_eq!(store.neighbors(&a.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_relink_replaces_stale_edges() {
        let store = Arc::new(InMemoryStore::new());
        let a = node(NodeKind::Paper, "https://x.org/a", "A", vec![1.0, 0.0]);
        let b = node(NodeKind::Paper, "https://x.org/b", "B", vec![1.0, 0.1]);
        let c = node(NodeKind::Paper, "https://x.org/c", "C", vec![0.0, 1.0]);
        for n in [&a, &b, &c] {
            store.upsert(n.clone()).await.unwrap();
        }
        let g = builder(store.clone(), 0.5, 5);
        g.connect_similar(&a).await.unwrap();
        assert_eq!(store.neighbors(&a.id).await.unwrap()[0].0.id, b.id);

        // A's embedding moves next to C.
        let mut moved = a.clone();
        moved.embedding = vec![0.1, 1.0];
        let moved = store.upsert(moved).await.unwrap();
        let edges = g.connect_similar(&moved).await.unwrap();

        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target_id, c.id);
        assert!(store.neighbors(&b.id).await.unwrap().is_empty());
        assert_eq!(store.edges().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_zero_vector_is_excluded() {
        let store = Arc::new(InMemoryStore::new());
        let a = node(NodeKind::Paper, "https://x.org/a", "A", vec![1.0, 0.0]);
        let z = node(NodeKind::Paper, "https://x.org/z", "Z", vec![0.0, 0.0]);
        store.upsert(a.clone()).await.unwrap();
        store.upsert(z.clone()).await.unwrap();

        let g = builder(store.clone(), -1.0, 5);
        assert!(g.connect_similar(&a).await.unwrap().is_empty());
        assert!(g.connect_similar(&z).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_reports_each_pair_once_within_limit() {
        let store = Arc::new(InMemoryStore::new());
        let a = node(NodeKind::Paper, "https://x.org/a", "A", vec![1.0, 0.0]);
        let b = node(NodeKind::Paper, "https://x.org/b", "B", vec![1.0, 0.1]);
        let c = node(NodeKind::Paper, "https://x.org/c", "C", vec![1.0, 0.2]);
        for n in [&a, &b, &c] {
            store.upsert(n.clone()).await.unwrap();
        }
        let g = builder(store.clone(), 0.5, 5);
        for n in [&a, &b, &c] {
            g.connect_similar(n).await.unwrap();
        }

        let full = g.snapshot(10).await.unwrap();
        assert_eq!(full.nodes.len(), 3);
        assert_eq!(full.edges.len(), 3);
        assert!(full.edges.iter().all(|e| e.source < e.target));

        let partial = g.snapshot(2).await.unwrap();
        assert_eq!(partial.nodes.len(), 2);
        assert_eq!(partial.edges.len(), 1);
    }
}
