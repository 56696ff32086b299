//! In-memory [`NodeStore`] implementation for tests and ephemeral runs.
//!
//! All state sits behind one `tokio::sync::RwLock`, so every upsert and
//! edge write is atomic with respect to concurrent readers.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{CatalogError, CatalogResult};
use crate::models::{Edge, Node, NodeKind};

use super::{validate_edge, validate_node, NodeStore};

#[derive(Default)]
struct Inner {
    nodes: HashMap<String, Node>,
    /// Node ids in first-insertion order.
    order: Vec<String>,
    /// Outgoing edges per source id, in first-insertion order.
    edges: HashMap<String, Vec<(String, f32)>>,
}

impl Inner {
    fn require_nodes(&self, a: &str, b: &str) -> CatalogResult<()> {
        for id in [a, b] {
            if !self.nodes.contains_key(id) {
                return Err(CatalogError::Validation(format!(
                    "edge endpoint {} is not in the store",
                    id
                )));
            }
        }
        Ok(())
    }

    fn put_edge(&mut self, source_id: &str, target_id: &str, weight: f32) {
        let out = self.edges.entry(source_id.to_string()).or_default();
        match out.iter_mut().find(|(t, _)| t == target_id) {
            Some(entry) => entry.1 = weight,
            None => out.push((target_id.to_string(), weight)),
        }
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NodeStore for InMemoryStore {
    async fn get_by_id(&self, id: &str) -> CatalogResult<Option<Node>> {
        Ok(self.inner.read().await.nodes.get(id).cloned())
    }

    async fn all_nodes(&self) -> CatalogResult<Vec<Node>> {
        let inner = self.inner.read().await;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.nodes.get(id).cloned())
            .collect())
    }

    async fn upsert(&self, mut node: Node) -> CatalogResult<Node> {
        validate_node(&node)?;
        let mut inner = self.inner.write().await;
        match inner.nodes.get(&node.id) {
            Some(existing) => node.created_at = existing.created_at,
            None => inner.order.push(node.id.clone()),
        }
        inner.nodes.insert(node.id.clone(), node.clone());
        Ok(node)
    }

    async fn add_edge(&self, source_id: &str, target_id: &str, weight: f32) -> CatalogResult<()> {
        validate_edge(source_id, target_id, weight)?;
        let mut inner = self.inner.write().await;
        inner.require_nodes(source_id, target_id)?;
        inner.put_edge(source_id, target_id, weight);
        Ok(())
    }

    async fn link(&self, a: &str, b: &str, weight: f32) -> CatalogResult<()> {
        validate_edge(a, b, weight)?;
        let mut inner = self.inner.write().await;
        inner.require_nodes(a, b)?;
        inner.put_edge(a, b, weight);
        inner.put_edge(b, a, weight);
        Ok(())
    }

    async fn unlink_all(&self, id: &str) -> CatalogResult<usize> {
        let mut inner = self.inner.write().await;
        let mut removed = inner.edges.remove(id).map_or(0, |out| out.len());
        for out in inner.edges.values_mut() {
            let before = out.len();
            out.retain(|(t, _)| t != id);
            removed += before - out.len();
        }
        Ok(removed)
    }

    async fn neighbors(&self, id: &str) -> CatalogResult<Vec<(Node, f32)>> {
        let inner = self.inner.read().await;
        let mut result: Vec<(Node, f32)> = inner
            .edges
            .get(id)
            .map(|out| {
                out.iter()
                    .filter_map(|(t, w)| inner.nodes.get(t).map(|n| (n.clone(), *w)))
                    .collect()
            })
            .unwrap_or_default();
        result.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(result)
    }

    async fn edges(&self) -> CatalogResult<Vec<Edge>> {
        let inner = self.inner.read().await;
        let mut result = Vec::new();
        for source in &inner.order {
            if let Some(out) = inner.edges.get(source) {
                for (target, weight) in out {
                    result.push(Edge {
                        source_id: source.clone(),
                        target_id: target.clone(),
                        weight: *weight,
                    });
                }
            }
        }
        Ok(result)
    }

    async fn count_by_kind(&self) -> CatalogResult<Vec<(NodeKind, usize)>> {
        let inner = self.inner.read().await;
        Ok(NodeKind::ALL
            .iter()
            .map(|k| (*k, inner.nodes.values().filter(|n| n.kind == *k).count()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::node;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_upsert_is_idempotent_and_keeps_created_at() {
        let store = InMemoryStore::new();
        let first = store
            .upsert(node(NodeKind::Paper, "https://arxiv.org/abs/2401.1v1", "A", vec![1.0, 0.0]))
            .await
            .unwrap();

        let mut second = node(NodeKind::Paper, "https://arxiv.org/abs/2401.1v2", "A v2", vec![0.0, 1.0]);
        second.created_at = Utc::now() + Duration::hours(1);
        let stored = store.upsert(second).await.unwrap();

        assert_eq!(stored.id, first.id);
        assert_eq!(stored.created_at, first.created_at);
        assert_eq!(stored.title, "A v2");
        assert_eq!(store.all_nodes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_by_source_canonicalizes() {
        let store = InMemoryStore::new();
        store
            .upsert(node(NodeKind::Repo, "https://github.com/a/b", "B", vec![1.0]))
            .await
            .unwrap();
        let hit = store
            .get_by_source(NodeKind::Repo, " https://github.com/a/b.git/tree/main ")
            .await
            .unwrap();
        assert!(hit.is_some());
        assert!(store
            .get_by_source(NodeKind::Paper, "https://github.com/a/b")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_add_edge_overwrites_and_neighbors_sorted() {
        let store = InMemoryStore::new();
        let a = store.upsert(node(NodeKind::Paper, "https://x.org/a", "A", vec![1.0])).await.unwrap();
        let b = store.upsert(node(NodeKind::Paper, "https://x.org/b", "B", vec![1.0])).await.unwrap();
        let c = store.upsert(node(NodeKind::Paper, "https://x.org/c", "C", vec![1.0])).await.unwrap();

        store.add_edge(&a.id, &b.id, 0.5).await.unwrap();
        store.add_edge(&a.id, &c.id, 0.7).await.unwrap();
        store.add_edge(&a.id, &b.id, 0.9).await.unwrap();

        let n = store.neighbors(&a.id).await.unwrap();
        assert_eq!(n.len(), 2);
        assert_eq!(n[0].0.id, b.id);
        assert!((n[0].1 - 0.9).abs() < 1e-6);
        assert_eq!(store.edges().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_add_edge_requires_known_endpoints() {
        let store = InMemoryStore::new();
        let a = store.upsert(node(NodeKind::Paper, "https://x.org/a", "A", vec![1.0])).await.unwrap();
        assert!(store.add_edge(&a.id, "paper_missing", 0.9).await.is_err());
    }

    #[tokio::test]
    async fn test_link_writes_both_directions_and_unlink_clears_them() {
        let store = InMemoryStore::new();
        let a = store.upsert(node(NodeKind::Paper, "https://x.org/a", "A", vec![1.0])).await.unwrap();
        let b = store.upsert(node(NodeKind::Paper, "https://x.org/b", "B", vec![1.0])).await.unwrap();
        let c = store.upsert(node(NodeKind::Paper, "https://x.org/c", "C", vec![1.0])).await.unwrap();

        store.link(&a.id, &b.id, 0.8).await.unwrap();
        store.link(&c.id, &b.id, 0.6).await.unwrap();
        assert_eq!(store.edges().await.unwrap().len(), 4);
        assert!((store.neighbors(&b.id).await.unwrap()[0].1 - 0.8).abs() < 1e-6);

        assert!(store.link(&a.id, "paper_missing", 0.9).await.is_err());
        assert_eq!(store.edges().await.unwrap().len(), 4);

        assert_eq!(store.unlink_all(&b.id).await.unwrap(), 4);
        assert!(store.edges().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_count_by_kind_includes_zero() {
        let store = InMemoryStore::new();
        store.upsert(node(NodeKind::Repo, "https://github.com/a/b", "B", vec![1.0])).await.unwrap();
        let counts = store.count_by_kind().await.unwrap();
        assert_eq!(counts, vec![(NodeKind::Paper, 0), (NodeKind::Repo, 1)]);
    }
}
