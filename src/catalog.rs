//! The catalog facade handed to the API layer and the CLI.
//!
//! [`Catalog`] owns one explicitly constructed store, the similarity graph
//! builder, the ingestion orchestrator and the collaborators. There is no
//! process-wide instance; callers construct it and call
//! [`Catalog::shutdown`] when done.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;
use url::Url;

use crate::canonical::{canonicalize, node_id};
use crate::config::{Config, GraphConfig};
use crate::embedding::{create_embedder, Embedder};
use crate::enrich::{create_enricher, Enricher};
use crate::error::{CatalogError, CatalogResult};
use crate::feeds::{FeedSource, HttpFeed};
use crate::graph::GraphBuilder;
use crate::ingest::{AnalyzeOutcome, IngestOrchestrator, IterationReport, Pipeline};
use crate::models::{
    CatalogStats, GraphSnapshot, IngestEvent, IngestStatus, Node, NodeKind, RawItem, SearchHit,
};
use crate::search::{search_by_embedding, search_hybrid, TheoryReport};
use crate::store::sqlite::SqliteStore;
use crate::store::NodeStore;

/// The external services the catalog depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub feed: Arc<dyn FeedSource>,
    pub enricher: Arc<dyn Enricher>,
    pub embedder: Arc<dyn Embedder>,
}

impl Collaborators {
    /// Build the collaborators named in `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            feed: Arc::new(HttpFeed::new(config.ingest.clone())?),
            enricher: create_enricher(&config.llm)?,
            embedder: create_embedder(&config.embedding)?,
        })
    }
}

pub struct Catalog {
    store: Arc<dyn NodeStore>,
    graph: Arc<GraphBuilder>,
    orchestrator: IngestOrchestrator,
    embedder: Arc<dyn Embedder>,
}

impl Catalog {
    /// Open the SQLite catalog and the collaborators described by `config`.
    pub async fn open(config: &Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(&config.db.path).await?);
        let collaborators = Collaborators::from_config(config)?;
        Ok(Self::new(store, collaborators, config))
    }

    pub fn new(store: Arc<dyn NodeStore>, collaborators: Collaborators, config: &Config) -> Self {
        Self::from_parts(
            store,
            collaborators,
            &config.graph,
            config.ingest.papers.poll_interval(),
            config.ingest.repos.poll_interval(),
        )
    }

    pub fn from_parts(
        store: Arc<dyn NodeStore>,
        collaborators: Collaborators,
        graph: &GraphConfig,
        papers_interval: Duration,
        repos_interval: Duration,
    ) -> Self {
        let graph = Arc::new(GraphBuilder::new(
            Arc::clone(&store),
            graph.similarity_threshold,
            graph.max_neighbors,
        ));
        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&store),
            Arc::clone(&graph),
            collaborators.feed,
            collaborators.enricher,
            Arc::clone(&collaborators.embedder),
        ));
        Self {
            store,
            graph,
            orchestrator: IngestOrchestrator::with_intervals(
                pipeline,
                papers_interval,
                repos_interval,
            ),
            embedder: collaborators.embedder,
        }
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    // ============ Ingestion ============

    pub async fn start(&self, kind: NodeKind) -> IngestStatus {
        self.orchestrator.start(kind).await
    }

    pub async fn stop(&self, kind: NodeKind) -> IngestStatus {
        self.orchestrator.stop(kind).await
    }

    pub fn status(&self, kind: NodeKind) -> IngestStatus {
        self.orchestrator.status(kind)
    }

    pub fn statuses(&self) -> Vec<IngestStatus> {
        self.orchestrator.statuses()
    }

    pub fn history(&self, limit: usize) -> Vec<IngestEvent> {
        self.orchestrator.history(limit)
    }

    pub async fn run_once(&self, kind: NodeKind) -> CatalogResult<IterationReport> {
        self.orchestrator.run_once(kind).await
    }

    pub async fn analyze_one(&self, kind: NodeKind, raw: RawItem) -> CatalogResult<AnalyzeOutcome> {
        self.orchestrator.analyze_one(kind, raw).await
    }

    /// Analyze a user-supplied link, inferring its kind from the host.
    pub async fn analyze_link(
        &self,
        url: &str,
        title: Option<String>,
        text: Option<String>,
    ) -> CatalogResult<AnalyzeOutcome> {
        let kind = infer_kind(url)?;
        let raw = RawItem {
            title: title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| url.trim().to_string()),
            url: url.trim().to_string(),
            raw_text: text.unwrap_or_default(),
        };
        self.analyze_one(kind, raw).await
    }

    /// Store a fully built node and link it into the graph.
    ///
    /// For library callers that enrich and embed on their own; ingestion
    /// and [`Catalog::analyze_link`] build nodes through the pipeline.
    /// `source_url` is canonicalized and `id` re-derived from it before
    /// the write, so whatever id the caller set, a second upsert of the
    /// same item (under any URL variant) replaces the first record.
    pub async fn upsert(&self, mut node: Node) -> CatalogResult<Node> {
        node.source_url = canonicalize(node.kind, &node.source_url);
        node.id = node_id(node.kind, &node.source_url);
        let stored = self.store.upsert(node).await?;
        self.graph.connect_similar(&stored).await?;
        Ok(stored)
    }

    // ============ Retrieval ============

    pub async fn search(
        &self,
        query: &[f32],
        limit: usize,
        kind: Option<NodeKind>,
    ) -> CatalogResult<Vec<SearchHit>> {
        search_by_embedding(self.store.as_ref(), query, limit, kind).await
    }

    /// Hybrid free-text search. Falls back to lexical ranking when the
    /// query cannot be embedded.
    pub async fn search_text(
        &self,
        text: &str,
        limit: usize,
        kind: Option<NodeKind>,
    ) -> CatalogResult<Vec<SearchHit>> {
        if text.trim().is_empty() {
            return Err(CatalogError::Validation("search query is empty".into()));
        }
        let query_vector = match self.embedder.embed(text).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, "Query embedding failed, ranking lexically");
                None
            }
        };
        search_hybrid(self.store.as_ref(), text, query_vector.as_deref(), limit, kind).await
    }

    pub async fn theory(&self, theory: &str, limit: usize) -> CatalogResult<TheoryReport> {
        let hits = self.search_text(theory, limit, None).await?;
        Ok(TheoryReport::from_hits(theory, hits))
    }

    /// The node with `id`, or [`CatalogError::NotFound`].
    pub async fn get(&self, id: &str) -> CatalogResult<Node> {
        self.store
            .get_by_id(id)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("item {}", id)))
    }

    pub async fn neighbors(&self, id: &str) -> CatalogResult<Vec<(Node, f32)>> {
        self.get(id).await?;
        self.store.neighbors(id).await
    }

    pub async fn list(&self, kind: Option<NodeKind>, limit: usize) -> CatalogResult<Vec<Node>> {
        Ok(self
            .store
            .all_nodes()
            .await?
            .into_iter()
            .filter(|n| kind.map_or(true, |k| n.kind == k))
            .take(limit)
            .collect())
    }

    pub async fn graph_snapshot(&self, limit: usize) -> CatalogResult<GraphSnapshot> {
        self.graph.snapshot(limit).await
    }

    pub async fn stats(&self) -> CatalogResult<CatalogStats> {
        let counts = self.store.count_by_kind().await?;
        let count_of = |kind: NodeKind| {
            counts
                .iter()
                .find(|(k, _)| *k == kind)
                .map_or(0, |(_, c)| *c)
        };

        let nodes = self.store.all_nodes().await?;
        let total = nodes.len();
        let avg = |f: fn(&Node) -> f64| {
            if total == 0 {
                0.0
            } else {
                round2(nodes.iter().map(f).sum::<f64>() / total as f64)
            }
        };

        Ok(CatalogStats {
            total,
            papers: count_of(NodeKind::Paper),
            repos: count_of(NodeKind::Repo),
            edges: self.store.edges().await?.len() / 2,
            avg_relevancy: avg(|n| n.relevancy_score),
            avg_interestingness: avg(|n| n.interestingness_score),
            last_ingested: nodes.iter().map(|n| n.created_at).max(),
        })
    }

    /// Stop both ingestion loops.
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
    }
}

/// `repo` for GitHub links, `paper` for everything else.
pub fn infer_kind(url: &str) -> CatalogResult<NodeKind> {
    let parsed = Url::parse(url.trim())
        .map_err(|e| CatalogError::Validation(format!("invalid url '{}': {}", url.trim(), e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(CatalogError::Validation(format!(
            "unsupported url scheme '{}'",
            parsed.scheme()
        )));
    }
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    if host == "github.com" || host == "www.github.com" {
        Ok(NodeKind::Repo)
    } else {
        Ok(NodeKind::Paper)
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
