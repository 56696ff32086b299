//! Core data models used throughout the catalog.
//!
//! These types represent the catalogued items, the similarity edges between
//! them, and the per-source ingestion status that flow through the
//! ingestion and retrieval pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::{canonicalize, node_id};

/// The two kinds of catalogued item.
///
/// Canonicalization, feed selection and enrichment prompts are all chosen
/// by a single match on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Paper,
    Repo,
}

impl NodeKind {
    pub const ALL: [NodeKind; 2] = [NodeKind::Paper, NodeKind::Repo];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Paper => "paper",
            NodeKind::Repo => "repo",
        }
    }

    /// Name of the ingestion source feeding this kind (`"papers"` / `"repos"`).
    pub fn source_name(&self) -> &'static str {
        match self {
            NodeKind::Paper => "papers",
            NodeKind::Repo => "repos",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paper" | "papers" => Ok(NodeKind::Paper),
            "repo" | "repos" | "repository" | "repositories" => Ok(NodeKind::Repo),
            other => Err(format!(
                "unknown kind '{}': expected paper(s) or repo(s)",
                other
            )),
        }
    }
}

/// Raw item produced by a feed before enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItem {
    pub title: String,
    pub url: String,
    /// Abstract, description or README excerpt handed to the enricher.
    pub raw_text: String,
}

/// Derived metadata returned by the enrichment collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Enrichment {
    pub summary: String,
    pub tags: Vec<String>,
    pub questions_answered: Vec<String>,
    pub key_findings: Vec<String>,
    pub relevancy: f64,
    pub interestingness: f64,
}

/// One catalogued item.
///
/// `id` is derived from `(kind, canonical source_url)` and is stable
/// across re-ingestion. `created_at` is set on first insertion; the store
/// keeps the original value on every later upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub title: String,
    pub source_url: String,
    #[serde(default, rename = "abstract")]
    pub abstract_text: Option<String>,
    pub summary: String,
    pub tags: Vec<String>,
    #[serde(default)]
    pub questions_answered: Vec<String>,
    pub key_findings: Vec<String>,
    pub relevancy_score: f64,
    pub interestingness_score: f64,
    /// Embedding of `"{title}\n{summary}"`. Empty only before enrichment.
    #[serde(default, skip_serializing)]
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl Node {
    /// Build a node from a raw item and its enrichment.
    ///
    /// The URL is canonicalized and the id derived from it, so two raw
    /// URLs naming the same item always produce the same id.
    pub fn from_enrichment(
        kind: NodeKind,
        raw: &RawItem,
        enrichment: Enrichment,
        embedding: Vec<f32>,
    ) -> Self {
        let source_url = canonicalize(kind, &raw.url);
        Self {
            id: node_id(kind, &source_url),
            kind,
            title: raw.title.trim().to_string(),
            source_url,
            abstract_text: if raw.raw_text.trim().is_empty() {
                None
            } else {
                Some(raw.raw_text.clone())
            },
            summary: enrichment.summary,
            tags: enrichment.tags,
            questions_answered: enrichment.questions_answered,
            key_findings: enrichment.key_findings,
            relevancy_score: enrichment.relevancy,
            interestingness_score: enrichment.interestingness,
            embedding,
            created_at: Utc::now(),
        }
    }

    /// Text fed to the embedder for this node.
    pub fn embedding_text(&self) -> String {
        format!("{}\n{}", self.title, self.summary)
    }

    /// Mean of the two contractual scores, used for graph node sizing.
    pub fn combined_score(&self) -> f64 {
        (self.relevancy_score + self.interestingness_score) / 2.0
    }
}

/// A directed similarity link. Stored in symmetric pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source_id: String,
    pub target_id: String,
    pub weight: f32,
}

/// Run/error state of one source's polling loop.
#[derive(Debug, Clone, Serialize)]
pub struct IngestStatus {
    pub kind: NodeKind,
    pub running: bool,
    pub last_error: Option<String>,
    pub last_message: Option<String>,
    /// Nodes upserted since the loop was last started.
    pub processed: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl IngestStatus {
    pub fn idle(kind: NodeKind) -> Self {
        Self {
            kind,
            running: false,
            last_error: None,
            last_message: None,
            processed: 0,
            updated_at: None,
        }
    }
}

/// One entry of the ingestion history log.
#[derive(Debug, Clone, Serialize)]
pub struct IngestEvent {
    pub kind: NodeKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// A ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub node: Node,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub title: String,
    pub kind: NodeKind,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub weight: f32,
}

/// Nodes and edges for visualization.
#[derive(Debug, Clone, Serialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Dashboard counters.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogStats {
    pub total: usize,
    pub papers: usize,
    pub repos: usize,
    pub edges: usize,
    pub avg_relevancy: f64,
    pub avg_interestingness: f64,
    pub last_ingested: Option<DateTime<Utc>>,
}
