use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::NodeKind;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Similarity graph parameters.
///
/// Deployments have used thresholds anywhere from 0.45 to 0.8, so neither
/// value is hard-coded.
#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_max_neighbors")]
    pub max_neighbors: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            max_neighbors: default_max_neighbors(),
        }
    }
}

fn default_similarity_threshold() -> f32 {
    0.45
}
fn default_max_neighbors() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: Some(default_hash_dims()),
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_hash_dims() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            base_url: default_llm_base_url(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_provider() -> String {
    "heuristic".to_string()
}
fn default_llm_model() -> String {
    "gpt-4.1-mini".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_papers_source")]
    pub papers: SourceConfig,
    #[serde(default = "default_repos_source")]
    pub repos: SourceConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            papers: default_papers_source(),
            repos: default_repos_source(),
        }
    }
}

impl IngestConfig {
    pub fn source(&self, kind: NodeKind) -> &SourceConfig {
        match kind {
            NodeKind::Paper => &self.papers,
            NodeKind::Repo => &self.repos,
        }
    }
}

/// Polling parameters for one external feed.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub query: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Override of the upstream API base URL (tests, mirrors).
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl SourceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn default_papers_source() -> SourceConfig {
    SourceConfig {
        query: "cat:cs.AI".to_string(),
        batch_size: default_batch_size(),
        poll_interval_secs: default_poll_interval_secs(),
        endpoint: None,
    }
}
fn default_repos_source() -> SourceConfig {
    SourceConfig {
        query: "topic:llm".to_string(),
        batch_size: default_batch_size(),
        poll_interval_secs: default_poll_interval_secs(),
        endpoint: None,
    }
}
fn default_batch_size() -> usize {
    6
}
fn default_poll_interval_secs() -> u64 {
    900
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

impl Config {
    /// Defaults for every section, with the database at `db_path`.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            graph: GraphConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            ingest: IngestConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate graph
    if !(-1.0..=1.0).contains(&config.graph.similarity_threshold) {
        anyhow::bail!("graph.similarity_threshold must be in [-1.0, 1.0]");
    }
    if config.graph.max_neighbors == 0 {
        anyhow::bail!("graph.max_neighbors must be >= 1");
    }

    // Validate ingestion sources
    for kind in NodeKind::ALL {
        let source = config.ingest.source(kind);
        if source.batch_size == 0 {
            anyhow::bail!("ingest.{}.batch_size must be >= 1", kind.source_name());
        }
        if source.poll_interval_secs == 0 {
            anyhow::bail!(
                "ingest.{}.poll_interval_secs must be >= 1",
                kind.source_name()
            );
        }
        if source.query.trim().is_empty() {
            anyhow::bail!("ingest.{}.query must not be empty", kind.source_name());
        }
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" => {}
        "hash" => {
            if config.embedding.dims == Some(0) {
                anyhow::bail!("embedding.dims must be > 0 for the hash provider");
            }
        }
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, openai, or ollama.",
            other
        ),
    }

    match config.llm.provider.as_str() {
        "heuristic" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be heuristic or openai.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let cfg = parse("[db]\npath = \"./data/catalog.sqlite\"\n").unwrap();
        assert!((cfg.graph.similarity_threshold - 0.45).abs() < 1e-6);
        assert_eq!(cfg.graph.max_neighbors, 8);
        assert_eq!(cfg.embedding.provider, "hash");
        assert_eq!(cfg.ingest.papers.poll_interval_secs, 900);
        assert_eq!(cfg.ingest.source(NodeKind::Repo).query, "topic:llm");
        assert_eq!(cfg.server.bind, "127.0.0.1:7340");
    }

    #[test]
    fn test_rejects_zero_neighbors() {
        let err = parse("[db]\npath = \"x\"\n[graph]\nmax_neighbors = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_neighbors"));
    }

    #[test]
    fn test_rejects_threshold_out_of_range() {
        let err = parse("[db]\npath = \"x\"\n[graph]\nsimilarity_threshold = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("similarity_threshold"));
    }

    #[test]
    fn test_rejects_unknown_embedding_provider() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_openai_embedding_requires_model() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn test_partial_source_section_keeps_other_defaults() {
        let cfg = parse(
            "[db]\npath = \"x\"\n[ingest.papers]\nquery = \"cat:cs.LG\"\npoll_interval_secs = 60\n",
        )
        .unwrap();
        assert_eq!(cfg.ingest.papers.query, "cat:cs.LG");
        assert_eq!(cfg.ingest.papers.batch_size, 6);
        assert_eq!(cfg.ingest.repos.query, "topic:llm");
    }
}
