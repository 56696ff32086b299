//! Enrichment collaborators: summary, tags and scores for a raw item.
//!
//! - [`HeuristicEnricher`] works offline from the raw text and title.
//! - [`ChatEnricher`] asks an OpenAI-compatible `/chat/completions`
//!   endpoint for a strict JSON reply.
//!
//! Every enricher returns scores inside `[0, 10]` and lists of at most
//! [`MAX_LIST_LEN`] entries, whatever the upstream model produced.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::LlmConfig;
use crate::models::{Enrichment, NodeKind, RawItem};

pub const MAX_LIST_LEN: usize = 10;
const HEURISTIC_SUMMARY_CHARS: usize = 400;
const CHAT_SUMMARY_CHARS: usize = 500;

const SYSTEM_PROMPT: &str = "You summarize AI research artifacts. Respond in strict JSON with keys: \
summary (2 sentences), tags (list of strings), questions (list of strings), findings (list of strings), \
relevance (0-10 float), interesting (0-10 float). Do not add prose.";

#[async_trait]
pub trait Enricher: Send + Sync {
    fn name(&self) -> &str;

    async fn enrich(&self, kind: NodeKind, raw: &RawItem) -> Result<Enrichment>;
}

/// Offline enricher deriving everything from the item itself.
pub struct HeuristicEnricher;

#[async_trait]
impl Enricher for HeuristicEnricher {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn enrich(&self, _kind: NodeKind, raw: &RawItem) -> Result<Enrichment> {
        let title = raw.title.trim();
        let text = raw.raw_text.trim();

        let summary = if text.is_empty() {
            format!("Preview for {}", title)
        } else {
            truncate_chars(text, HEURISTIC_SUMMARY_CHARS)
        };

        let tags = title
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| w.len() > 2)
            .take(5)
            .collect();

        Ok(Enrichment {
            summary,
            tags,
            questions_answered: vec![format!("What does {} propose?", title)],
            key_findings: vec!["Insight pending model analysis.".to_string()],
            relevancy: 6.0,
            interestingness: 6.5,
        })
    }
}

/// Enricher backed by an OpenAI-compatible chat completion API.
///
/// Requires `OPENAI_API_KEY` in the environment.
pub struct ChatEnricher {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl ChatEnricher {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl Enricher for ChatEnricher {
    fn name(&self) -> &str {
        &self.model
    }

    async fn enrich(&self, kind: NodeKind, raw: &RawItem) -> Result<Enrichment> {
        let kind_label = match kind {
            NodeKind::Paper => "paper",
            NodeKind::Repo => "repository",
        };
        let user_prompt = format!(
            "Type: {}\nTitle: {}\nAbstract or description:\n{}\nReturn compact fields as requested.",
            kind_label, raw.title, raw.raw_text
        );
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0.2,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_prompt},
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Chat completion error {}: {}", status, text);
        }

        let json: serde_json::Value = response.json().await?;
        let content = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| anyhow::anyhow!("Chat completion response has no message content"))?;

        parse_chat_reply(content)
    }
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    questions: Vec<String>,
    #[serde(default)]
    findings: Vec<String>,
    #[serde(default)]
    relevance: Option<f64>,
    #[serde(default)]
    interesting: Option<f64>,
}

/// Parse the model's JSON reply, tolerating a surrounding code fence.
pub fn parse_chat_reply(content: &str) -> Result<Enrichment> {
    let trimmed = content.trim();
    let json = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed);

    let reply: ChatReply =
        serde_json::from_str(json.trim()).context("Model reply is not the expected JSON")?;

    if reply.summary.trim().is_empty() {
        bail!("Model reply has an empty summary");
    }

    Ok(Enrichment {
        summary: truncate_chars(reply.summary.trim(), CHAT_SUMMARY_CHARS),
        tags: cap_list(reply.tags),
        questions_answered: cap_list(reply.questions),
        key_findings: cap_list(reply.findings),
        relevancy: clamp_score(reply.relevance),
        interestingness: clamp_score(reply.interesting),
    })
}

fn clamp_score(score: Option<f64>) -> f64 {
    match score {
        Some(s) if s.is_finite() => s.clamp(0.0, 10.0),
        _ => 5.0,
    }
}

fn cap_list(list: Vec<String>) -> Vec<String> {
    list.into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .take(MAX_LIST_LEN)
        .collect()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

pub fn create_enricher(config: &LlmConfig) -> Result<Arc<dyn Enricher>> {
    match config.provider.as_str() {
        "heuristic" => Ok(Arc::new(HeuristicEnricher)),
        "openai" => Ok(Arc::new(ChatEnricher::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}
