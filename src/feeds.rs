//! Feed collaborators: where candidate raw items come from.
//!
//! [`HttpFeed`] polls two upstream APIs:
//!
//! | Kind | Upstream | Format |
//! |------|----------|--------|
//! | paper | arXiv query API (newest first) | Atom XML, parsed with `quick-xml` |
//! | repo | GitHub repository search (recently updated) | JSON |
//!
//! Both return at most the configured `batch_size` items. A `GITHUB_TOKEN`
//! in the environment is sent as a bearer token to lift rate limits.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use quick_xml::events::Event;
use serde::Deserialize;
use url::Url;

use crate::config::IngestConfig;
use crate::models::{NodeKind, RawItem};

const ARXIV_API: &str = "http://export.arxiv.org/api/query";
const GITHUB_SEARCH_API: &str = "https://api.github.com/search/repositories";
const USER_AGENT: &str = concat!("research-catalog/", env!("CARGO_PKG_VERSION"));

/// Source of candidate raw items for one kind.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_candidates(&self, kind: NodeKind) -> Result<Vec<RawItem>>;
}

pub struct HttpFeed {
    client: reqwest::Client,
    config: IngestConfig,
    github_token: Option<String>,
}

impl HttpFeed {
    pub fn new(config: IngestConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            config,
            github_token: std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()),
        })
    }

    async fn fetch_arxiv(&self) -> Result<Vec<RawItem>> {
        let source = &self.config.papers;
        let base = source.endpoint.as_deref().unwrap_or(ARXIV_API);
        let batch = source.batch_size.to_string();
        let url = Url::parse_with_params(
            base,
            &[
                ("search_query", source.query.as_str()),
                ("sortBy", "submittedDate"),
                ("sortOrder", "descending"),
                ("max_results", batch.as_str()),
            ],
        )
        .with_context(|| format!("Invalid arXiv endpoint: {}", base))?;

        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let mut items = parse_arxiv_atom(&body)?;
        items.truncate(source.batch_size);
        Ok(items)
    }

    async fn fetch_github(&self) -> Result<Vec<RawItem>> {
        let source = &self.config.repos;
        let base = source.endpoint.as_deref().unwrap_or(GITHUB_SEARCH_API);
        let batch = source.batch_size.to_string();
        let url = Url::parse_with_params(
            base,
            &[
                ("q", source.query.as_str()),
                ("sort", "updated"),
                ("per_page", batch.as_str()),
            ],
        )
        .with_context(|| format!("Invalid GitHub endpoint: {}", base))?;

        let mut request = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.github_token {
            request = request.bearer_auth(token);
        }

        let body = request.send().await?.error_for_status()?.text().await?;
        let mut items = parse_github_search(&body)?;
        items.truncate(source.batch_size);
        Ok(items)
    }
}

#[async_trait]
impl FeedSource for HttpFeed {
    async fn fetch_candidates(&self, kind: NodeKind) -> Result<Vec<RawItem>> {
        match kind {
            NodeKind::Paper => self.fetch_arxiv().await.context("arXiv fetch failed"),
            NodeKind::Repo => self.fetch_github().await.context("GitHub fetch failed"),
        }
    }
}

#[derive(Default)]
struct EntryBuilder {
    title: String,
    summary: String,
    id: String,
    html_link: Option<String>,
}

impl EntryBuilder {
    fn finish(self) -> Option<RawItem> {
        let url = self.html_link.unwrap_or(self.id);
        if url.trim().is_empty() {
            return None;
        }
        Some(RawItem {
            title: collapse_whitespace(&self.title),
            url: url.trim().to_string(),
            raw_text: collapse_whitespace(&self.summary),
        })
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    Title,
    Summary,
    Id,
}

/// Parse an arXiv Atom response into raw items.
///
/// The entry URL is the `text/html` alternate link, falling back to the
/// entry `<id>`. Entries with neither are dropped.
pub fn parse_arxiv_atom(xml: &str) -> Result<Vec<RawItem>> {
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut entry: Option<EntryBuilder> = None;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"entry" => entry = Some(EntryBuilder::default()),
                b"title" if entry.is_some() => field = Some(Field::Title),
                b"summary" if entry.is_some() => field = Some(Field::Summary),
                b"id" if entry.is_some() => field = Some(Field::Id),
                b"link" => read_link(&e, entry.as_mut())?,
                _ => field = None,
            },
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"link" {
                    read_link(&e, entry.as_mut())?;
                }
            }
            Ok(Event::Text(t)) => {
                if let (Some(f), Some(current)) = (field, entry.as_mut()) {
                    let text = t.unescape().context("Invalid text in arXiv feed")?;
                    let target = match f {
                        Field::Title => &mut current.title,
                        Field::Summary => &mut current.summary,
                        Field::Id => &mut current.id,
                    };
                    if !target.is_empty() {
                        target.push(' ');
                    }
                    target.push_str(&text);
                }
            }
            Ok(Event::End(e)) => {
                field = None;
                if e.local_name().as_ref() == b"entry" {
                    if let Some(item) = entry.take().and_then(EntryBuilder::finish) {
                        items.push(item);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => anyhow::bail!(
                "Malformed arXiv feed at position {}: {}",
                reader.buffer_position(),
                e
            ),
            _ => {}
        }
    }

    Ok(items)
}

fn read_link(
    e: &quick_xml::events::BytesStart<'_>,
    entry: Option<&mut EntryBuilder>,
) -> Result<()> {
    let Some(entry) = entry else {
        return Ok(());
    };
    let mut href = None;
    let mut is_html = false;
    for attr in e.attributes() {
        let attr = attr.context("Invalid link attribute in arXiv feed")?;
        match attr.key.local_name().as_ref() {
            b"href" => href = Some(attr.unescape_value()?.into_owned()),
            b"type" => is_html = attr.unescape_value()?.as_ref() == "text/html",
            _ => {}
        }
    }
    if is_html && entry.html_link.is_none() {
        entry.html_link = href;
    }
    Ok(())
}

#[derive(Deserialize)]
struct GithubSearch {
    #[serde(default)]
    items: Vec<GithubRepo>,
}

#[derive(Deserialize)]
struct GithubRepo {
    full_name: String,
    html_url: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
}

/// Parse a GitHub repository search response into raw items.
pub fn parse_github_search(json: &str) -> Result<Vec<RawItem>> {
    let search: GithubSearch =
        serde_json::from_str(json).context("Invalid GitHub search response")?;
    Ok(search
        .items
        .into_iter()
        .map(|repo| {
            let mut raw_text = repo.description.unwrap_or_default();
            if !repo.topics.is_empty() {
                if !raw_text.is_empty() {
                    raw_text.push('\n');
                }
                raw_text.push_str("Topics: ");
                raw_text.push_str(&repo.topics.join(", "));
            }
            RawItem {
                title: repo.full_name,
                url: repo.html_url,
                raw_text,
            }
        })
        .collect())
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
