//! Source URL canonicalization and deterministic node ids.
//!
//! [`canonicalize`] maps a raw URL to the dedup key used by the store.
//! It is pure and total: input it cannot interpret comes back trimmed.
//!
//! | Kind | Host | Canonical form |
//! |------|------|----------------|
//! | paper | `*arxiv.org` | `https://arxiv.org/abs/<id>` (no version, query or fragment) |
//! | repo | `github.com` | `https://github.com/<owner>/<repo>` |
//! | any | other | trimmed input |
//!
//! Canonicalization is idempotent: `canonicalize(k, canonicalize(k, u))`
//! equals `canonicalize(k, u)` for every `u`.

use sha2::{Digest, Sha256};
use url::Url;

use crate::models::NodeKind;

/// Path prefixes arXiv serves the same paper under.
const ARXIV_VIEW_PREFIXES: [&str; 4] = ["abs", "pdf", "html", "format"];

pub fn canonicalize(kind: NodeKind, raw_url: &str) -> String {
    let trimmed = raw_url.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let parsed = match Url::parse(trimmed) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => u,
        _ => return trimmed.to_string(),
    };
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();

    match kind {
        NodeKind::Paper if host == "arxiv.org" || host.ends_with(".arxiv.org") => {
            canonical_arxiv(&parsed)
        }
        NodeKind::Repo if host == "github.com" || host == "www.github.com" => {
            canonical_github(&parsed).unwrap_or_else(|| trimmed.to_string())
        }
        _ => trimmed.to_string(),
    }
}

/// Deterministic id for `(kind, url)`: `"{kind}_{16 hex chars}"`.
///
/// The URL is canonicalized first, so any spelling of the same item maps
/// to the same id.
pub fn node_id(kind: NodeKind, source_url: &str) -> String {
    let canonical = canonicalize(kind, source_url);
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(canonical.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}_{}", kind.as_str(), &digest[..16])
}

fn canonical_arxiv(url: &Url) -> String {
    let segments: Vec<&str> = url
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    let id_segments = match segments.first() {
        Some(first) if ARXIV_VIEW_PREFIXES.contains(first) => &segments[1..],
        _ => &segments[..],
    };

    let mut id = id_segments.join("/");
    loop {
        let before = id.len();
        if let Some(stripped) = id.strip_suffix(".pdf") {
            id = stripped.to_string();
        }
        id = strip_version(&id).to_string();
        if id.len() == before {
            break;
        }
    }

    if id.is_empty() {
        "https://arxiv.org/abs".to_string()
    } else {
        format!("https://arxiv.org/abs/{}", id)
    }
}

/// Strip a trailing `vN` version marker (`2401.01234v3` → `2401.01234`).
fn strip_version(id: &str) -> &str {
    let Some(pos) = id.rfind('v') else {
        return id;
    };
    let digits = &id[pos + 1..];
    let preceded_by_digit = id[..pos]
        .chars()
        .last()
        .is_some_and(|c| c.is_ascii_digit());
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) && preceded_by_digit {
        &id[..pos]
    } else {
        id
    }
}

fn canonical_github(url: &Url) -> Option<String> {
    let mut segments = url.path().split('/').filter(|s| !s.is_empty());
    let owner = segments.next()?;
    let mut repo = segments.next()?;
    while let Some(stripped) = repo.strip_suffix(".git") {
        repo = stripped;
    }
    Some(format!("https://github.com/{}/{}", owner, repo))
}
