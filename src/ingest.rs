//! Ingestion orchestrator: one cancellable polling loop per source kind.
//!
//! # Lifecycle
//!
//! ```text
//!            start()                 stop()
//!   Idle ──────────────▶ Running ──────────────▶ Idle
//!                         │  ▲
//!                         └──┘ start() is a no-op
//! ```
//!
//! Each loop iteration:
//!
//! 1. asks the [`FeedSource`] for a bounded batch of raw items,
//! 2. skips items whose canonical URL is already stored,
//! 3. enriches and embeds new items one at a time, in feed order,
//! 4. upserts each node and links it into the similarity graph,
//! 5. sleeps for the source's poll interval.
//!
//! A failed enrichment skips that one candidate. A failed iteration (feed
//! down, store error, even a panic inside a collaborator) is recorded in
//! `last_error` and the loop carries on after the normal sleep.
//!
//! Collaborator calls (feed, enrichment, embedding) and the sleep race the
//! loop's [`CancellationToken`], so [`IngestOrchestrator::stop`] abandons
//! them promptly. The store-and-link step of an item is never interrupted:
//! once a node is being written, its upsert and all of its links land
//! before the iteration returns, so a stop can't leave half a link or an
//! unlinked node behind.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::IngestConfig;
use crate::embedding::Embedder;
use crate::enrich::Enricher;
use crate::error::{CatalogError, CatalogResult};
use crate::feeds::FeedSource;
use crate::graph::GraphBuilder;
use crate::models::{Edge, IngestEvent, IngestStatus, Node, NodeKind, RawItem};
use crate::store::{validate_node, NodeStore};

/// Number of events kept in the ingestion history.
pub const HISTORY_CAPACITY: usize = 200;

/// Outcome of one pass over a feed batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IterationReport {
    pub fetched: usize,
    pub skipped: usize,
    pub failed: usize,
    pub ingested: Vec<String>,
    /// The batch was cut short by a stop request.
    pub cancelled: bool,
}

/// Result of ingesting a single item outside the polling loop.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeOutcome {
    pub node: Node,
    /// `false` when the canonical URL was already catalogued.
    pub created: bool,
    pub edges: Vec<Edge>,
}

/// Everything one ingestion step needs: the store, the graph builder and
/// the three external collaborators.
pub struct Pipeline {
    store: Arc<dyn NodeStore>,
    graph: Arc<GraphBuilder>,
    feed: Arc<dyn FeedSource>,
    enricher: Arc<dyn Enricher>,
    embedder: Arc<dyn Embedder>,
    history: Mutex<VecDeque<IngestEvent>>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn NodeStore>,
        graph: Arc<GraphBuilder>,
        feed: Arc<dyn FeedSource>,
        enricher: Arc<dyn Enricher>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            store,
            graph,
            feed,
            enricher,
            embedder,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    fn record(&self, kind: NodeKind, message: impl Into<String>) {
        let mut history = lock(&self.history);
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(IngestEvent {
            kind,
            message: message.into(),
            at: Utc::now(),
        });
    }

    /// Enrich and embed one raw item into a complete node.
    ///
    /// `Ok(None)` means `cancel` fired while a collaborator was working.
    async fn build_node(
        &self,
        kind: NodeKind,
        raw: &RawItem,
        cancel: &CancellationToken,
    ) -> CatalogResult<Option<Node>> {
        let enrichment = match until_cancelled(cancel, self.enricher.enrich(kind, raw)).await {
            Some(result) => result.map_err(CatalogError::ExternalService)?,
            None => return Ok(None),
        };

        let mut node = Node::from_enrichment(kind, raw, enrichment, Vec::new());
        let text = node.embedding_text();
        node.embedding = match until_cancelled(cancel, self.embedder.embed(&text)).await {
            Some(result) => result.map_err(CatalogError::ExternalService)?,
            None => return Ok(None),
        };

        validate_node(&node)?;
        Ok(Some(node))
    }

    async fn store_and_link(&self, node: Node) -> CatalogResult<(Node, Vec<Edge>)> {
        let stored = self.store.upsert(node).await?;
        let edges = self.graph.connect_similar(&stored).await?;
        Ok((stored, edges))
    }

    /// One pass over a feed batch, updating `status` as items land.
    ///
    /// Stops between items, or inside a collaborator call, once `cancel`
    /// fires. An item already being stored is finished first.
    async fn run_iteration(
        &self,
        kind: NodeKind,
        status: &Mutex<IngestStatus>,
        cancel: &CancellationToken,
    ) -> CatalogResult<IterationReport> {
        let candidates = match until_cancelled(cancel, self.feed.fetch_candidates(kind)).await {
            Some(result) => result.map_err(CatalogError::ExternalService)?,
            None => {
                return Ok(IterationReport {
                    cancelled: true,
                    ..Default::default()
                })
            }
        };

        let mut report = IterationReport {
            fetched: candidates.len(),
            ..Default::default()
        };

        for raw in candidates {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if raw.url.trim().is_empty() {
                report.skipped += 1;
                continue;
            }
            if self.store.get_by_source(kind, &raw.url).await?.is_some() {
                debug!(kind = %kind, url = %raw.url, "Already catalogued, skipping");
                report.skipped += 1;
                continue;
            }

            let node = match self.build_node(kind, &raw, cancel).await {
                Ok(Some(node)) => node,
                Ok(None) => {
                    report.cancelled = true;
                    break;
                }
                Err(e) => {
                    warn!(kind = %kind, url = %raw.url, error = %e, "Enrichment failed, skipping item");
                    report.failed += 1;
                    continue;
                }
            };

            let (stored, edges) = self.store_and_link(node).await?;
            info!(kind = %kind, node_id = %stored.id, title = %stored.title, edges = edges.len(), "Ingested");

            let message = format!("Ingested {}: {}", kind, stored.title);
            update(status, |s| {
                s.last_message = Some(message.clone());
                s.processed += 1;
            });
            self.record(kind, message);
            report.ingested.push(stored.id);
        }

        if report.ingested.is_empty() && !report.cancelled {
            let message = format!("No new {} in batch of {}", kind.source_name(), report.fetched);
            update(status, |s| s.last_message = Some(message));
        }

        Ok(report)
    }
}

/// Handle on a spawned loop.
struct LoopTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct SourceSlot {
    kind: NodeKind,
    poll_interval: Duration,
    status: Arc<Mutex<IngestStatus>>,
    task: tokio::sync::Mutex<Option<LoopTask>>,
}

impl SourceSlot {
    fn new(kind: NodeKind, poll_interval: Duration) -> Self {
        Self {
            kind,
            poll_interval,
            status: Arc::new(Mutex::new(IngestStatus::idle(kind))),
            task: tokio::sync::Mutex::new(None),
        }
    }
}

pub struct IngestOrchestrator {
    pipeline: Arc<Pipeline>,
    papers: SourceSlot,
    repos: SourceSlot,
    /// Parent of every loop token; cancelled on drop.
    root: CancellationToken,
}

impl IngestOrchestrator {
    pub fn new(pipeline: Arc<Pipeline>, config: &IngestConfig) -> Self {
        Self::with_intervals(
            pipeline,
            config.papers.poll_interval(),
            config.repos.poll_interval(),
        )
    }

    pub fn with_intervals(pipeline: Arc<Pipeline>, papers: Duration, repos: Duration) -> Self {
        Self {
            pipeline,
            papers: SourceSlot::new(NodeKind::Paper, papers),
            repos: SourceSlot::new(NodeKind::Repo, repos),
            root: CancellationToken::new(),
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    fn slot(&self, kind: NodeKind) -> &SourceSlot {
        match kind {
            NodeKind::Paper => &self.papers,
            NodeKind::Repo => &self.repos,
        }
    }

    /// Start the loop for `kind`. A no-op when it is already running.
    pub async fn start(&self, kind: NodeKind) -> IngestStatus {
        let slot = self.slot(kind);
        let mut task = slot.task.lock().await;

        if let Some(existing) = task.as_ref() {
            if !existing.handle.is_finished() {
                debug!(kind = %kind, "Ingestion already running");
                return self.status(kind);
            }
        }

        update(&slot.status, |s| {
            s.running = true;
            s.last_error = None;
            s.processed = 0;
        });

        let cancel = self.root.child_token();
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.pipeline),
            slot.kind,
            Arc::clone(&slot.status),
            cancel.clone(),
            slot.poll_interval,
        ));
        *task = Some(LoopTask { cancel, handle });

        self.pipeline.record(kind, "Ingestion started");
        info!(kind = %kind, interval_secs = slot.poll_interval.as_secs(), "Ingestion started");
        self.status(kind)
    }

    /// Stop the loop for `kind` and wait for it to exit.
    ///
    /// In-flight feed and enrichment calls are abandoned. `running` is
    /// `false` when this returns.
    pub async fn stop(&self, kind: NodeKind) -> IngestStatus {
        let slot = self.slot(kind);
        let mut task = slot.task.lock().await;

        if let Some(LoopTask { cancel, handle }) = task.take() {
            cancel.cancel();
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(kind = %kind, "Ingestion loop panicked");
                }
            }
            self.pipeline.record(kind, "Ingestion stopped");
            info!(kind = %kind, "Ingestion stopped");
        }

        update(&slot.status, |s| s.running = false);
        self.status(kind)
    }

    pub fn status(&self, kind: NodeKind) -> IngestStatus {
        lock(&self.slot(kind).status).clone()
    }

    pub fn statuses(&self) -> Vec<IngestStatus> {
        NodeKind::ALL.iter().map(|k| self.status(*k)).collect()
    }

    /// The last `limit` history events, oldest first.
    pub fn history(&self, limit: usize) -> Vec<IngestEvent> {
        let history = lock(&self.pipeline.history);
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Run a single iteration for `kind` in the caller's task.
    ///
    /// Updates the same status record as the loop.
    pub async fn run_once(&self, kind: NodeKind) -> CatalogResult<IterationReport> {
        let status = &self.slot(kind).status;
        let result = self
            .pipeline
            .run_iteration(kind, status, &CancellationToken::new())
            .await;
        match &result {
            Ok(_) => update(status, |s| s.last_error = None),
            Err(e) => {
                let message = e.to_string();
                update(status, |s| s.last_error = Some(message.clone()));
                self.pipeline.record(kind, format!("Iteration failed: {}", message));
            }
        }
        result
    }

    /// Ingest one raw item through the same dedup and link path as the loop.
    ///
    /// An already catalogued URL returns the stored node untouched. Unlike
    /// the loop, an enrichment failure is returned to the caller.
    pub async fn analyze_one(&self, kind: NodeKind, raw: RawItem) -> CatalogResult<AnalyzeOutcome> {
        if raw.url.trim().is_empty() {
            return Err(CatalogError::Validation("url is empty".into()));
        }

        if let Some(existing) = self.pipeline.store.get_by_source(kind, &raw.url).await? {
            return Ok(AnalyzeOutcome {
                node: existing,
                created: false,
                edges: Vec::new(),
            });
        }

        let node = self
            .pipeline
            .build_node(kind, &raw, &CancellationToken::new())
            .await?
            .ok_or_else(|| CatalogError::Validation("analysis was cancelled".into()))?;
        let (stored, edges) = self.pipeline.store_and_link(node).await?;
        self.pipeline
            .record(kind, format!("Analyzed {}: {}", kind, stored.title));
        info!(kind = %kind, node_id = %stored.id, "Analyzed single item");

        Ok(AnalyzeOutcome {
            node: stored,
            created: true,
            edges,
        })
    }

    /// Stop both loops.
    pub async fn shutdown(&self) {
        for kind in NodeKind::ALL {
            self.stop(kind).await;
        }
    }
}

impl Drop for IngestOrchestrator {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

/// Resets `running` when the loop task ends, however it ends.
struct RunningGuard(Arc<Mutex<IngestStatus>>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        update(&self.0, |s| s.running = false);
    }
}

async fn run_loop(
    pipeline: Arc<Pipeline>,
    kind: NodeKind,
    status: Arc<Mutex<IngestStatus>>,
    cancel: CancellationToken,
    poll_interval: Duration,
) {
    let _guard = RunningGuard(Arc::clone(&status));

    loop {
        // Each iteration runs in its own task so a panicking collaborator
        // costs one iteration, not the loop. It is never aborted: it watches
        // `cancel` itself and returns as soon as no write is in flight.
        let iteration = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            let status = Arc::clone(&status);
            let cancel = cancel.clone();
            async move { pipeline.run_iteration(kind, &status, &cancel).await }
        });

        match iteration.await {
            Ok(Ok(report)) if report.cancelled => break,
            Ok(Ok(report)) => {
                debug!(
                    kind = %kind,
                    fetched = report.fetched,
                    skipped = report.skipped,
                    failed = report.failed,
                    ingested = report.ingested.len(),
                    "Iteration complete"
                );
                update(&status, |s| s.last_error = None);
            }
            Ok(Err(e)) => {
                error!(kind = %kind, error = %e, "Ingestion iteration failed");
                let message = e.to_string();
                update(&status, |s| s.last_error = Some(message.clone()));
                pipeline.record(kind, format!("Iteration failed: {}", message));
            }
            Err(e) => {
                error!(kind = %kind, error = %e, "Ingestion iteration panicked");
                let message = format!("iteration aborted: {}", e);
                update(&status, |s| s.last_error = Some(message.clone()));
                pipeline.record(kind, message);
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    debug!(kind = %kind, "Ingestion loop exited");
}

/// `Some(output)` when `fut` finishes first, `None` when `cancel` fires.
async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        output = fut => Some(output),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn update(status: &Mutex<IngestStatus>, f: impl FnOnce(&mut IngestStatus)) {
    let mut s = lock(status);
    f(&mut s);
    s.updated_at = Some(Utc::now());
}
