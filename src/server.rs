//! HTTP JSON API over the [`Catalog`] facade.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/ingest/{kind}/start` | Start the polling loop for a source |
//! | `POST` | `/ingest/{kind}/stop` | Stop the polling loop for a source |
//! | `GET`  | `/status` | Status of both sources |
//! | `GET`  | `/ingest/history?limit=` | Recent ingestion events |
//! | `POST` | `/search` | Hybrid search `{query, limit?, kind?}` |
//! | `POST` | `/theory` | Supporting / opposing items `{theory, limit?}` |
//! | `GET`  | `/items?kind=&limit=` | List catalogued items |
//! | `GET`  | `/items/{id}` | One item with its graph neighbors |
//! | `POST` | `/analyze-link` | Ingest a single link `{url, title?, text?}` |
//! | `GET`  | `/graph?limit=` | Graph snapshot for visualization |
//! | `GET`  | `/stats` | Dashboard counters |
//!
//! `{kind}` accepts `paper`, `papers`, `repo` or `repos`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "search query is empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `upstream_error` (502),
//! `corrupt_data` (500), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser dashboard
//! can be served from anywhere.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::CatalogError;
use crate::ingest::AnalyzeOutcome;
use crate::models::{
    CatalogStats, GraphSnapshot, IngestEvent, IngestStatus, Node, NodeKind, SearchHit,
};
use crate::search::TheoryReport;

const DEFAULT_SEARCH_LIMIT: usize = 10;
const DEFAULT_LIST_LIMIT: usize = 200;
const DEFAULT_HISTORY_LIMIT: usize = 100;

type AppState = Arc<Catalog>;

/// Starts the HTTP server on `[server].bind`.
///
/// Runs until Ctrl-C, then stops both ingestion loops before returning.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let catalog = Arc::new(Catalog::open(config).await?);
    let app = router(Arc::clone(&catalog));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "Catalog API listening");
    println!("Catalog API listening on http://{}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    catalog.shutdown().await;
    Ok(())
}

/// Build the API router over `catalog`.
pub fn router(catalog: Arc<Catalog>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/ingest/{kind}/start", post(handle_start))
        .route("/ingest/{kind}/stop", post(handle_stop))
        .route("/ingest/history", get(handle_history))
        .route("/status", get(handle_status))
        .route("/search", post(handle_search))
        .route("/theory", post(handle_theory))
        .route("/items", get(handle_list_items))
        .route("/items/{id}", get(handle_get_item))
        .route("/analyze-link", post(handle_analyze_link))
        .route("/graph", get(handle_graph))
        .route("/stats", get(handle_stats))
        .layer(cors)
        .with_state(catalog)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        let status = match &err {
            CatalogError::NotFound(_) => StatusCode::NOT_FOUND,
            CatalogError::Validation(_) => StatusCode::BAD_REQUEST,
            CatalogError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            CatalogError::Corrupt(_) | CatalogError::Storage(_) => {
                error!(error = %err, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn parse_kind(raw: &str) -> Result<NodeKind, AppError> {
    raw.parse::<NodeKind>().map_err(bad_request)
}

fn parse_optional_kind(raw: Option<&str>) -> Result<Option<NodeKind>, AppError> {
    raw.filter(|k| !k.trim().is_empty()).map(parse_kind).transpose()
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Ingestion control ============

async fn handle_start(
    State(catalog): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<IngestStatus>, AppError> {
    let kind = parse_kind(&kind)?;
    Ok(Json(catalog.start(kind).await))
}

async fn handle_stop(
    State(catalog): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<IngestStatus>, AppError> {
    let kind = parse_kind(&kind)?;
    Ok(Json(catalog.stop(kind).await))
}

async fn handle_status(State(catalog): State<AppState>) -> Json<Vec<IngestStatus>> {
    Json(catalog.statuses())
}

#[derive(Deserialize)]
struct LimitParams {
    limit: Option<usize>,
}

async fn handle_history(
    State(catalog): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Json<Vec<IngestEvent>> {
    Json(catalog.history(params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)))
}

// ============ Retrieval ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    limit: Option<usize>,
    kind: Option<String>,
}

async fn handle_search(
    State(catalog): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<Vec<SearchHit>>, AppError> {
    let Json(req) = payload?;
    let kind = parse_optional_kind(req.kind.as_deref())?;
    let hits = catalog
        .search_text(&req.query, req.limit.unwrap_or(DEFAULT_SEARCH_LIMIT), kind)
        .await?;
    Ok(Json(hits))
}

#[derive(Deserialize)]
struct TheoryRequest {
    theory: String,
    limit: Option<usize>,
}

async fn handle_theory(
    State(catalog): State<AppState>,
    payload: Result<Json<TheoryRequest>, JsonRejection>,
) -> Result<Json<TheoryReport>, AppError> {
    let Json(req) = payload?;
    let report = catalog
        .theory(&req.theory, req.limit.unwrap_or(DEFAULT_SEARCH_LIMIT))
        .await?;
    Ok(Json(report))
}

#[derive(Deserialize)]
struct ListParams {
    kind: Option<String>,
    limit: Option<usize>,
}

async fn handle_list_items(
    State(catalog): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Node>>, AppError> {
    let kind = parse_optional_kind(params.kind.as_deref())?;
    let items = catalog
        .list(kind, params.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .await?;
    Ok(Json(items))
}

#[derive(Serialize)]
struct NeighborResponse {
    item: Node,
    weight: f32,
}

#[derive(Serialize)]
struct ItemResponse {
    item: Node,
    neighbors: Vec<NeighborResponse>,
}

async fn handle_get_item(
    State(catalog): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ItemResponse>, AppError> {
    let item = catalog.get(&id).await?;
    let neighbors = catalog
        .neighbors(&id)
        .await?
        .into_iter()
        .map(|(item, weight)| NeighborResponse { item, weight })
        .collect();
    Ok(Json(ItemResponse { item, neighbors }))
}

#[derive(Deserialize)]
struct AnalyzeLinkRequest {
    url: String,
    title: Option<String>,
    text: Option<String>,
}

async fn handle_analyze_link(
    State(catalog): State<AppState>,
    payload: Result<Json<AnalyzeLinkRequest>, JsonRejection>,
) -> Result<Json<AnalyzeOutcome>, AppError> {
    let Json(req) = payload?;
    let outcome = catalog.analyze_link(&req.url, req.title, req.text).await?;
    Ok(Json(outcome))
}

async fn handle_graph(
    State(catalog): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<GraphSnapshot>, AppError> {
    let snapshot = catalog
        .graph_snapshot(params.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .await?;
    Ok(Json(snapshot))
}

async fn handle_stats(State(catalog): State<AppState>) -> Result<Json<CatalogStats>, AppError> {
    Ok(Json(catalog.stats().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Collaborators;
    use crate::config::GraphConfig;
    use crate::embedding::HashEmbedder;
    use crate::enrich::HeuristicEnricher;
    use crate::feeds::FeedSource;
    use crate::models::RawItem;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    struct EmptyFeed;

    #[async_trait]
    impl FeedSource for EmptyFeed {
        async fn fetch_candidates(&self, _kind: NodeKind) -> anyhow::Result<Vec<RawItem>> {
            Ok(Vec::new())
        }
    }

    fn app() -> Router {
        let catalog = Catalog::from_parts(
            Arc::new(InMemoryStore::new()),
            Collaborators {
                feed: Arc::new(EmptyFeed),
                enricher: Arc::new(HeuristicEnricher),
                embedder: Arc::new(HashEmbedder::new(64)),
            },
            &GraphConfig::default(),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );
        router(Arc::new(catalog))
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, json) = send(&app(), Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_missing_item_is_404_with_error_contract() {
        let (status, json) =
            send(&app(), Request::get("/items/paper_0000").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn test_empty_search_is_400() {
        let (status, json) = send(&app(), post_json("/search", serde_json::json!({"query": " "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_malformed_body_uses_error_contract() {
        let req = Request::post("/search")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, json) = send(&app(), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_unknown_kind_is_400() {
        let req = Request::post("/ingest/datasets/start").body(Body::empty()).unwrap();
        let (status, _) = send(&app(), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_analyze_link_then_fetch_item() {
        let app = app();
        let (status, json) = send(
            &app,
            post_json(
                "/analyze-link",
                serde_json::json!({"url": "https://github.com/tokio-rs/tokio.git", "text": "Async runtime"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["created"], true);
        assert_eq!(json["node"]["kind"], "repo");
        assert_eq!(json["node"]["source_url"], "https://github.com/tokio-rs/tokio");
        assert!(json["node"].get("embedding").is_none());

        let id = json["node"]["id"].as_str().unwrap().to_string();
        let (status, item) = send(
            &app,
            Request::get(format!("/items/{}", id)).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(item["item"]["id"], id.as_str());

        let (_, stats) = send(&app, Request::get("/stats").body(Body::empty()).unwrap()).await;
        assert_eq!(stats["repos"], 1);
        assert_eq!(stats["total"], 1);
    }

    #[tokio::test]
    async fn test_start_and_stop_round_trip() {
        let app = app();
        let (status, json) =
            send(&app, Request::post("/ingest/papers/start").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["running"], true);
        assert_eq!(json["kind"], "paper");

        let (_, json) =
            send(&app, Request::post("/ingest/paper/stop").body(Body::empty()).unwrap()).await;
        assert_eq!(json["running"], false);

        let (_, statuses) = send(&app, Request::get("/status").body(Body::empty()).unwrap()).await;
        assert_eq!(statuses.as_array().map(|a| a.len()), Some(2));
    }
}
