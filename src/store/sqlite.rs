//! SQLite-backed [`NodeStore`] implementation.
//!
//! Nodes live in the `nodes` table with list fields as JSON text and the
//! embedding as a little-endian f32 BLOB. Each undirected similarity link
//! is two rows in `edges`. Rows that fail to decode surface as
//! [`CatalogError::Corrupt`].

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{CatalogError, CatalogResult};
use crate::migrate;
use crate::models::{Edge, Node, NodeKind};

use super::{validate_edge, validate_node, NodeStore};

const NODE_COLUMNS: &str = "n.id AS id, n.kind AS kind, n.title AS title, \
     n.source_url AS source_url, n.abstract_text AS abstract_text, n.summary AS summary, \
     n.tags_json AS tags_json, n.questions_json AS questions_json, \
     n.findings_json AS findings_json, n.relevancy_score AS relevancy_score, \
     n.interestingness_score AS interestingness_score, n.embedding AS embedding, \
     n.created_at AS created_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the database at `path` and make sure the schema exists.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn encode_list(list: &[String]) -> String {
    serde_json::to_string(list).unwrap_or_else(|_| "[]".to_string())
}

fn decode_list(id: &str, column: &str, raw: &str) -> CatalogResult<Vec<String>> {
    serde_json::from_str(raw)
        .map_err(|e| CatalogError::Corrupt(format!("node {}: invalid {}: {}", id, column, e)))
}

/// Insert or overwrite one directed edge, failing when either endpoint is
/// missing. The endpoint check is part of the write statement.
async fn put_edge(
    conn: &mut SqliteConnection,
    source_id: &str,
    target_id: &str,
    weight: f32,
) -> CatalogResult<()> {
    let result = sqlx::query(
        r#"
        INSERT INTO edges (source_id, target_id, weight)
        SELECT ?, ?, ?
        WHERE EXISTS (SELECT 1 FROM nodes WHERE id = ?)
          AND EXISTS (SELECT 1 FROM nodes WHERE id = ?)
        ON CONFLICT(source_id, target_id) DO UPDATE SET weight = excluded.weight
        "#,
    )
    .bind(source_id)
    .bind(target_id)
    .bind(weight as f64)
    .bind(source_id)
    .bind(target_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(CatalogError::Validation(format!(
            "edge {} -> {} references a node that is not in the store",
            source_id, target_id
        )));
    }
    Ok(())
}

fn row_to_node(row: &SqliteRow) -> CatalogResult<Node> {
    let id: String = row.try_get("id")?;

    let kind_raw: String = row.try_get("kind")?;
    let kind = kind_raw
        .parse::<NodeKind>()
        .map_err(|e| CatalogError::Corrupt(format!("node {}: {}", id, e)))?;

    let blob: Vec<u8> = row.try_get("embedding")?;
    let embedding = blob_to_vec(&blob).ok_or_else(|| {
        CatalogError::Corrupt(format!(
            "node {}: embedding blob of {} bytes is not a float vector",
            id,
            blob.len()
        ))
    })?;

    let created_ms: i64 = row.try_get("created_at")?;
    let created_at = DateTime::<Utc>::from_timestamp_millis(created_ms).ok_or_else(|| {
        CatalogError::Corrupt(format!("node {}: invalid created_at {}", id, created_ms))
    })?;

    let tags_raw: String = row.try_get("tags_json")?;
    let questions_raw: String = row.try_get("questions_json")?;
    let findings_raw: String = row.try_get("findings_json")?;

    Ok(Node {
        kind,
        title: row.try_get("title")?,
        source_url: row.try_get("source_url")?,
        abstract_text: row.try_get("abstract_text")?,
        summary: row.try_get("summary")?,
        tags: decode_list(&id, "tags_json", &tags_raw)?,
        questions_answered: decode_list(&id, "questions_json", &questions_raw)?,
        key_findings: decode_list(&id, "findings_json", &findings_raw)?,
        relevancy_score: row.try_get("relevancy_score")?,
        interestingness_score: row.try_get("interestingness_score")?,
        embedding,
        created_at,
        id,
    })
}

#[async_trait]
impl NodeStore for SqliteStore {
    async fn get_by_id(&self, id: &str) -> CatalogResult<Option<Node>> {
        let row = sqlx::query(&format!("SELECT {} FROM nodes n WHERE n.id = ?", NODE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_node).transpose()
    }

    async fn all_nodes(&self) -> CatalogResult<Vec<Node>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM nodes n ORDER BY n.rowid ASC",
            NODE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_node).collect()
    }

    async fn upsert(&self, node: Node) -> CatalogResult<Node> {
        validate_node(&node)?;
        let now = Utc::now().timestamp_millis();

        sqlx::query(
            r#"
            INSERT INTO nodes (id, kind, title, source_url, abstract_text, summary,
                               tags_json, questions_json, findings_json,
                               relevancy_score, interestingness_score, embedding,
                               created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                title = excluded.title,
                source_url = excluded.source_url,
                abstract_text = excluded.abstract_text,
                summary = excluded.summary,
                tags_json = excluded.tags_json,
                questions_json = excluded.questions_json,
                findings_json = excluded.findings_json,
                relevancy_score = excluded.relevancy_score,
                interestingness_score = excluded.interestingness_score,
                embedding = excluded.embedding,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&node.id)
        .bind(node.kind.as_str())
        .bind(&node.title)
        .bind(&node.source_url)
        .bind(&node.abstract_text)
        .bind(&node.summary)
        .bind(encode_list(&node.tags))
        .bind(encode_list(&node.questions_answered))
        .bind(encode_list(&node.key_findings))
        .bind(node.relevancy_score)
        .bind(node.interestingness_score)
        .bind(vec_to_blob(&node.embedding))
        .bind(node.created_at.timestamp_millis())
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_by_id(&node.id).await?.ok_or_else(|| {
            CatalogError::Corrupt(format!("node {} missing right after upsert", node.id))
        })
    }

    async fn add_edge(&self, source_id: &str, target_id: &str, weight: f32) -> CatalogResult<()> {
        validate_edge(source_id, target_id, weight)?;
        let mut conn = self.pool.acquire().await?;
        put_edge(&mut conn, source_id, target_id, weight).await
    }

    async fn link(&self, a: &str, b: &str, weight: f32) -> CatalogResult<()> {
        validate_edge(a, b, weight)?;

        // Both statements write, so the transaction takes the write lock
        // up front and waits on `busy_timeout` instead of failing.
        let mut tx = self.pool.begin().await?;
        put_edge(&mut tx, a, b, weight).await?;
        put_edge(&mut tx, b, a, weight).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn unlink_all(&self, id: &str) -> CatalogResult<usize> {
        let result = sqlx::query("DELETE FROM edges WHERE source_id = ? OR target_id = ?")
            .bind(id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn neighbors(&self, id: &str) -> CatalogResult<Vec<(Node, f32)>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}, e.weight AS weight
            FROM edges e
            JOIN nodes n ON n.id = e.target_id
            WHERE e.source_id = ?
            ORDER BY e.weight DESC, e.rowid ASC
            "#,
            NODE_COLUMNS
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> CatalogResult<(Node, f32)> {
                let weight: f64 = row.try_get("weight")?;
                Ok((row_to_node(row)?, weight as f32))
            })
            .collect()
    }

    async fn edges(&self) -> CatalogResult<Vec<Edge>> {
        let rows = sqlx::query("SELECT source_id, target_id, weight FROM edges ORDER BY rowid ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> CatalogResult<Edge> {
                let weight: f64 = row.try_get("weight")?;
                Ok(Edge {
                    source_id: row.try_get("source_id")?,
                    target_id: row.try_get("target_id")?,
                    weight: weight as f32,
                })
            })
            .collect()
    }

    async fn count_by_kind(&self) -> CatalogResult<Vec<(NodeKind, usize)>> {
        let mut counts = Vec::with_capacity(NodeKind::ALL.len());
        for kind in NodeKind::ALL {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM nodes WHERE kind = ?")
                .bind(kind.as_str())
                .fetch_one(&self.pool)
                .await?;
            counts.push((kind, count as usize));
        }
        Ok(counts)
    }
}
