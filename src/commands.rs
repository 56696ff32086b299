//! Implementations of the `catalog` CLI commands.
//!
//! Each `run_*` function opens what it needs from the config, does one
//! thing and prints a human-readable result to stdout.

use anyhow::Result;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::models::{Node, NodeKind};

/// Create the database file and schema. Idempotent.
pub async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;
    pool.close().await;
    println!("Database initialized at {}", config.db.path.display());
    Ok(())
}

/// Run one ingestion iteration for `kind` and report what happened.
pub async fn run_ingest(config: &Config, kind: NodeKind) -> Result<()> {
    let catalog = Catalog::open(config).await?;
    let report = catalog.run_once(kind).await?;

    println!(
        "{}: fetched {}, skipped {}, failed {}, ingested {}",
        kind.source_name(),
        report.fetched,
        report.skipped,
        report.failed,
        report.ingested.len()
    );
    for id in &report.ingested {
        if let Some(node) = catalog.store().get_by_id(id).await? {
            println!("  + {}  {}", node.id, node.title);
        }
    }
    Ok(())
}

pub async fn run_analyze(
    config: &Config,
    url: &str,
    title: Option<String>,
    text: Option<String>,
) -> Result<()> {
    let catalog = Catalog::open(config).await?;
    let outcome = catalog.analyze_link(url, title, text).await?;

    if outcome.created {
        println!("Catalogued {} ({})", outcome.node.id, outcome.node.kind);
    } else {
        println!("Already catalogued as {}", outcome.node.id);
    }
    print_node(&outcome.node);
    if !outcome.edges.is_empty() {
        println!();
        println!("Linked to {} similar items:", outcome.edges.len());
        for edge in &outcome.edges {
            println!("  {:.3}  {}", edge.weight, edge.target_id);
        }
    }
    Ok(())
}

pub async fn run_search(
    config: &Config,
    query: &str,
    kind: Option<NodeKind>,
    limit: usize,
) -> Result<()> {
    let catalog = Catalog::open(config).await?;
    let hits = catalog.search_text(query, limit, kind).await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} ({})",
            i + 1,
            hit.score,
            hit.node.title,
            hit.node.kind
        );
        println!("    id: {}", hit.node.id);
        println!("    url: {}", hit.node.source_url);
        if !hit.node.tags.is_empty() {
            println!("    tags: {}", hit.node.tags.join(", "));
        }
    }
    Ok(())
}

pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let catalog = Catalog::open(config).await?;
    let node = catalog.get(id).await?;
    let neighbors = catalog.neighbors(id).await?;

    print_node(&node);
    println!();
    println!("--- Neighbors ({}) ---", neighbors.len());
    for (other, weight) in neighbors {
        println!("  {:.3}  {}  {}", weight, other.id, other.title);
    }
    Ok(())
}

pub async fn run_stats(config: &Config) -> Result<()> {
    let catalog = Catalog::open(config).await?;
    let stats = catalog.stats().await?;

    println!("Research Catalog Stats");
    println!("======================");
    println!();
    println!("  Database:        {}", config.db.path.display());
    println!("  Items:           {}", stats.total);
    println!("    papers:        {}", stats.papers);
    println!("    repos:         {}", stats.repos);
    println!("  Links:           {}", stats.edges);
    println!("  Avg relevancy:   {:.2}", stats.avg_relevancy);
    println!("  Avg interest:    {:.2}", stats.avg_interestingness);
    println!(
        "  Last ingested:   {}",
        stats
            .last_ingested
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string())
    );
    Ok(())
}

fn print_node(node: &Node) {
    println!("--- Item ---");
    println!("id:              {}", node.id);
    println!("kind:            {}", node.kind);
    println!("title:           {}", node.title);
    println!("source_url:      {}", node.source_url);
    println!("created_at:      {}", node.created_at.to_rfc3339());
    println!("relevancy:       {:.1}", node.relevancy_score);
    println!("interestingness: {:.1}", node.interestingness_score);
    if !node.tags.is_empty() {
        println!("tags:            {}", node.tags.join(", "));
    }
    println!();
    println!("--- Summary ---");
    println!("{}", node.summary);
    if !node.key_findings.is_empty() {
        println!();
        println!("--- Key findings ---");
        for finding in &node.key_findings {
            println!("- {}", finding);
        }
    }
}
