use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // Offline collaborators: heuristic enrichment and hashed embeddings.
    let config_content = format!(
        r#"[db]
path = "{}/data/catalog.sqlite"

[graph]
similarity_threshold = 0.2
max_neighbors = 4

[embedding]
provider = "hash"
dims = 64

[llm]
provider = "heuristic"

[server]
bind = "127.0.0.1:7341"
"#,
        root.display()
    );

    let config_path = config_dir.join("catalog.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_catalog(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = env!("CARGO_BIN_EXE_catalog");
    let output = Command::new(binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run catalog binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

/// The id printed by `analyze` on its first line.
fn analyzed_id(stdout: &str) -> String {
    let first = stdout.lines().next().unwrap_or_default();
    first
        .split_whitespace()
        .find(|w| w.starts_with("paper_") || w.starts_with("repo_"))
        .unwrap_or_else(|| panic!("no id in: {}", first))
        .to_string()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_catalog(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/catalog.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_catalog(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_catalog(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_stats_on_empty_catalog() {
    let (_tmp, config_path) = setup_test_env();
    run_catalog(&config_path, &["init"]);

    let (stdout, stderr, success) = run_catalog(&config_path, &["stats"]);
    assert!(success, "stats failed: stderr={}", stderr);
    assert!(stdout.contains("Items:           0"));
    assert!(stdout.contains("Last ingested:   never"));
}

#[test]
fn test_analyze_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    run_catalog(&config_path, &["init"]);

    let (stdout1, stderr1, success1) = run_catalog(
        &config_path,
        &[
            "analyze",
            "https://arxiv.org/abs/1706.03762v5",
            "--title",
            "Attention Is All You Need",
            "--text",
            "The dominant sequence transduction models are based on recurrent networks.",
        ],
    );
    assert!(success1, "analyze failed: stderr={}", stderr1);
    assert!(stdout1.starts_with("Catalogued paper_"));
    let id = analyzed_id(&stdout1);

    let (stdout2, _, success2) =
        run_catalog(&config_path, &["analyze", "https://arxiv.org/abs/1706.03762"]);
    assert!(success2);
    assert!(stdout2.starts_with("Already catalogued"));
    assert_eq!(analyzed_id(&stdout2), id);

    let (stats, _, _) = run_catalog(&config_path, &["stats"]);
    assert!(stats.contains("Items:           1"));
    assert!(stats.contains("papers:        1"));
}

#[test]
fn test_analyze_github_link_is_a_repo() {
    let (_tmp, config_path) = setup_test_env();
    run_catalog(&config_path, &["init"]);

    let (stdout, stderr, success) = run_catalog(
        &config_path,
        &["analyze", "https://github.com/tokio-rs/tokio/tree/master", "--title", "tokio"],
    );
    assert!(success, "analyze failed: stderr={}", stderr);
    assert!(stdout.contains("(repo)"));
    assert!(stdout.contains("source_url:      https://github.com/tokio-rs/tokio"));
}

#[test]
fn test_analyze_rejects_bad_url() {
    let (_tmp, config_path) = setup_test_env();
    run_catalog(&config_path, &["init"]);

    let (_, stderr, success) = run_catalog(&config_path, &["analyze", "ftp://example.org/x"]);
    assert!(!success);
    assert!(stderr.contains("unsupported url scheme"));
}

#[test]
fn test_search_finds_analyzed_item() {
    let (_tmp, config_path) = setup_test_env();
    run_catalog(&config_path, &["init"]);
    run_catalog(
        &config_path,
        &[
            "analyze",
            "https://arxiv.org/abs/2001.00001",
            "--title",
            "Sparse mixture of experts",
        ],
    );

    let (stdout, stderr, success) =
        run_catalog(&config_path, &["search", "sparse", "--kind", "papers"]);
    assert!(success, "search failed: stderr={}", stderr);
    assert!(stdout.contains("1. ["));
    assert!(stdout.contains("Sparse mixture of experts"));
}

#[test]
fn test_search_empty_query() {
    let (_tmp, config_path) = setup_test_env();
    run_catalog(&config_path, &["init"]);

    let (_, _, success) = run_catalog(&config_path, &["search", "  "]);
    assert!(!success, "empty query should fail");
}

#[test]
fn test_get_document_with_neighbors() {
    let (_tmp, config_path) = setup_test_env();
    run_catalog(&config_path, &["init"]);

    let (first, _, _) = run_catalog(
        &config_path,
        &[
            "analyze",
            "https://arxiv.org/abs/2002.00001",
            "--title",
            "Graph neural networks for molecules",
        ],
    );
    run_catalog(
        &config_path,
        &[
            "analyze",
            "https://arxiv.org/abs/2002.00002",
            "--title",
            "Graph neural networks for molecules",
        ],
    );
    let id = analyzed_id(&first);

    let (stdout, stderr, success) = run_catalog(&config_path, &["get", &id]);
    assert!(success, "get failed: stderr={}", stderr);
    assert!(stdout.contains(&format!("id:              {}", id)));
    assert!(stdout.contains("--- Neighbors (1) ---"));
}

#[test]
fn test_get_missing_document() {
    let (_tmp, config_path) = setup_test_env();
    run_catalog(&config_path, &["init"]);

    let (_, stderr, success) = run_catalog(&config_path, &["get", "paper_0000000000000000"]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_unknown_kind() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success) = run_catalog(&config_path, &["ingest", "datasets"]);
    assert!(!success);
}
