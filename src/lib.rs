//! # Research Catalog
//!
//! A catalog of research papers and code repositories that links every
//! item to its nearest neighbors by embedding similarity, and keeps
//! absorbing new items from arXiv and GitHub without creating duplicates.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌────────────┐   ┌───────────┐
//! │   Feeds    │──▶│ Orchestrator │──▶│ Node Store │──▶│   Graph   │
//! │arXiv/GitHub│   │ enrich+embed │   │ mem/SQLite │   │  builder  │
//! └────────────┘   └──────────────┘   └─────┬──────┘   └───────────┘
//!                                           │
//!                      ┌────────────────────┤
//!                      ▼                    ▼
//!                 ┌──────────┐        ┌──────────┐
//!                 │   CLI    │        │   HTTP   │
//!                 │(catalog) │        │  (axum)  │
//!                 └──────────┘        └──────────┘
//! ```
//!
//! Ingestion flows left to right. Search reads the store directly.
//!
//! ## Quick Start
//!
//! ```bash
//! catalog init                       # create database
//! catalog ingest papers              # one pass over the arXiv feed
//! catalog analyze https://github.com/tokio-rs/tokio
//! catalog search "sparse attention"
//! catalog serve                      # HTTP API, start/stop polling loops
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`canonical`] | Source URL canonicalization and node ids |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`store`] | Node/edge storage trait, in-memory and SQLite backends |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`embedding`] | Embedder providers and vector utilities |
//! | [`graph`] | Similarity graph builder and snapshots |
//! | [`search`] | Vector and hybrid search |
//! | [`feeds`] | arXiv and GitHub feeds |
//! | [`enrich`] | Summary, tags and scores for raw items |
//! | [`ingest`] | Per-source polling loops |
//! | [`catalog`] | Facade used by the CLI and HTTP API |
//! | [`server`] | HTTP API |
//! | [`commands`] | CLI command implementations |
//! | [`config`] | TOML configuration parsing |

pub mod canonical;
pub mod catalog;
pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod enrich;
pub mod error;
pub mod feeds;
pub mod graph;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod search;
pub mod server;
pub mod store;
