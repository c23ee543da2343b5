//! # Webtrail
//!
//! A local-first archive of your browsing activity.
//!
//! The browser capture agent appends page snapshots to a JSON-lines queue.
//! `trail ingest` drains it: each snapshot is classified, passed through a
//! category extractor, sanitized, deduplicated, embedded, and stored in
//! SQLite with an FTS5 index and a vector index. Search fuses both with
//! Reciprocal Rank Fusion, and `ask` answers questions from the top hits.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌────────────────────────┐   ┌──────────┐
//! │ Queue JSONL │──▶│ Pipeline               │──▶│  SQLite  │
//! │ (capture)   │   │ classify→extract→      │   │ FTS5+Vec │
//! └─────────────┘   │ sanitize→dedup→embed   │   └────┬─────┘
//!                   └────────────────────────┘        │
//!                      ┌──────────────────────────────┤
//!                      ▼                              ▼
//!                 ┌──────────┐                  ┌──────────┐
//!                 │   CLI    │                  │   HTTP   │
//!                 │ (trail)  │                  │  (axum)  │
//!                 └──────────┘                  └──────────┘
//! ```
//!
//! Runtime-agnostic logic lives in the `webtrail-core` crate; this crate
//! adds configuration, SQLite storage, HTTP providers, extractors, and
//! the command surfaces.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] / [`migrate`] | Database connection and schema |
//! | [`sqlite_store`] | SQLite implementation of the record store |
//! | [`extract`] | Per-category extractors |
//! | [`embedding`] | Embedding providers (OpenAI, Ollama, local) |
//! | [`llm`] | Chat completion client |
//! | [`ingest`] | Queue draining, run lock, archive |
//! | [`search`] / [`ask`] | Query commands with deadlines |
//! | [`server`] | HTTP server |

pub mod ask;
pub mod block;
pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod extract;
pub mod get;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod stats;
pub mod summarize;
