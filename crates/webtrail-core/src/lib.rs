//! # Webtrail Core
//!
//! Runtime-agnostic logic for Webtrail: record models, URL classification,
//! text sanitization, the domain blocklist, the extractor capability table,
//! the store abstraction, embedding batching, hybrid search with reciprocal
//! rank fusion, and answer orchestration.
//!
//! This crate contains no tokio, sqlx, network, or filesystem I/O. The
//! application crate supplies the SQLite store, HTTP providers, and queue
//! handling.

pub mod blocklist;
pub mod classify;
pub mod completion;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod models;
pub mod pipeline;
pub mod rag;
pub mod sanitize;
pub mod search;
pub mod store;
