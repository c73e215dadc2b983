#![warn(missing_docs)]
//! # fetch-swarm
//!
//! A distributed HTTP fetch engine: a pool of concurrent workers draining a
//! shared, durable queue of request descriptors, issuing each request with
//! per-item configuration and pluggable cross-cutting hooks, applying
//! bounded failure/empty-queue policies that cause graceful shutdown.
//!
//! ## Getting Started
//!
//! Add the following to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! fetch-swarm = "" // latest and greatest version
//! ```
//!
//! Then in your code:
//!
//! ```rust,no_run
//! use fetch_swarm::{EngineConfig, EngineError, RequestEngine};
//! use fetch_swarm::queue::InMemoryQueue;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EngineError> {
//!     let engine = RequestEngine::new();
//!     engine
//!         .configure(EngineConfig::builder().pool_size(20).build())
//!         .attach_queue(Arc::new(InMemoryQueue::new()));
//!
//!     engine.run().await
//! }
//! ```
//!
//! ## Environment Variables
//!
//! [`EngineConfigBuilder::from_env`](crate::config::EngineConfigBuilder::from_env)
//! reads its overrides from a documented `FETCH_ENGINE_*` prefix (e.g.
//! `FETCH_ENGINE_POOL_SIZE`, `FETCH_ENGINE_REQUEST_TIMEOUT_MS`).
//!
//! ## Features
//!
//! - **Async-first** – Uses [Tokio](https://tokio.rs/) and [Reqwest](https://crates.io/crates/reqwest)
//! - **Pluggable hooks** – Named before/after processors routed through a [`registry::ProcessorRegistry`]
//! - **Custom Error Handling** – Utilizes [thiserror](https://crates.io/crates/thiserror) for ergonomic error types
//! - **Configurable** – Pool size, poll/dispatch intervals, empty/failure caps, and per-item timeout overrides
//!
//! ## Contributing
//!
//! Contributions to this project are more than welcome! Feel free to open issues, submit pull requests,
//! or suggest improvements. Please see our [GitHub repository](https://github.com/Arend-Jan/chat-gpt-lib-rs) for more details.

/// Tunable knobs for a [`RequestEngine`]: pool size, poll/dispatch
/// intervals, empty/failure caps, default timeout, and batch size.
pub mod config;

/// Error types produced while building, encoding, queuing, or executing a
/// [`item::RequestItem`].
pub mod error;

/// The supervisor that drains an attached queue through a bounded worker
/// pool: [`engine::RequestEngine`].
pub mod engine;

/// Pluggable `User-Agent` and proxy sources consulted before dispatch.
pub mod identity;

/// [`item::RequestItem`], the descriptor of one HTTP call plus opaque
/// metadata and named hook selectors.
pub mod item;

/// The abstract [`queue::RequestQueue`] contract plus an in-memory test
/// double and a Redis-backed reference implementation.
pub mod queue;

/// Name→callable routing for before/after hooks: [`registry::ProcessorRegistry`].
pub mod registry;

/// The per-item pipeline a worker runs for each popped item.
pub mod worker;

/// Re-export commonly used structs and errors for convenience.
pub use config::EngineConfig;
pub use engine::RequestEngine;
pub use error::EngineError;
