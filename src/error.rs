//! The `error` module defines the error types produced by the fetch engine.
//!
//! The main type exported here is [`EngineError`], which enumerates the error
//! kinds named in the engine's contract: malformed/invalid request items,
//! queue backend failures, hook exceptions, and transport/timeout failures
//! during the HTTP phase of the per-item pipeline.
//!
//! # Examples
//!
//! ```rust
//! use fetch_swarm::EngineError;
//!
//! fn example() -> Result<(), EngineError> {
//!     Err(EngineError::Validation("missing url".into()))
//! }
//! ```

use thiserror::Error;

/// Represents any error that can occur while building, encoding, queuing, or
/// executing a [`crate::item::RequestItem`].
///
/// Item-scoped variants ([`EngineError::Hook`], [`EngineError::Request`],
/// [`EngineError::Timeout`], [`EngineError::QueueDecode`]) are always
/// recovered locally by the engine: they increment the failure counter (or,
/// for `QueueDecode`, drop the one malformed batch entry) and never abort the
/// dispatch loop. [`EngineError::Queue`] is a backend-level failure and is
/// surfaced to the caller of `pop`/`push` instead (see §7 of the engine
/// specification).
#[derive(Debug, Error)]
pub enum EngineError {
    /// The encoded bytes for a [`crate::item::RequestItem`] could not be
    /// decoded (malformed MessagePack payload, or a well-formed map missing
    /// required keys).
    #[error("decode error: {0}")]
    Decode(String),

    /// An explicit [`crate::item::RequestItem`] construction was missing a
    /// required field (`method` or `url`).
    #[error("validation error: {0}")]
    Validation(String),

    /// A single queue entry failed to decode during `pop`. The entry is
    /// dropped from the returned batch; this is not a worker failure.
    #[error("queue entry decode error: {0}")]
    QueueDecode(String),

    /// The queue backend itself is unavailable (connection lost, or a
    /// backend error unrelated to any single item).
    #[error("queue backend error: {0}")]
    Queue(#[from] redis::RedisError),

    /// A before/after processor raised during hook execution.
    #[error("hook error: {0}")]
    Hook(String),

    /// The HTTP call failed at the transport level.
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    /// The HTTP call did not complete within its configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The request item's `call` map was missing `method`/`url`, or held a
    /// value of the wrong shape (e.g. `headers` not an object).
    #[error("invalid call shape: {0}")]
    InvalidCall(String),
}
