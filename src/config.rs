//! The `config` module provides [`EngineConfig`], the tunable knobs of the
//! dispatch loop and worker pipeline, following the same builder pattern the
//! rest of this corpus uses for client configuration.
//!
//! # Overview
//!
//! [`EngineConfig`] holds every value listed in the engine's external
//! configuration table (`spec.md` §6): pool size, poll/dispatch intervals,
//! empty/failure caps, default timeout, and batch size. Build one with
//! [`EngineConfig::builder`], or start from the environment with
//! [`EngineConfigBuilder::from_env`].
//!
//! # Usage
//!
//! ```rust
//! use fetch_swarm::EngineConfig;
//! use std::time::Duration;
//!
//! let config = EngineConfig::builder()
//!     .pool_size(50)
//!     .request_timeout(Duration::from_secs(15))
//!     .max_failure_allowed(100)
//!     .build();
//! assert_eq!(config.pool_size(), 50);
//! ```

use std::env;
use std::time::Duration;

/// Tunable knobs for a [`crate::engine::RequestEngine`]. See `spec.md` §6 for
/// the external configuration contract these fields implement.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pool_size: usize,
    pop_interval: Duration,
    request_interval: Duration,
    max_empty_retry: i64,
    request_timeout: Duration,
    each_size_from_queue: usize,
    max_failure_allowed: i64,
    reset_empty_polls_on_activity: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_size: 20,
            pop_interval: Duration::from_secs(1),
            request_interval: Duration::from_secs(0),
            max_empty_retry: 2,
            request_timeout: Duration::from_secs(10),
            each_size_from_queue: 10,
            max_failure_allowed: -1,
            reset_empty_polls_on_activity: false,
        }
    }
}

impl EngineConfig {
    /// Returns a new [`EngineConfigBuilder`] seeded with the defaults from
    /// `spec.md` §6.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Max concurrent workers.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Delay between dispatch loop iterations.
    pub fn pop_interval(&self) -> Duration {
        self.pop_interval
    }

    /// Delay between consecutive worker spawns within one batch.
    pub fn request_interval(&self) -> Duration {
        self.request_interval
    }

    /// Consecutive-empty polls after which the engine self-quits. `-1`
    /// disables the cap.
    pub fn max_empty_retry(&self) -> i64 {
        self.max_empty_retry
    }

    /// Default HTTP timeout; overridden per item by `raw_info._timeout`.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Batch size for `queue.pop`.
    pub fn each_size_from_queue(&self) -> usize {
        self.each_size_from_queue
    }

    /// Failure cap. `-1` disables the cap.
    pub fn max_failure_allowed(&self) -> i64 {
        self.max_failure_allowed
    }

    /// Whether `empty_polls` resets to zero after a non-empty `pop`.
    ///
    /// The reference implementation never resets this counter: it is a
    /// cumulative count of empty polls over the engine's whole lifetime, not
    /// a consecutive-empty-polls streak, and `max_empty_retry` is compared
    /// against that lifetime total (`spec.md` §4.5.2, §9 open question).
    /// Defaults to `false` to preserve that observed behavior; set to `true`
    /// to instead treat the cap as "consecutive empty polls", which some
    /// callers may consider the intended reading of a latent bug.
    pub fn reset_empty_polls_on_activity(&self) -> bool {
        self.reset_empty_polls_on_activity
    }
}

/// Builder for [`EngineConfig`].
///
/// # Example
///
/// ```rust
/// use fetch_swarm::EngineConfig;
///
/// let config = EngineConfig::builder()
///     .pool_size(5)
///     .max_empty_retry(-1)
///     .build();
/// assert_eq!(config.max_empty_retry(), -1);
/// ```
#[derive(Debug)]
pub struct EngineConfigBuilder {
    inner: EngineConfig,
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self {
            inner: EngineConfig::default(),
        }
    }
}

impl EngineConfigBuilder {
    /// Sets the max concurrent worker count.
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.inner.pool_size = pool_size;
        self
    }

    /// Sets the delay between dispatch loop iterations.
    pub fn pop_interval(mut self, interval: Duration) -> Self {
        self.inner.pop_interval = interval;
        self
    }

    /// Sets the delay between consecutive worker spawns within one batch.
    pub fn request_interval(mut self, interval: Duration) -> Self {
        self.inner.request_interval = interval;
        self
    }

    /// Sets the consecutive-empty-poll cap. Pass `-1` to disable it.
    pub fn max_empty_retry(mut self, max_empty_retry: i64) -> Self {
        self.inner.max_empty_retry = max_empty_retry;
        self
    }

    /// Sets the default per-item HTTP timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.inner.request_timeout = timeout;
        self
    }

    /// Sets the batch size for `queue.pop`.
    pub fn each_size_from_queue(mut self, size: usize) -> Self {
        self.inner.each_size_from_queue = size;
        self
    }

    /// Sets the failure cap. Pass `-1` to disable it.
    pub fn max_failure_allowed(mut self, max_failure_allowed: i64) -> Self {
        self.inner.max_failure_allowed = max_failure_allowed;
        self
    }

    /// Sets whether `empty_polls` resets to zero after a non-empty `pop`.
    /// See [`EngineConfig::reset_empty_polls_on_activity`].
    pub fn reset_empty_polls_on_activity(mut self, reset: bool) -> Self {
        self.inner.reset_empty_polls_on_activity = reset;
        self
    }

    /// Starts from [`EngineConfig::default`] and overrides any field whose
    /// corresponding `FETCH_ENGINE_*` environment variable is set and
    /// parses, mirroring the teacher's `OPENAI_API_KEY` environment
    /// fallback. Unset or unparsable variables are left at their prior
    /// value.
    pub fn from_env(mut self) -> Self {
        if let Some(v) = env_usize("FETCH_ENGINE_POOL_SIZE") {
            self.inner.pool_size = v;
        }
        if let Some(v) = env_millis("FETCH_ENGINE_POP_INTERVAL_MS") {
            self.inner.pop_interval = v;
        }
        if let Some(v) = env_millis("FETCH_ENGINE_REQUEST_INTERVAL_MS") {
            self.inner.request_interval = v;
        }
        if let Some(v) = env_i64("FETCH_ENGINE_MAX_EMPTY_RETRY") {
            self.inner.max_empty_retry = v;
        }
        if let Some(v) = env_millis("FETCH_ENGINE_REQUEST_TIMEOUT_MS") {
            self.inner.request_timeout = v;
        }
        if let Some(v) = env_usize("FETCH_ENGINE_BATCH_SIZE") {
            self.inner.each_size_from_queue = v;
        }
        if let Some(v) = env_i64("FETCH_ENGINE_MAX_FAILURE_ALLOWED") {
            self.inner.max_failure_allowed = v;
        }
        if let Some(v) = env::var("FETCH_ENGINE_RESET_EMPTY_POLLS_ON_ACTIVITY")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.inner.reset_empty_polls_on_activity = v;
        }
        self
    }

    /// Builds the final [`EngineConfig`].
    pub fn build(self) -> EngineConfig {
        self.inner
    }
}

fn env_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_configuration_table() {
        let config = EngineConfig::default();
        assert_eq!(config.pool_size(), 20);
        assert_eq!(config.pop_interval(), Duration::from_secs(1));
        assert_eq!(config.request_interval(), Duration::from_secs(0));
        assert_eq!(config.max_empty_retry(), 2);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.each_size_from_queue(), 10);
        assert_eq!(config.max_failure_allowed(), -1);
        assert!(!config.reset_empty_polls_on_activity());
    }

    #[test]
    fn builder_overrides_only_what_is_set() {
        let config = EngineConfig::builder().pool_size(5).build();
        assert_eq!(config.pool_size(), 5);
        assert_eq!(config.each_size_from_queue(), 10);
    }
}
