//! The `engine` module ties the other modules together into
//! [`RequestEngine`], the supervisor that drains an attached
//! [`crate::queue::RequestQueue`] through a bounded worker pool, running
//! [`crate::worker::run_item`] once per popped item.
//!
//! # Examples
//!
//! ```rust,no_run
//! use fetch_swarm::{EngineConfig, RequestEngine};
//! use fetch_swarm::queue::InMemoryQueue;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), fetch_swarm::EngineError> {
//! let engine = RequestEngine::new();
//! engine
//!     .configure(EngineConfig::builder().pool_size(10).build())
//!     .attach_queue(Arc::new(InMemoryQueue::new()));
//! engine.run().await
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use reqwest::Client;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::identity::{ProxyProvider, UserAgentProvider};
use crate::queue::RequestQueue;
use crate::registry::{Processor, ProcessorRegistry};
use crate::worker::{self, WorkerContext};

/// The engine's lifecycle. Transitions only ever move forward:
/// `Idle -> Running -> Draining -> Stopped`. A [`RequestEngine`] is
/// single-use: `run` may only be called once per instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed, not yet run.
    Idle,
    /// `run` is actively popping batches and spawning workers.
    Running,
    /// A quit condition has fired; no new batches are popped, but already
    /// in-flight workers are being awaited.
    Draining,
    /// `run` has returned.
    Stopped,
}

struct Inner {
    http_client: Client,
    state: Mutex<EngineState>,
    config: Mutex<EngineConfig>,
    queue: Mutex<Option<Arc<dyn RequestQueue>>>,
    registry: Mutex<ProcessorRegistry>,
    user_agent_provider: Mutex<Option<Arc<dyn UserAgentProvider>>>,
    proxy_provider: Mutex<Option<Arc<dyn ProxyProvider>>>,
    before_each: Mutex<Vec<String>>,
    after_each: Mutex<Vec<String>>,
    failures: Arc<AtomicU64>,
    active_workers: AtomicUsize,
    quit_requested: AtomicBool,
}

/// A pool of workers draining a shared [`crate::queue::RequestQueue`].
///
/// Cloning a `RequestEngine` is cheap and shares the same underlying state
/// (the same pattern `reqwest::Client` uses) — this is what lets
/// [`RequestEngine::quit`] be called from outside `run`'s caller, e.g. from a
/// signal handler or another task, while `run` is in flight.
#[derive(Clone)]
pub struct RequestEngine {
    inner: Arc<Inner>,
}

impl Default for RequestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestEngine {
    /// Builds an idle engine with default configuration, no attached queue,
    /// no identity providers, and a registry holding only the reserved
    /// `default` no-op slot.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                http_client: Client::new(),
                state: Mutex::new(EngineState::Idle),
                config: Mutex::new(EngineConfig::default()),
                queue: Mutex::new(None),
                registry: Mutex::new(ProcessorRegistry::new()),
                user_agent_provider: Mutex::new(None),
                proxy_provider: Mutex::new(None),
                before_each: Mutex::new(Vec::new()),
                after_each: Mutex::new(Vec::new()),
                failures: Arc::new(AtomicU64::new(0)),
                active_workers: AtomicUsize::new(0),
                quit_requested: AtomicBool::new(false),
            }),
        }
    }

    /// Replaces the engine's configuration. Has no effect on a batch already
    /// in flight; takes effect on the next dispatch loop iteration.
    pub fn configure(&self, config: EngineConfig) -> &Self {
        *self.inner.config.lock().unwrap() = config;
        self
    }

    /// Attaches the queue `run` will drain. Required before calling `run`.
    pub fn attach_queue(&self, queue: Arc<dyn RequestQueue>) -> &Self {
        *self.inner.queue.lock().unwrap() = Some(queue);
        self
    }

    /// Sets the `User-Agent` source workers consult before dispatch.
    pub fn set_user_agent(&self, provider: Arc<dyn UserAgentProvider>) -> &Self {
        *self.inner.user_agent_provider.lock().unwrap() = Some(provider);
        self
    }

    /// Sets the proxy source workers consult before dispatch.
    pub fn set_proxy(&self, provider: Arc<dyn ProxyProvider>) -> &Self {
        *self.inner.proxy_provider.lock().unwrap() = Some(provider);
        self
    }

    /// Registers (or replaces) a named hook. Registering under `"default"`
    /// replaces the built-in no-op.
    pub fn register_processor(&self, name: impl Into<String>, processor: Arc<dyn Processor>) -> &Self {
        self.inner.registry.lock().unwrap().set(name, processor);
        self
    }

    /// Adds a hook name that runs as a before-hook on every item, in
    /// addition to (and after) the item's own named before-hook.
    pub fn before_each(&self, name: impl Into<String>) -> &Self {
        self.inner.before_each.lock().unwrap().push(name.into());
        self
    }

    /// Adds a hook name that runs as an after-hook on every item, in
    /// addition to (and after) the item's own named after-hook.
    pub fn after_each(&self, name: impl Into<String>) -> &Self {
        self.inner.after_each.lock().unwrap().push(name.into());
        self
    }

    /// The engine's current lifecycle state.
    pub fn state(&self) -> EngineState {
        *self.inner.state.lock().unwrap()
    }

    /// The number of workers currently in flight.
    pub fn worker_count(&self) -> usize {
        self.inner.active_workers.load(Ordering::SeqCst)
    }

    /// The number of item failures observed so far (panicking hooks, failed
    /// HTTP calls, and timeouts each count at most once per item).
    pub fn failure_count(&self) -> u64 {
        self.inner.failures.load(Ordering::SeqCst)
    }

    /// Requests a graceful shutdown: the dispatch loop stops popping new
    /// batches and `run` returns once already-spawned workers finish. Safe
    /// to call from any task, any number of times, before or during `run`.
    pub fn quit(&self) {
        self.inner.quit_requested.store(true, Ordering::SeqCst);
        let mut state = self.inner.state.lock().unwrap();
        if *state == EngineState::Running {
            *state = EngineState::Draining;
        }
    }

    /// Runs the dispatch loop with no call overrides. Equivalent to
    /// `run_with_overrides(HashMap::new())`. See
    /// [`RequestEngine::run_with_overrides`] for the full contract.
    pub async fn run(&self) -> Result<(), EngineError> {
        self.run_with_overrides(HashMap::new()).await
    }

    /// Runs the dispatch loop until a quit condition fires: an explicit
    /// [`RequestEngine::quit`] call, a `SIGINT`/`SIGQUIT`/`SIGTERM`, the
    /// configured consecutive-empty-poll cap, or the configured failure cap.
    ///
    /// `call_overrides` is merged into every popped item's `call` map before
    /// the before-hook runs (`spec.md` §4.5.1 `run(call_overrides?)`, §4.5.3
    /// step A) — e.g. forcing a shared header or query parameter across an
    /// entire run without touching how producers build items.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if no queue is attached, or if
    /// `run` has already been called on this engine. Returns
    /// [`EngineError::Queue`] if the queue backend itself fails during a
    /// `pop` — per the engine's error policy this is not recovered locally;
    /// already in-flight workers are still drained before the error is
    /// returned.
    pub async fn run_with_overrides(
        &self,
        call_overrides: HashMap<String, serde_json::Value>,
    ) -> Result<(), EngineError> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if *state != EngineState::Idle {
                return Err(EngineError::Validation(
                    "run() was already called on this engine".into(),
                ));
            }
            *state = EngineState::Running;
        }

        let queue = self
            .inner
            .queue
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| EngineError::Validation("no queue attached".into()))?;
        let config = self.inner.config.lock().unwrap().clone();
        let registry = Arc::new(self.inner.registry.lock().unwrap().clone());
        let user_agent_provider = self.inner.user_agent_provider.lock().unwrap().clone();
        let proxy_provider = self.inner.proxy_provider.lock().unwrap().clone();
        let before_each = Arc::new(self.inner.before_each.lock().unwrap().clone());
        let after_each = Arc::new(self.inner.after_each.lock().unwrap().clone());

        let ctx = Arc::new(WorkerContext {
            http_client: self.inner.http_client.clone(),
            registry,
            user_agent_provider,
            proxy_provider,
            before_each,
            after_each,
            default_timeout: config.request_timeout(),
            failures: Arc::clone(&self.inner.failures),
        });

        let signal_handle = spawn_signal_listener(self.clone());

        let semaphore = Arc::new(Semaphore::new(config.pool_size()));
        let mut workers: JoinSet<()> = JoinSet::new();
        let mut empty_polls: i64 = 0;
        let mut run_result: Result<(), EngineError> = Ok(());

        loop {
            if self.inner.quit_requested.load(Ordering::SeqCst) {
                log::info!("quit requested; entering drain");
                break;
            }

            if config.max_failure_allowed() >= 0
                && self.inner.failures.load(Ordering::SeqCst) as i64 >= config.max_failure_allowed()
            {
                log::warn!(
                    "failure cap {} reached; quitting",
                    config.max_failure_allowed()
                );
                break;
            }

            let items = match queue.pop(config.each_size_from_queue()).await {
                Ok(items) => items,
                Err(e) => {
                    log::error!("queue backend failure during pop: {e}");
                    run_result = Err(e);
                    break;
                }
            };

            if items.is_empty() {
                empty_polls += 1;
                log::debug!("empty poll ({empty_polls}/{})", config.max_empty_retry());
                if config.max_empty_retry() >= 0 && empty_polls >= config.max_empty_retry() {
                    log::info!("max empty poll retries reached; quitting");
                    break;
                }
                tokio::time::sleep(config.pop_interval()).await;
                continue;
            }
            if config.reset_empty_polls_on_activity() {
                empty_polls = 0;
            }

            for item in items {
                let permit = Arc::clone(&semaphore)
                    .acquire_owned()
                    .await
                    .expect("semaphore is never closed");
                self.inner.active_workers.fetch_add(1, Ordering::SeqCst);

                let ctx = Arc::clone(&ctx);
                let inner = Arc::clone(&self.inner);
                let overrides = call_overrides.clone();
                workers.spawn(async move {
                    worker::run_item(&ctx, item, overrides).await;
                    inner.active_workers.fetch_sub(1, Ordering::SeqCst);
                    drop(permit);
                });

                if !config.request_interval().is_zero() {
                    tokio::time::sleep(config.request_interval()).await;
                }
            }

            tokio::time::sleep(config.pop_interval()).await;
        }

        {
            let mut state = self.inner.state.lock().unwrap();
            *state = EngineState::Draining;
        }
        while workers.join_next().await.is_some() {}

        signal_handle.abort();

        {
            let mut state = self.inner.state.lock().unwrap();
            *state = EngineState::Stopped;
        }
        run_result
    }
}

/// Spawns a task listening for `SIGINT`/`SIGQUIT`/`SIGTERM` and calling
/// `engine.quit()` on any of them, returning its `JoinHandle` so `run` can
/// abort it once it has returned. Mirrors the original's `gevent.signal`
/// installation, adapted to `tokio::signal::unix`.
fn spawn_signal_listener(engine: RequestEngine) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigint, mut sigquit, mut sigterm) = match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::quit()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(a), Ok(b), Ok(c)) => (a, b, c),
            _ => {
                log::error!("failed to install signal handlers; quit() must be called explicitly");
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => log::info!("received SIGINT"),
            _ = sigquit.recv() => log::info!("received SIGQUIT"),
            _ = sigterm.recv() => log::info!("received SIGTERM"),
        }
        engine.quit();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::DefaultUserAgentProvider;
    use crate::item::{Processors, RequestItem};
    use crate::queue::{InMemoryQueue, RequestQueue};
    use crate::registry::{AfterArgs, BeforeArgs};
    use serde_json::Value;
    use std::sync::Mutex as StdMutex;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn engine_quits_after_max_empty_retry_when_queue_stays_empty() {
        let engine = RequestEngine::new();
        engine
            .configure(
                EngineConfig::builder()
                    .max_empty_retry(2)
                    .pop_interval(std::time::Duration::from_millis(1))
                    .build(),
            )
            .attach_queue(Arc::new(InMemoryQueue::new()));

        engine.run().await.unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn engine_stops_new_batches_after_failure_cap_reached() {
        let queue = Arc::new(InMemoryQueue::new());
        queue
            .push(vec![
                RequestItem::new("get", "http://127.0.0.1:1/a"),
                RequestItem::new("get", "http://127.0.0.1:1/b"),
                RequestItem::new("get", "http://127.0.0.1:1/c"),
            ])
            .await
            .unwrap();

        let engine = RequestEngine::new();
        engine
            .configure(
                EngineConfig::builder()
                    .each_size_from_queue(1)
                    .max_failure_allowed(1)
                    .max_empty_retry(3)
                    .pop_interval(std::time::Duration::from_millis(1))
                    .build(),
            )
            .attach_queue(queue.clone());

        engine.run().await.unwrap();
        assert!(engine.failure_count() >= 1);
        // The cap is checked before `pop`, so once the first batch's failure
        // trips it the loop pops nothing further: only 1 of 3 items is ever
        // popped, leaving 2 still in the queue.
        assert_eq!(queue.pop(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn engine_runs_items_through_hooks_and_reports_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        struct RecordingAfter {
            seen: StdMutex<HashMap<String, bool>>,
        }
        impl Processor for RecordingAfter {
            fn process_before(&self, _args: BeforeArgs<'_>) -> Value {
                Value::Null
            }
            fn process_after(&self, args: AfterArgs<'_>) {
                let index = args
                    .extra
                    .and_then(|v| v.get("index"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("?")
                    .to_string();
                self.seen
                    .lock()
                    .unwrap()
                    .insert(format!("session_{index}"), args.result);
            }
        }
        let after = Arc::new(RecordingAfter {
            seen: StdMutex::new(HashMap::new()),
        });

        let queue = Arc::new(InMemoryQueue::new());
        queue
            .push(vec![
                RequestItem::new("get", server.uri())
                    .with_raw_info(serde_json::json!({"index": "1"}))
                    .with_processors(Processors {
                        before: None,
                        after: Some("after".into()),
                    }),
                RequestItem::new("get", "http://127.0.0.1:1/unreachable")
                    .with_raw_info(serde_json::json!({"index": "2"}))
                    .with_processors(Processors {
                        before: None,
                        after: Some("after".into()),
                    }),
            ])
            .await
            .unwrap();

        let engine = RequestEngine::new();
        engine
            .configure(
                EngineConfig::builder()
                    .max_empty_retry(1)
                    .pop_interval(std::time::Duration::from_millis(1))
                    .build(),
            )
            .attach_queue(queue)
            .set_user_agent(Arc::new(DefaultUserAgentProvider))
            .register_processor("after", after.clone());

        engine.run().await.unwrap();

        let seen = after.seen.lock().unwrap();
        assert_eq!(seen.get("session_1"), Some(&true));
        assert_eq!(seen.get("session_2"), Some(&false));
        assert_eq!(engine.worker_count(), 0);
    }

    #[tokio::test]
    async fn run_with_overrides_merges_into_every_items_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        struct CapturesCall {
            seen: StdMutex<Vec<Value>>,
        }
        impl Processor for CapturesCall {
            fn process_before(&self, args: BeforeArgs<'_>) -> Value {
                self.seen
                    .lock()
                    .unwrap()
                    .push(args.request.call().get("x-shared").cloned().unwrap_or(Value::Null));
                Value::Null
            }
        }
        let capture = Arc::new(CapturesCall {
            seen: StdMutex::new(Vec::new()),
        });

        let queue = Arc::new(InMemoryQueue::new());
        queue
            .push(vec![RequestItem::new("get", server.uri())
                .with_processors(Processors {
                    before: Some("capture".into()),
                    after: None,
                })])
            .await
            .unwrap();

        let engine = RequestEngine::new();
        engine
            .configure(
                EngineConfig::builder()
                    .max_empty_retry(1)
                    .pop_interval(std::time::Duration::from_millis(1))
                    .build(),
            )
            .attach_queue(queue)
            .register_processor("capture", capture.clone());

        let mut overrides = HashMap::new();
        overrides.insert("x-shared".to_string(), Value::String("shared-value".into()));
        engine.run_with_overrides(overrides).await.unwrap();

        assert_eq!(
            capture.seen.lock().unwrap().as_slice(),
            [Value::String("shared-value".into())]
        );
    }

    #[tokio::test]
    async fn running_twice_is_rejected() {
        let engine = RequestEngine::new();
        engine
            .configure(EngineConfig::builder().max_empty_retry(1).build())
            .attach_queue(Arc::new(InMemoryQueue::new()));
        engine.run().await.unwrap();
        assert!(matches!(engine.run().await, Err(EngineError::Validation(_))));
    }
}
