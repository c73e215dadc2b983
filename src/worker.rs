//! The `worker` module implements the per-item pipeline: prepare the call,
//! run the before-hook(s), conditionally perform the HTTP call under a
//! timeout, run the after-hook(s), and notify the proxy provider of the
//! outcome. This is the body that `RequestEngine::run`'s dispatch loop
//! spawns once per popped item (`spec.md` §4.5.3).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::{Map, Value};

use crate::error::EngineError;
use crate::identity::{ProxyProvider, UserAgentProvider};
use crate::item::RequestItem;
use crate::registry::{AfterArgs, BeforeArgs, ProcessorRegistry};

/// A minimal, engine-owned snapshot of an HTTP response.
///
/// Hooks receive this instead of a live `reqwest::Response` because the
/// engine has already consumed the response body to determine `result`, and
/// `reqwest::Response`'s body cannot be read twice.
#[derive(Debug, Clone)]
pub struct ResponseView {
    /// The HTTP status code.
    pub status: u16,
    /// Response headers, lower-cased names.
    pub headers: HashMap<String, String>,
    /// Response body bytes.
    pub body: Vec<u8>,
    /// The item's opaque `raw_info`, attached onto the response for hook
    /// visibility, matching the original's `ar.raw_info = request.raw_info`.
    pub raw_info: Option<Value>,
}

/// Dependencies a worker needs to execute one item's pipeline. Bundled
/// behind `Arc` clones so the dispatch loop can cheaply hand a copy to every
/// spawned task.
pub struct WorkerContext {
    pub(crate) http_client: Client,
    pub(crate) registry: Arc<ProcessorRegistry>,
    pub(crate) user_agent_provider: Option<Arc<dyn UserAgentProvider>>,
    pub(crate) proxy_provider: Option<Arc<dyn ProxyProvider>>,
    pub(crate) before_each: Arc<Vec<String>>,
    pub(crate) after_each: Arc<Vec<String>>,
    pub(crate) default_timeout: Duration,
    pub(crate) failures: Arc<AtomicU64>,
}

/// Executes the full pipeline for one item: prepare → before-hooks →
/// \[HTTP\] → after-hooks → proxy callback. At most one increment of
/// `ctx.failures` happens per call, regardless of how many phases raised
/// (`spec.md` §4.5.3 step E, §8 "At-most-one failure per item").
pub async fn run_item(ctx: &WorkerContext, mut item: RequestItem, overrides: HashMap<String, Value>) {
    let mut failure_recorded = false;
    let mut record_failure = || {
        if !failure_recorded {
            failure_recorded = true;
            ctx.failures.fetch_add(1, Ordering::SeqCst);
        }
    };

    // --- A. Prepare call ---
    item.call_mut().extend(overrides);

    if let Some(ua_provider) = &ctx.user_agent_provider {
        let ua = ua_provider.provide();
        inject_header(&mut item, "User-Agent", ua);
    }

    let mut proxy = None;
    if let Some(proxy_provider) = &ctx.proxy_provider {
        if let Some(p) = proxy_provider.provide().await {
            inject_proxy(&mut item, &p.endpoint);
            log::debug!("using proxy {} ({})", p.endpoint, p.id);
            proxy = Some(p);
        } else {
            log::debug!("proxy provider returned no endpoint; issuing without a proxy");
        }
    }

    // --- B. Before hooks ---
    // A panicking hook is treated like the original's bare `except:` around
    // this phase: caught, counted as one failure, logged, and execution
    // continues into the HTTP phase as if the before-hook had returned
    // nothing (i.e. not the literal `false` that would short-circuit it).
    // The item's own before-hook is wrapped in its own `catch_unwind`,
    // separate from the `before_each` loop: only this return value can
    // short-circuit the request, so a `before_each` hook panicking later
    // must never erase an already-obtained `false` (`spec.md` §8
    // "Short-circuit").
    let processors = item.processors().cloned().unwrap_or_default();
    let mut data = Map::new();

    log::info!("executing before hook for {:?}", item.url());
    let before_outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        ctx.registry.route_before(
            processors.before.as_deref(),
            BeforeArgs {
                request: &item,
                extra: item.raw_info(),
                data: &mut data,
            },
        )
    }));
    let before_result = match before_outcome {
        Ok(value) => value,
        Err(panic) => {
            let err = EngineError::Hook(panic_message(&panic));
            log::error!("panic while executing before hook for {:?}: {err}", item.url());
            record_failure();
            Value::Null
        }
    };

    for name in ctx.before_each.iter() {
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ctx.registry.route_before(
                Some(name.as_str()),
                BeforeArgs {
                    request: &item,
                    extra: item.raw_info(),
                    data: &mut data,
                },
            );
        }));
        if let Err(panic) = outcome {
            let err = EngineError::Hook(panic_message(&panic));
            log::error!(
                "panic while executing before_each hook {name:?} for {:?}: {err}",
                item.url()
            );
            record_failure();
        }
    }

    // --- C. HTTP call (conditional on before hook not returning literal false) ---
    if before_result != Value::Bool(false) {
        let timeout = item
            .timeout_override_ms()
            .map(Duration::from_millis)
            .unwrap_or(ctx.default_timeout);

        let (result, response) = match execute_call(&ctx.http_client, &item, timeout).await {
            Ok(view) => (true, Some(view)),
            Err(e) => {
                log::error!("request failed for {:?}: {e}", item.url());
                record_failure();
                (false, None)
            }
        };

        // --- D. After hooks ---
        // Same panic-as-exception treatment as the before phase, one
        // `catch_unwind` per hook so a panic in one `after_each` entry
        // cannot prevent the rest from running.
        log::info!("executing after hook for {:?}, result={result}", item.url());
        let after_outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ctx.registry.route_after(
                processors.after.as_deref(),
                AfterArgs {
                    response: response.as_ref(),
                    request: &item,
                    extra: item.raw_info(),
                    result,
                    data: &mut data,
                },
            );
        }));
        if let Err(panic) = after_outcome {
            let err = EngineError::Hook(panic_message(&panic));
            log::error!("panic while executing after hook for {:?}: {err}", item.url());
            record_failure();
        }

        for name in ctx.after_each.iter() {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                ctx.registry.route_after(
                    Some(name.as_str()),
                    AfterArgs {
                        response: response.as_ref(),
                        request: &item,
                        extra: item.raw_info(),
                        result,
                        data: &mut data,
                    },
                );
            }));
            if let Err(panic) = outcome {
                let err = EngineError::Hook(panic_message(&panic));
                log::error!(
                    "panic while executing after_each hook {name:?} for {:?}: {err}",
                    item.url()
                );
                record_failure();
            }
        }

        if let (Some(proxy_provider), Some(proxy)) = (&ctx.proxy_provider, &proxy) {
            proxy_provider
                .callback(proxy, result, response.as_ref(), &item)
                .await;
        }
    } else {
        log::debug!("before hook short-circuited request for {:?}", item.url());
    }
}

/// Extracts a human-readable message from a caught panic payload.
fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn inject_header(item: &mut RequestItem, name: &str, value: String) {
    let headers_value = item
        .call_mut()
        .entry("headers".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(map) = headers_value {
        map.insert(name.to_string(), Value::String(value));
    }
}

fn inject_proxy(item: &mut RequestItem, endpoint: &str) {
    let proxies_value = item
        .call_mut()
        .entry("proxies".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(map) = proxies_value {
        map.insert("http".to_string(), Value::String(endpoint.to_string()));
        map.insert("https".to_string(), Value::String(endpoint.to_string()));
    }
}

/// Performs the HTTP call described by `item.call()`, enforcing `timeout` as
/// a hard bound (`spec.md` §4.5.3 step C, §8 "Timeout bound").
async fn execute_call(
    client: &Client,
    item: &RequestItem,
    timeout: Duration,
) -> Result<ResponseView, crate::error::EngineError> {
    let method = item
        .method()
        .ok_or_else(|| crate::error::EngineError::InvalidCall("missing method".into()))?;
    let url = item
        .url()
        .ok_or_else(|| crate::error::EngineError::InvalidCall("missing url".into()))?;
    let method: reqwest::Method = method
        .parse()
        .map_err(|_| crate::error::EngineError::InvalidCall(format!("unknown method {method}")))?;

    let mut builder = client.request(method, url);

    if let Some(Value::Object(headers)) = item.call().get("headers") {
        for (k, v) in headers {
            if let Some(v) = v.as_str() {
                builder = builder.header(k, v);
            }
        }
    }
    if let Some(body) = item.call().get("body") {
        if let Some(s) = body.as_str() {
            builder = builder.body(s.to_string());
        } else {
            builder = builder.json(body);
        }
    }
    if let Some(Value::Object(query)) = item.call().get("query") {
        let pairs: Vec<(String, String)> = query
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect();
        builder = builder.query(&pairs);
    }

    let call = async {
        let response = builder.send().await.map_err(crate::error::EngineError::Request)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(crate::error::EngineError::Request)?
            .to_vec();
        Ok::<_, crate::error::EngineError>((status, headers, body))
    };
    let (status, headers, body) = tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| crate::error::EngineError::Timeout(timeout))??;

    Ok(ResponseView {
        status,
        headers,
        body,
        raw_info: item.raw_info().cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Processor;
    use std::sync::Mutex;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct RecordingAfter {
        seen: Mutex<HashMap<String, bool>>,
    }

    impl Processor for RecordingAfter {
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

    fn ctx_with_registry(registry: ProcessorRegistry) -> WorkerContext {
        WorkerContext {
            http_client: Client::new(),
            registry: Arc::new(registry),
            user_agent_provider: None,
            proxy_provider: None,
            before_each: Arc::new(Vec::new()),
            after_each: Arc::new(Vec::new()),
            default_timeout: Duration::from_secs(5),
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    #[tokio::test]
    async fn successful_call_marks_result_true() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let after = Arc::new(RecordingAfter {
            seen: Mutex::new(HashMap::new()),
        });
        let mut registry = ProcessorRegistry::new();
        registry.set("after", after.clone());

        let ctx = ctx_with_registry(registry);
        let item = RequestItem::new("get", server.uri())
            .with_raw_info(serde_json::json!({"index": "1"}))
            .with_processors(crate::item::Processors {
                before: None,
                after: Some("after".into()),
            });

        run_item(&ctx, item, HashMap::new()).await;

        assert_eq!(after.seen.lock().unwrap().get("session_1"), Some(&true));
        assert_eq!(ctx.failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unreachable_host_marks_result_false_and_counts_one_failure() {
        let after = Arc::new(RecordingAfter {
            seen: Mutex::new(HashMap::new()),
        });
        let mut registry = ProcessorRegistry::new();
        registry.set("after", after.clone());

        let ctx = ctx_with_registry(registry);
        let item = RequestItem::new("get", "http://127.0.0.1:1/unreachable")
            .with_raw_info(serde_json::json!({"index": "3"}))
            .with_processors(crate::item::Processors {
                before: None,
                after: Some("after".into()),
            });

        run_item(&ctx, item, HashMap::new()).await;

        assert_eq!(after.seen.lock().unwrap().get("session_3"), Some(&false));
        assert_eq!(ctx.failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn before_hook_false_short_circuits_http_and_after_hook() {
        struct StopBefore;
        impl Processor for StopBefore {
            fn process_before(&self, _args: BeforeArgs<'_>) -> Value {
                Value::Bool(false)
            }
        }
        struct PanicsIfCalledAfter;
        impl Processor for PanicsIfCalledAfter {
            fn process_after(&self, _args: AfterArgs<'_>) {
                panic!("after-hook must not run when before-hook short-circuits");
            }
        }

        let mut registry = ProcessorRegistry::new();
        registry.set("before", Arc::new(StopBefore));
        registry.set("after", Arc::new(PanicsIfCalledAfter));

        let ctx = ctx_with_registry(registry);
        let item = RequestItem::new("get", "http://127.0.0.1:1/should-not-be-hit")
            .with_processors(crate::item::Processors {
                before: Some("before".into()),
                after: Some("after".into()),
            });

        run_item(&ctx, item, HashMap::new()).await;
        assert_eq!(ctx.failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panicking_before_each_cannot_undo_a_short_circuit_from_the_main_before_hook() {
        struct StopBefore;
        impl Processor for StopBefore {
            fn process_before(&self, _args: BeforeArgs<'_>) -> Value {
                Value::Bool(false)
            }
        }
        struct PanicsOnBefore;
        impl Processor for PanicsOnBefore {
            fn process_before(&self, _args: BeforeArgs<'_>) -> Value {
                panic!("before_each blew up");
            }
        }
        struct PanicsIfCalledAfter;
        impl Processor for PanicsIfCalledAfter {
            fn process_after(&self, _args: AfterArgs<'_>) {
                panic!("after-hook must not run when before-hook short-circuits");
            }
        }

        let mut registry = ProcessorRegistry::new();
        registry.set("before", Arc::new(StopBefore));
        registry.set("before_each", Arc::new(PanicsOnBefore));
        registry.set("after", Arc::new(PanicsIfCalledAfter));

        let mut ctx = ctx_with_registry(registry);
        ctx.before_each = Arc::new(vec!["before_each".to_string()]);
        let item = RequestItem::new("get", "http://127.0.0.1:1/should-not-be-hit")
            .with_processors(crate::item::Processors {
                before: Some("before".into()),
                after: Some("after".into()),
            });

        run_item(&ctx, item, HashMap::new()).await;
        assert_eq!(ctx.failures.load(Ordering::SeqCst), 1);
    }
}
