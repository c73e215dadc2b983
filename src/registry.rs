//! The `registry` module implements the name→callable routing the engine
//! uses for its before/after hooks: [`ProcessorRegistry`] maps a name to a
//! [`Processor`], with a reserved `default` slot that is always present
//! (possibly bound to nothing, in which case routing to it is a no-op).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::item::RequestItem;
use crate::worker::ResponseView;

/// Named arguments passed to a before-hook.
pub struct BeforeArgs<'a> {
    /// The item about to be dispatched.
    pub request: &'a RequestItem,
    /// The item's opaque `raw_info`, if any.
    pub extra: Option<&'a Value>,
    /// Per-item scratch map shared between the before and after phases.
    pub data: &'a mut Map<String, Value>,
}

/// Named arguments passed to an after-hook.
pub struct AfterArgs<'a> {
    /// The HTTP response, or `None` if the call was short-circuited or
    /// failed before a response was received.
    pub response: Option<&'a ResponseView>,
    /// The item that was dispatched.
    pub request: &'a RequestItem,
    /// The item's opaque `raw_info`, if any.
    pub extra: Option<&'a Value>,
    /// Whether the HTTP call succeeded (`true`) or failed/timed out
    /// (`false`).
    pub result: bool,
    /// Per-item scratch map shared between the before and after phases.
    pub data: &'a mut Map<String, Value>,
}

/// A named, routable hook.
///
/// Only the return value of the item's *before* hook is consulted by the
/// engine: returning exactly `Value::Bool(false)` short-circuits the HTTP
/// call and the after-hook for that item (§6, "Return value semantics").
/// All other return values — including `Value::Null`, returned by
/// [`Processor::process_before`]'s default implementation — allow the call
/// to proceed.
pub trait Processor: Send + Sync {
    /// Invoked when this processor is routed to as a before-hook.
    fn process_before(&self, _args: BeforeArgs<'_>) -> Value {
        Value::Null
    }

    /// Invoked when this processor is routed to as an after-hook, or as a
    /// `before_each`/`after_each` entry (whose return value is always
    /// ignored).
    fn process_after(&self, _args: AfterArgs<'_>) {}
}

/// Name→processor map routing hook invocations, with a reserved `default`
/// slot that is always present.
///
/// Routing to a name that was never [`ProcessorRegistry::set`] is a silent
/// no-op (logged at `trace`), not an error — this lets producers name hooks
/// freely without every consumer having to pre-declare every slot (see
/// `spec.md` §4.4 and the open question in §9, resolved in DESIGN.md).
#[derive(Clone)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn Processor>>,
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        let mut processors: HashMap<String, Arc<dyn Processor>> = HashMap::new();
        processors.insert("default".to_string(), Arc::new(NoopProcessor));
        Self { processors }
    }
}

/// A processor bound to `default` until the caller installs their own —
/// `process_before`/`process_after` both fall back to their default no-op
/// bodies.
struct NoopProcessor;
impl Processor for NoopProcessor {}

impl ProcessorRegistry {
    /// Creates a registry with only the reserved `default` slot (bound to a
    /// no-op processor).
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs or replaces the processor registered under `name`.
    pub fn set(&mut self, name: impl Into<String>, processor: Arc<dyn Processor>) {
        self.processors.insert(name.into(), processor);
    }

    /// Routes a before-hook invocation. `name = None` routes to `default`.
    /// Returns `Value::Null` if `name` is not registered.
    pub fn route_before(&self, name: Option<&str>, args: BeforeArgs<'_>) -> Value {
        match self.processors.get(name.unwrap_or("default")) {
            Some(processor) => processor.process_before(args),
            None => {
                log::trace!(
                    "no processor registered under name {:?}; before-hook routing is a no-op",
                    name
                );
                Value::Null
            }
        }
    }

    /// Routes an after-hook invocation. `name = None` routes to `default`.
    /// Silently does nothing if `name` is not registered.
    pub fn route_after(&self, name: Option<&str>, args: AfterArgs<'_>) {
        match self.processors.get(name.unwrap_or("default")) {
            Some(processor) => processor.process_after(args),
            None => {
                log::trace!(
                    "no processor registered under name {:?}; after-hook routing is a no-op",
                    name
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingProcessor {
        seen: Mutex<Vec<String>>,
    }

    impl Processor for RecordingProcessor {
        fn process_before(&self, args: BeforeArgs<'_>) -> Value {
            self.seen
                .lock()
                .unwrap()
                .push(args.request.url().unwrap_or_default().to_string());
            Value::Null
        }
    }

    #[test]
    fn routes_to_default_when_name_is_none() {
        let mut registry = ProcessorRegistry::new();
        let processor = Arc::new(RecordingProcessor {
            seen: Mutex::new(Vec::new()),
        });
        registry.set("default", processor.clone());

        let item = RequestItem::new("get", "http://example.com/");
        let mut data = Map::new();
        let result = registry.route_before(
            None,
            BeforeArgs {
                request: &item,
                extra: None,
                data: &mut data,
            },
        );
        assert_eq!(result, Value::Null);
        assert_eq!(processor.seen.lock().unwrap().as_slice(), ["http://example.com/"]);
    }

    #[test]
    fn routing_to_unknown_name_is_a_silent_noop() {
        let registry = ProcessorRegistry::new();
        let item = RequestItem::new("get", "http://example.com/");
        let mut data = Map::new();
        let result = registry.route_before(
            Some("does-not-exist"),
            BeforeArgs {
                request: &item,
                extra: None,
                data: &mut data,
            },
        );
        assert_eq!(result, Value::Null);
    }

    #[test]
    fn before_hook_returning_false_short_circuits() {
        struct StopProcessor;
        impl Processor for StopProcessor {
            fn process_before(&self, _args: BeforeArgs<'_>) -> Value {
                Value::Bool(false)
            }
        }
        let mut registry = ProcessorRegistry::new();
        registry.set("stop", Arc::new(StopProcessor));
        let item = RequestItem::new("get", "http://example.com/");
        let mut data = Map::new();
        let result = registry.route_before(
            Some("stop"),
            BeforeArgs {
                request: &item,
                extra: None,
                data: &mut data,
            },
        );
        assert_eq!(result, Value::Bool(false));
    }
}
