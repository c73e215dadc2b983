//! The `item` module defines [`RequestItem`], the immutable-ish descriptor of
//! one HTTP call plus opaque metadata and named hook selectors that flows
//! through the engine: producers build it, [`RequestItem::encode`] it onto a
//! [`crate::queue::RequestQueue`], and a worker [`RequestItem::decode`]s it
//! back out after `pop`.
//!
//! # Examples
//!
//! ```rust
//! use fetch_swarm::item::RequestItem;
//!
//! let item = RequestItem::new("get", "http://www.example.com/");
//! assert_eq!(item.dumps()["method"], "get");
//! assert_eq!(item.dumps()["url"], "http://www.example.com/");
//!
//! let bytes = item.encode().unwrap();
//! let round_tripped = RequestItem::decode(&bytes).unwrap();
//! assert_eq!(item, round_tripped);
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;

/// Named hook selectors for one request item.
///
/// `before`/`after` name entries in the engine's [`crate::registry::ProcessorRegistry`].
/// A `None` name routes to the registry's reserved `default` slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Processors {
    /// Name of the before-hook to route to for this item.
    pub before: Option<String>,
    /// Name of the after-hook to route to for this item.
    pub after: Option<String>,
}

impl Processors {
    /// Returns `true` when neither `before` nor `after` is set — this is the
    /// condition under which [`RequestItem::dumps`] omits the `processors`
    /// key entirely, matching the spec's "encode omits absent optional
    /// fields" guarantee.
    fn is_empty(&self) -> bool {
        self.before.is_none() && self.after.is_none()
    }
}

/// Immutable-ish descriptor of one HTTP call plus opaque metadata and named
/// hook selectors.
///
/// `call.method` and `call.url` are always present once a `RequestItem` has
/// been constructed or decoded — [`RequestItem::new`] takes them explicitly,
/// and [`RequestItem::decode`] validates their presence in the decoded map.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestItem {
    call: HashMap<String, Value>,
    raw_info: Option<Value>,
    processors: Option<Processors>,
}

impl RequestItem {
    /// Builds a new item from an HTTP method and URL. Additional call
    /// parameters (headers, body, query, timeout override, ...) can be added
    /// with [`RequestItem::set_call_field`] or merged in bulk with
    /// [`RequestItem::update`].
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        let mut call = HashMap::new();
        call.insert("method".to_string(), Value::String(method.into()));
        call.insert("url".to_string(), Value::String(url.into()));
        Self {
            call,
            raw_info: None,
            processors: None,
        }
    }

    /// Attaches before/after hook names to this item.
    pub fn with_processors(mut self, processors: Processors) -> Self {
        if !processors.is_empty() {
            self.processors = Some(processors);
        }
        self
    }

    /// Attaches opaque, hook-visible metadata to this item.
    pub fn with_raw_info(mut self, raw_info: Value) -> Self {
        self.raw_info = Some(raw_info);
        self
    }

    /// Sets one field on the `call` map (e.g. `"headers"`, `"body"`,
    /// `"timeout"`, `"query"`). Overwrites any existing value for `key`.
    pub fn set_call_field(&mut self, key: impl Into<String>, value: Value) {
        self.call.insert(key.into(), value);
    }

    /// Partial overwrite: merges `overrides` into the call map, and replaces
    /// `processors`/`raw_info` only when the corresponding argument is
    /// `Some`. Unspecified fields are left unchanged.
    pub fn update(
        &mut self,
        processors: Option<Processors>,
        raw_info: Option<Value>,
        overrides: HashMap<String, Value>,
    ) {
        if let Some(p) = processors {
            self.processors = if p.is_empty() { None } else { Some(p) };
        }
        if let Some(r) = raw_info {
            self.raw_info = Some(r);
        }
        self.call.extend(overrides);
    }

    /// Decodes a binary-encoded item previously produced by
    /// [`RequestItem::encode`].
    ///
    /// The wire format is a self-describing MessagePack map: the HTTP-call
    /// keys sit at the top level alongside the optional `raw_info`/
    /// `processors` keys, mirroring [`RequestItem::dumps`] exactly — any
    /// MessagePack-capable producer, not just this crate, can write a
    /// directly-decodable queue entry (`spec.md` §1, §6).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Decode`] if `bytes` is not a well-formed
    /// encoding, or if the decoded call map is missing `method`/`url`.
    pub fn decode(bytes: &[u8]) -> Result<Self, EngineError> {
        let mut map: serde_json::Map<String, Value> = rmp_serde::from_slice(bytes)
            .map_err(|e| EngineError::Decode(format!("malformed message: {e}")))?;
        let raw_info = map.remove("raw_info");
        let processors = map
            .remove("processors")
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| EngineError::Decode(format!("malformed processors: {e}")))?;
        let call: HashMap<String, Value> = map.into_iter().collect();

        if !call.contains_key("method") {
            return Err(EngineError::Decode("missing `method` field".into()));
        }
        if !call.contains_key("url") {
            return Err(EngineError::Decode("missing `url` field".into()));
        }
        Ok(Self {
            call,
            raw_info,
            processors,
        })
    }

    /// Returns a single mapping containing `call`, and, only when
    /// non-empty, the keys `raw_info` and `processors`. This mapping is the
    /// canonical pre-encoding view used both by [`RequestItem::encode`] and
    /// by producers who want to inspect the item as plain JSON.
    pub fn dumps(&self) -> serde_json::Map<String, Value> {
        let mut map = serde_json::Map::new();
        for (k, v) in &self.call {
            map.insert(k.clone(), v.clone());
        }
        if let Some(raw_info) = &self.raw_info {
            map.insert("raw_info".to_string(), raw_info.clone());
        }
        if let Some(processors) = &self.processors {
            if !processors.is_empty() {
                map.insert(
                    "processors".to_string(),
                    serde_json::to_value(processors).expect("Processors always serializes"),
                );
            }
        }
        map
    }

    /// Binary-serializes this item for pushing onto a
    /// [`crate::queue::RequestQueue`]. `decode(encode(x)) == x` for any item
    /// constructed through this module's public API. Serializes
    /// [`RequestItem::dumps`]'s map view directly, so the encoded bytes are a
    /// flat MessagePack map with the HTTP-call keys at the top level.
    pub fn encode(&self) -> Result<Vec<u8>, EngineError> {
        rmp_serde::to_vec(&self.dumps())
            .map_err(|e| EngineError::Decode(format!("failed to serialize item: {e}")))
    }

    /// The HTTP method for this item (e.g. `"get"`, `"post"`).
    pub fn method(&self) -> Option<&str> {
        self.call.get("method").and_then(Value::as_str)
    }

    /// The URL for this item.
    pub fn url(&self) -> Option<&str> {
        self.call.get("url").and_then(Value::as_str)
    }

    /// Read-only view of the call map.
    pub fn call(&self) -> &HashMap<String, Value> {
        &self.call
    }

    /// Mutable view of the call map — used by the worker pipeline to inject
    /// a rotating `User-Agent` header and proxy before dispatch.
    pub fn call_mut(&mut self) -> &mut HashMap<String, Value> {
        &mut self.call
    }

    /// Opaque, hook-visible metadata attached to this item.
    pub fn raw_info(&self) -> Option<&Value> {
        self.raw_info.as_ref()
    }

    /// Named hook selectors for this item.
    pub fn processors(&self) -> Option<&Processors> {
        self.processors.as_ref()
    }

    /// Reads the per-item timeout override from `raw_info._timeout`, in
    /// milliseconds, if present.
    pub fn timeout_override_ms(&self) -> Option<u64> {
        self.raw_info
            .as_ref()?
            .get("_timeout")?
            .as_u64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dumps_is_just_method_and_url_for_a_bare_item() {
        let item = RequestItem::new("get", "http://www.baidu.com/");
        let dumped = item.dumps();
        assert_eq!(dumped.len(), 2);
        assert_eq!(dumped["method"], "get");
        assert_eq!(dumped["url"], "http://www.baidu.com/");
    }

    #[test]
    fn dumps_includes_raw_info_when_present() {
        let item = RequestItem::new("get", "http://www.baidu.com/")
            .with_raw_info(serde_json::json!({"data1": 111, "data2": 222}));
        let dumped = item.dumps();
        assert_eq!(dumped["raw_info"], serde_json::json!({"data1": 111, "data2": 222}));
    }

    #[test]
    fn dumps_omits_processors_when_both_names_are_absent() {
        let item =
            RequestItem::new("get", "http://www.baidu.com/").with_processors(Processors::default());
        assert!(!item.dumps().contains_key("processors"));
    }

    #[test]
    fn round_trip_preserves_equality() {
        let item = RequestItem::new("post", "http://example.com/submit")
            .with_raw_info(serde_json::json!({"index": "1"}))
            .with_processors(Processors {
                before: Some("before".into()),
                after: Some("after".into()),
            });
        let bytes = item.encode().unwrap();
        let round_tripped = RequestItem::decode(&bytes).unwrap();
        assert_eq!(item, round_tripped);
    }

    #[test]
    fn decode_rejects_missing_url() {
        let mut map = serde_json::Map::new();
        map.insert("method".to_string(), Value::String("get".into()));
        let bytes = rmp_serde::to_vec(&map).unwrap();
        assert!(matches!(
            RequestItem::decode(&bytes),
            Err(EngineError::Decode(_))
        ));
    }

    #[test]
    fn decode_rejects_garbage_bytes() {
        assert!(matches!(
            RequestItem::decode(&[0xff, 0x00, 0x01]),
            Err(EngineError::Decode(_))
        ));
    }

    #[test]
    fn encoded_bytes_are_a_flat_messagepack_map_with_call_keys_at_top_level() {
        let item = RequestItem::new("get", "http://www.baidu.com/")
            .with_raw_info(serde_json::json!({"index": "1"}));
        let bytes = item.encode().unwrap();
        let map: serde_json::Map<String, Value> = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(map.get("method"), Some(&Value::String("get".into())));
        assert_eq!(
            map.get("url"),
            Some(&Value::String("http://www.baidu.com/".into()))
        );
        assert!(map.contains_key("raw_info"));
    }

    #[test]
    fn timeout_override_reads_raw_info_underscore_timeout() {
        let item = RequestItem::new("get", "http://example.com/")
            .with_raw_info(serde_json::json!({"_timeout": 2500}));
        assert_eq!(item.timeout_override_ms(), Some(2500));
    }
}
