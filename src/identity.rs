//! The `identity` module provides the two pluggable identity sources a
//! worker may consult before dispatching a request: a [`UserAgentProvider`]
//! and a [`ProxyProvider`]. Both are optional on the engine — it only ever
//! interacts through these traits and must stay correct when either (or
//! both) is absent.

use async_trait::async_trait;

use crate::item::RequestItem;
use crate::worker::ResponseView;

/// Stateless source of `User-Agent` header values.
///
/// [`DefaultUserAgentProvider`] returns a uniformly random element from a
/// fixed built-in list, matching the reference implementation's behavior.
pub trait UserAgentProvider: Send + Sync {
    /// Returns the next `User-Agent` string to attach to an outgoing
    /// request.
    fn provide(&self) -> String;
}

/// The default [`UserAgentProvider`]: picks uniformly at random from a fixed
/// list of common desktop browser strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultUserAgentProvider;

/// Built-in user-agent pool.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 6.1; WOW64; rv:24.0) Gecko/20100101 Firefox/24.0",
    "Mozilla/5.0 (Windows NT 6.1; WOW64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/30.0.1599.69 Safari/537.36",
    "Mozilla/5.0 (Windows NT 6.1; WOW64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/30.0.1599.101 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_8_5) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/30.0.1599.69 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_8_5) AppleWebKit/536.30.1 (KHTML, like Gecko) Version/6.0.5 Safari/536.30.1",
    "Mozilla/5.0 (Windows NT 6.1; WOW64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/29.0.1547.76 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_8_5) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/30.0.1599.101 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.8; rv:24.0) Gecko/20100101 Firefox/24.0",
    "Mozilla/5.0 (Windows NT 6.1; rv:24.0) Gecko/20100101 Firefox/24.0",
    "Mozilla/5.0 (Windows NT 5.1; rv:24.0) Gecko/20100101 Firefox/24.0",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:24.0) Gecko/20100101 Firefox/24.0",
];

impl UserAgentProvider for DefaultUserAgentProvider {
    fn provide(&self) -> String {
        use rand::seq::SliceRandom;
        let mut rng = rand::thread_rng();
        USER_AGENTS
            .choose(&mut rng)
            .expect("USER_AGENTS is non-empty")
            .to_string()
    }
}

/// A proxy endpoint handed out by a [`ProxyProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResult {
    /// Provider-assigned identifier for this endpoint, passed back verbatim
    /// to [`ProxyProvider::callback`] so the provider can score/rotate it.
    pub id: String,
    /// The proxy endpoint itself (e.g. `"http://10.0.0.1:8080"`).
    pub endpoint: String,
}

/// Source of proxy endpoints, with an outcome callback so the provider may
/// score or rotate endpoints based on observed success/failure.
#[async_trait]
pub trait ProxyProvider: Send + Sync {
    /// Returns the next proxy endpoint to use, or `None` to issue the
    /// request without a proxy.
    async fn provide(&self) -> Option<ProxyResult>;

    /// Notifies the provider of the outcome of a request that used `proxy`.
    async fn callback(
        &self,
        proxy: &ProxyResult,
        ok: bool,
        response: Option<&ResponseView>,
        request: &RequestItem,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_user_agent_provider_always_returns_a_known_string() {
        let provider = DefaultUserAgentProvider;
        for _ in 0..50 {
            assert!(USER_AGENTS.contains(&provider.provide().as_str()));
        }
    }
}
