//! Endpoints and path routing.
//!
//! An [`Endpoint`] pairs a regular expression with a [`Handlers`] bundle.
//! The [`EndpointRegistry`] keeps endpoints in registration order and the
//! first one whose pattern matches the whole request path wins.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use tracing::debug;

use crate::connection::Connection;
use crate::error::{WsError, WsResult};
use crate::message::Message;
use crate::registry::ConnectionRegistry;

/// Called once after the handshake, before any message is delivered.
pub type OpenHandler = Arc<dyn Fn(&Arc<Connection>) + Send + Sync>;
/// Called for every complete text or binary message, in wire order.
pub type MessageHandler = Arc<dyn Fn(&Arc<Connection>, Message) + Send + Sync>;
/// Called once when the close handshake completes, with the status code and reason.
pub type CloseHandler = Arc<dyn Fn(&Arc<Connection>, u16, &str) + Send + Sync>;
/// Called when the connection fails or a handler panics.
pub type ErrorHandler = Arc<dyn Fn(&Arc<Connection>, &WsError) + Send + Sync>;

/// The callbacks of one endpoint. Every callback is optional.
///
/// Callbacks for one connection run one at a time on that connection's
/// driver task; they should not block.
///
/// ```rust
/// use socketry_ws::Handlers;
///
/// let handlers = Handlers::new()
///     .on_message(|conn, msg| conn.send(msg))
///     .on_close(|conn, code, _reason| println!("{} closed with {code}", conn.id()));
/// ```
#[derive(Clone, Default)]
pub struct Handlers {
    pub(crate) on_open: Option<OpenHandler>,
    pub(crate) on_message: Option<MessageHandler>,
    pub(crate) on_close: Option<CloseHandler>,
    pub(crate) on_error: Option<ErrorHandler>,
}

impl Handlers {
    /// An empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the open handler.
    #[must_use]
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Connection>) + Send + Sync + 'static,
    {
        self.on_open = Some(Arc::new(f));
        self
    }

    /// Set the message handler.
    #[must_use]
    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Connection>, Message) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(f));
        self
    }

    /// Set the close handler.
    #[must_use]
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Connection>, u16, &str) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(f));
        self
    }

    /// Set the error handler.
    #[must_use]
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Connection>, &WsError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("on_open", &self.on_open.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// A registered path pattern with its handlers and live connections.
#[derive(Debug)]
pub struct Endpoint {
    pattern: String,
    matcher: Regex,
    handlers: Handlers,
    connections: ConnectionRegistry,
}

impl Endpoint {
    /// Compile `pattern` into an endpoint.
    ///
    /// The pattern must match the entire request path; `^` and `$` anchors
    /// are allowed but not required.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::InvalidPattern`] if the pattern does not compile.
    pub fn new(pattern: &str, handlers: Handlers) -> WsResult<Self> {
        let matcher = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
            WsError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            pattern: pattern.to_string(),
            matcher,
            handlers,
            connections: ConnectionRegistry::new(),
        })
    }

    /// The pattern as registered.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The endpoint's callbacks.
    pub fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    /// Connections currently routed to this endpoint.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Snapshot of the connections routed to this endpoint.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.all()
    }

    /// Match `path`, returning its capture groups (index 0 is the whole path).
    pub fn matches(&self, path: &str) -> Option<Vec<Option<String>>> {
        let captures = self.matcher.captures(path)?;
        Some(
            captures
                .iter()
                .map(|group| group.map(|m| m.as_str().to_string()))
                .collect(),
        )
    }
}

/// Ordered endpoint table.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: RwLock<Vec<Arc<Endpoint>>>,
}

impl EndpointRegistry {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::InvalidPattern`] if the pattern does not compile.
    pub fn register(&self, pattern: &str, handlers: Handlers) -> WsResult<Arc<Endpoint>> {
        let endpoint = Arc::new(Endpoint::new(pattern, handlers)?);
        let mut endpoints = self.endpoints.write();
        endpoints.push(Arc::clone(&endpoint));
        debug!(pattern, position = endpoints.len() - 1, "Endpoint registered");
        Ok(endpoint)
    }

    /// The first endpoint, in registration order, matching `path`.
    pub fn resolve(&self, path: &str) -> Option<(Arc<Endpoint>, Vec<Option<String>>)> {
        self.endpoints
            .read()
            .iter()
            .find_map(|endpoint| endpoint.matches(path).map(|groups| (Arc::clone(endpoint), groups)))
    }

    /// All endpoints in registration order.
    pub fn all(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints.read().clone()
    }

    /// Number of registered endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    /// Whether no endpoints are registered.
    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_pattern() {
        let registry = EndpointRegistry::new();
        let err = registry.register("^/broken(", Handlers::new()).unwrap_err();
        assert!(matches!(err, WsError::InvalidPattern { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_first_registered_match_wins() {
        let registry = EndpointRegistry::new();
        let first = registry.register("^/a.*$", Handlers::new()).unwrap();
        registry.register("^/a/b$", Handlers::new()).unwrap();

        for _ in 0..10 {
            let (endpoint, _) = registry.resolve("/a/b").unwrap();
            assert!(Arc::ptr_eq(&endpoint, &first));
        }
    }

    #[test]
    fn test_whole_path_must_match() {
        let registry = EndpointRegistry::new();
        registry.register("/echo", Handlers::new()).unwrap();
        assert!(registry.resolve("/echo").is_some());
        assert!(registry.resolve("/echo/extra").is_none());
        assert!(registry.resolve("/prefix/echo").is_none());
    }

    #[test]
    fn test_optional_trailing_slash() {
        let registry = EndpointRegistry::new();
        registry.register("^/echo_thrice/?$", Handlers::new()).unwrap();
        assert!(registry.resolve("/echo_thrice").is_some());
        assert!(registry.resolve("/echo_thrice/").is_some());
        assert!(registry.resolve("/echo_thrice//").is_none());
    }

    #[test]
    fn test_capture_groups() {
        let registry = EndpointRegistry::new();
        registry
            .register(r"^/rooms/(\w+)/(\d+)?$", Handlers::new())
            .unwrap();

        let (_, groups) = registry.resolve("/rooms/lobby/").unwrap();
        assert_eq!(
            groups,
            vec![Some("/rooms/lobby/".to_string()), Some("lobby".to_string()), None]
        );
    }

    #[test]
    fn test_no_match() {
        let registry = EndpointRegistry::new();
        registry.register("^/echo/?$", Handlers::new()).unwrap();
        assert!(registry.resolve("/missing").is_none());
    }

    #[test]
    fn test_handlers_debug() {
        let handlers = Handlers::new().on_message(|_, _| {});
        let debug = format!("{handlers:?}");
        assert!(debug.contains("on_message: true"));
        assert!(debug.contains("on_open: false"));
    }
}
