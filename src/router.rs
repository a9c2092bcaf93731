//! Function-name routing for incoming tells and asks.
//!
//! A [`Router`] maps function names to typed handlers. Tell handlers consume a
//! body and produce nothing; ask handlers produce a body or a failure that is
//! sent back as the reply. Routers are assembled at configuration time and are
//! immutable once an endpoint starts.

use std::{collections::HashMap, fmt, future::Future, sync::Arc};

use futures::{FutureExt, future::BoxFuture};
use serde::Serialize;
use serde_json::Value;

use crate::{
    endpoint::Endpoint,
    error::{Error, Result},
    message::validate_function_name,
};

/// Optional JSON payload carried by tells, asks, and replies.
pub type Body = Option<Value>;

/// Boxed tell handler.
pub type TellHandler = dyn Fn(Endpoint, Body) -> BoxFuture<'static, ()> + Send + Sync;

/// Boxed ask handler. `Err` carries the failure text sent to the peer.
pub type AskHandler =
    dyn Fn(Endpoint, Body) -> BoxFuture<'static, std::result::Result<Body, String>> + Send + Sync;

/// A registered handler.
#[derive(Clone)]
pub enum Handler {
    /// Handler for one-way notifications.
    Tell(Arc<TellHandler>),
    /// Handler producing a reply.
    Ask(Arc<AskHandler>),
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tell(_) => f.write_str("Handler::Tell(<handler>)"),
            Self::Ask(_) => f.write_str("Handler::Ask(<handler>)"),
        }
    }
}

/// Convert a serialisable handler result into a reply body.
///
/// `()` and other values serialising to `null` become an absent body.
pub(crate) fn to_body<T: Serialize>(value: &T) -> std::result::Result<Body, serde_json::Error> {
    serde_json::to_value(value).map(|value| match value {
        Value::Null => None,
        other => Some(other),
    })
}

/// Mapping from function name to handler.
///
/// # Examples
///
/// ```
/// use parley::{Body, Router};
///
/// let router = Router::new()
///     .on_ask("echo", |_endpoint, body: Body| async move { Ok::<_, String>(body) })
///     .expect("register echo")
///     .on_tell("log", |_endpoint, body: Body| async move { println!("{body:?}") })
///     .expect("register log");
/// assert_eq!(router.len(), 2);
/// ```
#[derive(Clone, Debug, Default)]
pub struct Router {
    handlers: HashMap<String, Handler>,
}

impl Router {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register a tell handler for `function`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReservedName`] or [`Error::EmptyName`] for invalid
    /// names and [`Error::DuplicateHandler`] if `function` already has a
    /// handler.
    pub fn on_tell<F, Fut>(self, function: impl Into<String>, handler: F) -> Result<Self>
    where
        F: Fn(Endpoint, Body) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Arc<TellHandler> = Arc::new(move |endpoint, body| handler(endpoint, body).boxed());
        self.insert(function.into(), Handler::Tell(handler))
    }

    /// Register an ask handler for `function`.
    ///
    /// The handler's success value is serialised into the reply body; its
    /// error is sent as the reply's `err` using its `Display` text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReservedName`] or [`Error::EmptyName`] for invalid
    /// names and [`Error::DuplicateHandler`] if `function` already has a
    /// handler.
    pub fn on_ask<F, Fut, T, E>(self, function: impl Into<String>, handler: F) -> Result<Self>
    where
        F: Fn(Endpoint, Body) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Serialize,
        E: fmt::Display,
    {
        let handler: Arc<AskHandler> = Arc::new(move |endpoint, body| {
            handler(endpoint, body)
                .map(|outcome| match outcome {
                    Ok(value) => to_body(&value).map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                })
                .boxed()
        });
        self.insert(function.into(), Handler::Ask(handler))
    }

    fn insert(mut self, function: String, handler: Handler) -> Result<Self> {
        validate_function_name(&function)?;
        if self.handlers.contains_key(&function) {
            return Err(Error::DuplicateHandler(function));
        }
        self.handlers.insert(function, handler);
        Ok(self)
    }

    /// Layer `self` over `base`: handlers in `self` shadow those in `base`.
    #[must_use]
    pub fn overlay(self, base: &Router) -> Router {
        let mut handlers = base.handlers.clone();
        handlers.extend(self.handlers);
        Router { handlers }
    }

    /// Look up the handler for `function`.
    #[must_use]
    pub fn get(&self, function: &str) -> Option<&Handler> { self.handlers.get(function) }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize { self.handlers.len() }

    /// Returns true if no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.handlers.is_empty() }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    async fn noop(_endpoint: Endpoint, _body: Body) {}

    #[rstest]
    #[case::reserved("on")]
    #[case::empty("")]
    fn invalid_names_are_rejected(#[case] name: &str) {
        let err = Router::new()
            .on_tell(name, noop)
            .expect_err("invalid name must be rejected");
        assert!(err.is_usage());
    }

    #[test]
    fn duplicate_names_are_rejected_across_kinds() {
        let err = Router::new()
            .on_tell("dup", noop)
            .expect("first registration")
            .on_ask("dup", |_e, body| async move { Ok::<_, String>(body) })
            .expect_err("second registration must fail");
        assert!(matches!(err, Error::DuplicateHandler(name) if name == "dup"));
    }

    #[test]
    fn overlay_prefers_local_handlers() {
        let base = Router::new()
            .on_tell("shared", noop)
            .expect("base shared")
            .on_tell("base_only", noop)
            .expect("base only");
        let local = Router::new()
            .on_ask("shared", |_e, body| async move { Ok::<_, String>(body) })
            .expect("local shared");

        let merged = local.overlay(&base);
        assert_eq!(merged.len(), 2);
        assert!(matches!(merged.get("shared"), Some(Handler::Ask(_))));
        assert!(matches!(merged.get("base_only"), Some(Handler::Tell(_))));
    }

    #[rstest]
    #[case::unit(to_body(&()).expect("unit"), None)]
    #[case::string(to_body(&"hi").expect("string"), Some(Value::from("hi")))]
    #[case::none(to_body(&Option::<u8>::None).expect("none"), None)]
    fn handler_values_become_bodies(#[case] body: Body, #[case] expected: Body) {
        assert_eq!(body, expected);
    }
}
