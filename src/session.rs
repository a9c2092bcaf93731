//! Registry of sessions accepted by a server.
//!
//! A [`SessionRegistry`] turns every accepted transport into an independent
//! [`Endpoint`] with its own decoder and pending-ask table. Registry-level
//! handlers and listeners are installed on every session; a per-session
//! customiser may add or shadow them. The registry keeps non-owning weak
//! references so a torn-down session's resources are released even if nobody
//! prunes the map; teardown also removes the entry eagerly.

mod serve;

use std::{
    fmt,
    future::Future,
    sync::{
        Arc,
        Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use log::debug;
use serde::Serialize;
pub use serve::{AcceptListener, BackoffConfig};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    endpoint::{
        Endpoint,
        EndpointActor,
        EndpointBuilder,
        EndpointConfig,
        EndpointEvent,
        Listeners,
        Shared,
    },
    error::{Error, Result},
    router::{Body, Router},
};

/// Identifier assigned to an accepted session.
///
/// Used for diagnostics and to namespace ask ids, never for routing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl From<u64> for SessionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl SessionId {
    /// Create a new [`SessionId`] with the provided value.
    #[must_use]
    pub fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "SessionId({})", self.0) }
}

type Customizer = Arc<dyn Fn(SessionId, EndpointBuilder) -> Result<EndpointBuilder> + Send + Sync>;

/// Configures a [`SessionRegistry`].
///
/// Settings default to those of [`EndpointBuilder`] except that sessions echo
/// inbound heartbeats.
#[derive(Clone)]
pub struct SessionRegistryBuilder {
    template: EndpointBuilder,
    per_session: Option<Customizer>,
}

impl Default for SessionRegistryBuilder {
    fn default() -> Self {
        Self {
            template: EndpointBuilder::default().echo_heartbeats(true),
            per_session: None,
        }
    }
}

impl SessionRegistryBuilder {
    /// Register a tell handler for every session.
    ///
    /// # Errors
    ///
    /// Returns a usage error for reserved, empty, or duplicate names.
    pub fn on_tell<F, Fut>(mut self, function: impl Into<String>, handler: F) -> Result<Self>
    where
        F: Fn(Endpoint, Body) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.template = self.template.on_tell(function, handler)?;
        Ok(self)
    }

    /// Register an ask handler for every session.
    ///
    /// # Errors
    ///
    /// Returns a usage error for reserved, empty, or duplicate names.
    pub fn on_ask<F, Fut, T, E>(mut self, function: impl Into<String>, handler: F) -> Result<Self>
    where
        F: Fn(Endpoint, Body) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Serialize,
        E: fmt::Display,
    {
        self.template = self.template.on_ask(function, handler)?;
        Ok(self)
    }

    /// Use `router` as the registry-level handler set.
    #[must_use]
    pub fn router(mut self, router: Router) -> Self {
        self.template = self.template.router(router);
        self
    }

    /// Deliver every session's events to `listener`.
    #[must_use]
    pub fn subscribe<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Endpoint, &EndpointEvent) + Send + Sync + 'static,
    {
        self.template = self.template.subscribe(listener);
        self
    }

    /// Call `f` whenever a session starts.
    #[must_use]
    pub fn on_connect<F>(mut self, f: F) -> Self
    where
        F: Fn(&Endpoint) + Send + Sync + 'static,
    {
        self.template = self.template.on_connect(f);
        self
    }

    /// Call `f` whenever a session closes normally.
    #[must_use]
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&Endpoint) + Send + Sync + 'static,
    {
        self.template = self.template.on_close(f);
        self
    }

    /// Call `f` whenever a session fails.
    #[must_use]
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&Endpoint, &Error) + Send + Sync + 'static,
    {
        self.template = self.template.on_error(f);
        self
    }

    /// Call `f` for unroutable tells and asks on any session.
    #[must_use]
    pub fn on_unhandled<F>(mut self, f: F) -> Self
    where
        F: Fn(&Endpoint, &str) + Send + Sync + 'static,
    {
        self.template = self.template.on_unhandled(f);
        self
    }

    /// Customise each session's builder before it starts.
    ///
    /// `f` receives a builder carrying the registry's settings but no
    /// handlers or listeners. Handlers it registers shadow registry-level
    /// handlers of the same name; listeners it registers observe only that
    /// session. An error from `f` rejects the session and closes its
    /// transport.
    #[must_use]
    pub fn per_session<F>(mut self, f: F) -> Self
    where
        F: Fn(SessionId, EndpointBuilder) -> Result<EndpointBuilder> + Send + Sync + 'static,
    {
        self.per_session = Some(Arc::new(f));
        self
    }

    /// Set the largest frame payload accepted or produced by sessions.
    #[must_use]
    pub fn max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.template = self.template.max_frame_length(max_frame_length);
        self
    }

    /// Set the sessions' heartbeat period; `None` disables heartbeats.
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Option<Duration>) -> Self {
        self.template = self.template.heartbeat_interval(interval);
        self
    }

    /// Answer inbound heartbeats with a heartbeat. Defaults to true.
    #[must_use]
    pub fn echo_heartbeats(mut self, echo: bool) -> Self {
        self.template = self.template.echo_heartbeats(echo);
        self
    }

    /// Finish configuration.
    #[must_use]
    pub fn build(self) -> SessionRegistry {
        let (router, listeners, config) = self.template.into_parts();
        SessionRegistry {
            inner: Arc::new(RegistryInner {
                router,
                listeners,
                config,
                per_session: self.per_session,
                next_id: AtomicU64::new(1),
                sessions: DashMap::new(),
            }),
        }
    }
}

impl fmt::Debug for SessionRegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistryBuilder")
            .field("template", &self.template)
            .field("per_session", &self.per_session.as_ref().map(|_| "Some(<customizer>)"))
            .finish()
    }
}

struct RegistryInner {
    router: Router,
    listeners: Listeners,
    config: EndpointConfig,
    per_session: Option<Customizer>,
    next_id: AtomicU64,
    sessions: DashMap<SessionId, Weak<Shared>>,
}

/// Concurrent registry of live sessions keyed by [`SessionId`].
///
/// Clones share the same sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Start configuring a registry.
    #[must_use]
    pub fn builder() -> SessionRegistryBuilder { SessionRegistryBuilder::default() }

    /// Start a session on `io` and return its endpoint.
    ///
    /// # Errors
    ///
    /// Returns any error raised by the per-session customiser.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn accept<T>(&self, io: T) -> Result<Endpoint>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (endpoint, actor) = self.prepare(io)?;
        tokio::spawn(actor.run_guarded());
        Ok(endpoint)
    }

    /// Build and register a session without spawning its actor.
    fn prepare<T>(&self, io: T) -> Result<(Endpoint, EndpointActor<T>)>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = SessionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut builder = EndpointBuilder::from_config(self.inner.config);
        if let Some(customize) = &self.inner.per_session {
            builder = customize(id, builder)?;
        }

        let mut first = Listeners::default();
        let registry = Arc::downgrade(&self.inner);
        first.push(Arc::new(move |_endpoint: &Endpoint, event: &EndpointEvent| {
            if !event.is_terminal() {
                return;
            }
            if let Some(inner) = registry.upgrade() {
                inner.sessions.remove(&id);
            }
        }));
        first.extend(&self.inner.listeners);

        let (endpoint, actor) = builder
            .overlay_router(&self.inner.router)
            .with_listeners_first(first)
            .build(io, Some(id));
        self.inner.sessions.insert(id, endpoint.downgrade());
        debug!("session registered: id={id}, active={}", self.inner.sessions.len());
        Ok((endpoint, actor))
    }

    /// Retrieve the endpoint for `id` if the session is still alive.
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<Endpoint> {
        let guard = self.inner.sessions.get(&id);
        let shared = guard.as_ref().and_then(|weak| weak.upgrade());
        drop(guard);
        let endpoint = shared.map(Endpoint::from_shared).filter(Endpoint::is_connected);
        if endpoint.is_none() {
            self.inner.sessions.remove_if(&id, |_, weak| {
                weak.upgrade()
                    .is_none_or(|shared| !Endpoint::from_shared(shared).is_connected())
            });
        }
        endpoint
    }

    /// Prune dead sessions, then return the ids of the live ones in
    /// ascending order.
    #[must_use]
    pub fn active_ids(&self) -> Vec<SessionId> {
        self.prune();
        let mut ids: Vec<_> = self.inner.sessions.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered sessions, including any not yet pruned.
    #[must_use]
    pub fn len(&self) -> usize { self.inner.sessions.len() }

    /// Returns true if no sessions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.inner.sessions.is_empty() }

    /// Remove all stale weak references.
    ///
    /// `DashMap::retain` acquires per-bucket write locks, so other operations
    /// may contend briefly while the registry is pruned.
    pub fn prune(&self) {
        self.inner.sessions.retain(|_, weak| {
            weak.upgrade()
                .is_some_and(|shared| Endpoint::from_shared(shared).is_connected())
        });
    }

    /// Begin teardown of every live session, returning how many were closed.
    pub fn close_all(&self) -> usize {
        let endpoints: Vec<_> = self
            .inner
            .sessions
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .map(Endpoint::from_shared)
            .collect();
        for endpoint in &endpoints {
            endpoint.close();
        }
        endpoints.len()
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.inner.sessions.len())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
