//! One side of one logical connection.
//!
//! An [`Endpoint`] is a cheap handle to an actor task that owns the
//! connection's decoder, pending-ask table, and heartbeat timer, and feeds a
//! companion writer task. The
//! actor processes inbound frames strictly in arrival order, routes them
//! through a [`Router`], and resolves every outstanding ask exactly once, at
//! the latest when the connection is torn down.
//!
//! Endpoints are configured with an [`EndpointBuilder`] and started on any
//! `AsyncRead + AsyncWrite` transport.

mod actor;
mod event;
mod pending;
mod reply;

use std::{
    fmt,
    future::Future,
    io,
    sync::{
        Arc,
        Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

pub(crate) use actor::EndpointActor;
use bytes::Bytes;
pub use event::{EndpointEvent, Listener};
pub(crate) use event::Listeners;
pub use reply::ReplyFuture;
use serde::Serialize;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpStream, ToSocketAddrs},
    sync::{mpsc, oneshot},
};
use tokio_util::sync::CancellationToken;

use crate::{
    codec::{MAX_FRAME_LENGTH, encode_with_limit},
    error::{Error, ReplyError, Result},
    message::{Message, validate_function_name},
    router::{Body, Router, to_body},
    session::SessionId,
};

/// Default period between outbound heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

pub(crate) type ReplyOutcome = std::result::Result<Body, ReplyError>;

/// Work queued for the actor by an [`Endpoint`] handle.
///
/// Frames are encoded by the caller so size and serialisation failures
/// surface synchronously.
pub(crate) enum Command {
    Tell(Bytes),
    Ask {
        id: String,
        frame: Bytes,
        reply: oneshot::Sender<ReplyOutcome>,
    },
}

/// State shared between every clone of an [`Endpoint`] and its actor.
pub(crate) struct Shared {
    commands: mpsc::UnboundedSender<Command>,
    /// Cancelled once teardown begins.
    shutdown: CancellationToken,
    session: Option<SessionId>,
    next_ask: AtomicU64,
    max_frame_length: usize,
}

/// Handle to a running endpoint.
///
/// Clones share the same connection. The connection stays open until
/// [`close`](Self::close) is called, the peer disconnects, or a transport or
/// protocol failure occurs; dropping handles does not close it.
#[derive(Clone)]
pub struct Endpoint {
    shared: Arc<Shared>,
}

impl Endpoint {
    /// Start configuring a new endpoint.
    #[must_use]
    pub fn builder() -> EndpointBuilder { EndpointBuilder::default() }

    /// Send a one-way notification to the peer's `function`.
    ///
    /// # Errors
    ///
    /// Fails before any I/O with [`Error::ReservedName`] or
    /// [`Error::EmptyName`] for an invalid name, [`Error::NotConnected`] after
    /// teardown, [`Error::Serialize`] if `body` cannot be converted to JSON, and
    /// [`Error::Codec`] if the encoded frame exceeds the maximum frame length.
    pub fn tell<B: Serialize>(&self, function: &str, body: B) -> Result<()> {
        self.ensure_sendable(function)?;
        let body = to_body(&body).map_err(Error::Serialize)?;
        let frame = self.frame(&Message::tell(function, body))?;
        self.send(Command::Tell(frame))
    }

    /// Send a request to the peer's `function` and return a future resolving
    /// to its reply.
    ///
    /// The ask is queued immediately; awaiting the returned [`ReplyFuture`]
    /// is only needed to observe the outcome.
    ///
    /// # Errors
    ///
    /// Fails with the same usage errors as [`tell`](Self::tell).
    pub fn ask<B: Serialize>(&self, function: &str, body: B) -> Result<ReplyFuture> {
        self.ensure_sendable(function)?;
        let body = to_body(&body).map_err(Error::Serialize)?;
        let id = self.next_ask_id();
        let frame = self.frame(&Message::ask(id.clone(), function, body))?;
        let (reply, rx) = oneshot::channel();
        self.send(Command::Ask {
            id: id.clone(),
            frame,
            reply,
        })?;
        Ok(ReplyFuture::new(id, rx))
    }

    /// Begin teardown. Idempotent.
    ///
    /// Outstanding asks resolve with [`ReplyError::Closed`].
    pub fn close(&self) { self.shared.shutdown.cancel(); }

    /// Resolves once teardown has begun.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let shutdown = self.shared.shutdown.clone();
        async move { shutdown.cancelled().await }
    }

    /// Returns false once teardown has begun.
    #[must_use]
    pub fn is_connected(&self) -> bool { !self.shared.shutdown.is_cancelled() }

    /// Session id assigned by a [`SessionRegistry`](crate::SessionRegistry),
    /// or `None` for connector endpoints.
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> { self.shared.session }

    /// Returns true if both handles refer to the same connection.
    #[must_use]
    pub fn same_connection(&self, other: &Endpoint) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn downgrade(&self) -> Weak<Shared> { Arc::downgrade(&self.shared) }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self { Self { shared } }

    fn ensure_sendable(&self, function: &str) -> Result<()> {
        validate_function_name(function)?;
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn next_ask_id(&self) -> String {
        let n = self.shared.next_ask.fetch_add(1, Ordering::Relaxed);
        match self.shared.session {
            Some(session) => format!("{}-{n}", session.as_u64()),
            None => n.to_string(),
        }
    }

    fn frame(&self, message: &Message) -> Result<Bytes> {
        Ok(encode_with_limit(message, self.shared.max_frame_length)?)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.shared
            .commands
            .send(command)
            .map_err(|_| Error::NotConnected)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("session", &self.shared.session)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

/// Per-endpoint settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Largest frame payload accepted or produced.
    pub max_frame_length: usize,
    /// Period between outbound heartbeats; `None` disables them.
    pub heartbeat_interval: Option<Duration>,
    /// Answer inbound heartbeats with a heartbeat.
    pub echo_heartbeats: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            max_frame_length: MAX_FRAME_LENGTH,
            heartbeat_interval: Some(DEFAULT_HEARTBEAT_INTERVAL),
            echo_heartbeats: false,
        }
    }
}

/// Configures handlers, listeners, and settings, then starts an endpoint.
///
/// # Examples
///
/// ```no_run
/// use parley::{Body, Endpoint};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let endpoint = Endpoint::builder()
///     .on_ask("echo", |_endpoint, body: Body| async move { Ok::<_, String>(body) })?
///     .on_close(|_endpoint| println!("closed"))
///     .connect(("127.0.0.1", 7000))
///     .await?;
///
/// let reply = endpoint.ask("echo", "hi")?.await?;
/// assert_eq!(reply, Some("hi".into()));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct EndpointBuilder {
    router: Router,
    listeners: Listeners,
    config: EndpointConfig,
}

impl EndpointBuilder {
    /// Register a tell handler. See [`Router::on_tell`].
    ///
    /// # Errors
    ///
    /// Returns a usage error for reserved, empty, or duplicate names.
    pub fn on_tell<F, Fut>(mut self, function: impl Into<String>, handler: F) -> Result<Self>
    where
        F: Fn(Endpoint, Body) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.router = self.router.on_tell(function, handler)?;
        Ok(self)
    }

    /// Register an ask handler. See [`Router::on_ask`].
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
        self.router = self.router.on_ask(function, handler)?;
        Ok(self)
    }

    /// Replace the router wholesale.
    #[must_use]
    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Handlers registered so far.
    #[must_use]
    pub fn routes(&self) -> &Router { &self.router }

    /// Deliver every [`EndpointEvent`] to `listener`.
    #[must_use]
    pub fn subscribe<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Endpoint, &EndpointEvent) + Send + Sync + 'static,
    {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Call `f` once the endpoint starts processing frames.
    #[must_use]
    pub fn on_connect<F>(self, f: F) -> Self
    where
        F: Fn(&Endpoint) + Send + Sync + 'static,
    {
        self.subscribe(move |endpoint, event| {
            if matches!(event, EndpointEvent::Connected) {
                f(endpoint);
            }
        })
    }

    /// Call `f` after a normal teardown.
    #[must_use]
    pub fn on_close<F>(self, f: F) -> Self
    where
        F: Fn(&Endpoint) + Send + Sync + 'static,
    {
        self.subscribe(move |endpoint, event| {
            if matches!(event, EndpointEvent::Closed) {
                f(endpoint);
            }
        })
    }

    /// Call `f` after a teardown caused by a transport or protocol failure.
    #[must_use]
    pub fn on_error<F>(self, f: F) -> Self
    where
        F: Fn(&Endpoint, &Error) + Send + Sync + 'static,
    {
        self.subscribe(move |endpoint, event| {
            if let EndpointEvent::Failed(err) = event {
                f(endpoint, err);
            }
        })
    }

    /// Call `f` with the function name of every unroutable tell or ask.
    #[must_use]
    pub fn on_unhandled<F>(self, f: F) -> Self
    where
        F: Fn(&Endpoint, &str) + Send + Sync + 'static,
    {
        self.subscribe(move |endpoint, event| {
            if let EndpointEvent::Unhandled { function, .. } = event {
                f(endpoint, function);
            }
        })
    }

    /// Set the largest frame payload accepted or produced.
    #[must_use]
    pub fn max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.config.max_frame_length = max_frame_length;
        self
    }

    /// Set the heartbeat period. `None` or a zero duration disables outbound
    /// heartbeats.
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.heartbeat_interval = interval.filter(|period| !period.is_zero());
        self
    }

    /// Answer inbound heartbeats with a heartbeat.
    #[must_use]
    pub fn echo_heartbeats(mut self, echo: bool) -> Self {
        self.config.echo_heartbeats = echo;
        self
    }

    /// Current settings.
    #[must_use]
    pub fn config(&self) -> &EndpointConfig { &self.config }

    /// Start the endpoint on `io` as a connector.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn<T>(self, io: T) -> Endpoint
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (endpoint, actor) = self.build(io, None);
        tokio::spawn(actor.run_guarded());
        endpoint
    }

    /// Open a TCP connection to `addr` and start the endpoint on it.
    ///
    /// # Errors
    ///
    /// Returns any error raised while connecting.
    pub async fn connect<A: ToSocketAddrs>(self, addr: A) -> io::Result<Endpoint> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(self.spawn(stream))
    }

    pub(crate) fn from_config(config: EndpointConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub(crate) fn into_parts(self) -> (Router, Listeners, EndpointConfig) {
        (self.router, self.listeners, self.config)
    }

    /// Install `first` ahead of the listeners registered so far.
    pub(crate) fn with_listeners_first(mut self, mut first: Listeners) -> Self {
        first.extend(&self.listeners);
        self.listeners = first;
        self
    }

    /// Fall back to `base` for functions this builder has no handler for.
    pub(crate) fn overlay_router(mut self, base: &Router) -> Self {
        self.router = self.router.overlay(base);
        self
    }

    /// Create the handle and its actor without spawning.
    pub(crate) fn build<T>(self, io: T, session: Option<SessionId>) -> (Endpoint, EndpointActor<T>)
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (commands, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let endpoint = Endpoint {
            shared: Arc::new(Shared {
                commands,
                shutdown: shutdown.clone(),
                session,
                next_ask: AtomicU64::new(1),
                max_frame_length: self.config.max_frame_length,
            }),
        };
        let actor = EndpointActor::new(
            endpoint.clone(),
            io,
            rx,
            shutdown,
            self.router,
            self.listeners,
            self.config,
        );
        (endpoint, actor)
    }
}
