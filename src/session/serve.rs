//! Accept loop feeding a [`SessionRegistry`].

use std::{io, net::SocketAddr, time::Duration};

use async_trait::async_trait;
use log::{info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    select,
    time::sleep,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::SessionRegistry;

/// Abstraction for sources of incoming connections consumed by the accept loop.
///
/// Implementations must be cancellation-safe: dropping a pending `accept()`
/// future must not leak resources.
#[async_trait]
pub trait AcceptListener: Send + Sync {
    /// Transport handed to each accepted session.
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    /// Wait for the next connection.
    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)>;

    /// Address the listener is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, addr) = TcpListener::accept(self).await?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("failed to disable Nagle: peer_addr={addr}, error={e}");
        }
        Ok((stream, addr))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

/// Configuration for exponential back-off timing in the accept loop.
///
/// The back-off starts at `initial_delay` and doubles on each consecutive
/// `accept()` failure, capped at `max_delay`.
///
/// # Default Values
/// - `initial_delay`: 10 milliseconds
/// - `max_delay`: 1 second
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay used for the first retry after an `accept()` failure.
    pub initial_delay: Duration,
    /// Maximum back-off delay once retries have increased exponentially.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl BackoffConfig {
    /// Clamp delays to at least one millisecond and ensure
    /// `initial_delay <= max_delay`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use parley::session::BackoffConfig;
    ///
    /// let cfg = BackoffConfig {
    ///     initial_delay: Duration::from_millis(5),
    ///     max_delay: Duration::from_millis(1),
    /// };
    ///
    /// let normalized = cfg.normalized();
    /// assert_eq!(normalized.initial_delay, Duration::from_millis(1));
    /// assert_eq!(normalized.max_delay, Duration::from_millis(5));
    /// ```
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.initial_delay = self.initial_delay.max(Duration::from_millis(1));
        self.max_delay = self.max_delay.max(Duration::from_millis(1));
        if self.initial_delay > self.max_delay {
            std::mem::swap(&mut self.initial_delay, &mut self.max_delay);
        }
        self
    }

    pub(super) fn next_delay(&self, delay: Duration) -> Duration { (delay * 2).min(self.max_delay) }
}

impl SessionRegistry {
    /// Accept sessions from `listener` until `shutdown` is cancelled, using
    /// the default [`BackoffConfig`].
    ///
    /// See [`serve_with_backoff`](Self::serve_with_backoff).
    pub async fn serve<L: AcceptListener>(&self, listener: L, shutdown: CancellationToken) {
        self.serve_with_backoff(listener, shutdown, BackoffConfig::default())
            .await;
    }

    /// Accept sessions from `listener` until `shutdown` is cancelled.
    ///
    /// Accept failures are logged and retried with exponential back-off. On
    /// shutdown the loop stops accepting, closes every session, and waits for
    /// their actors to finish.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use parley::{Body, SessionRegistry};
    /// use tokio::net::TcpListener;
    /// use tokio_util::sync::CancellationToken;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let registry = SessionRegistry::builder()
    ///     .on_ask("echo", |_endpoint, body: Body| async move { Ok::<_, String>(body) })?
    ///     .build();
    /// let listener = TcpListener::bind("127.0.0.1:7000").await?;
    /// registry.serve(listener, CancellationToken::new()).await;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn serve_with_backoff<L: AcceptListener>(
        &self,
        listener: L,
        shutdown: CancellationToken,
        backoff: BackoffConfig,
    ) {
        let backoff = backoff.normalized();
        let tracker = TaskTracker::new();
        info!("accepting sessions: local_addr={:?}", listener.local_addr().ok());

        let mut delay = backoff.initial_delay;
        while let Some(next_delay) = self
            .accept_iteration(&listener, &shutdown, &tracker, &backoff, delay)
            .await
        {
            delay = next_delay;
        }

        let closed = self.close_all();
        tracker.close();
        tracker.wait().await;
        info!("stopped accepting sessions: closed_sessions={closed}");
    }

    async fn accept_iteration<L: AcceptListener>(
        &self,
        listener: &L,
        shutdown: &CancellationToken,
        tracker: &TaskTracker,
        backoff: &BackoffConfig,
        delay: Duration,
    ) -> Option<Duration> {
        let res = select! {
            biased;

            () = shutdown.cancelled() => return None,
            res = listener.accept() => res,
        };
        match res {
            Ok((stream, peer_addr)) => {
                match self.prepare(stream) {
                    Ok((_, actor)) => {
                        tracker.spawn(actor.run_guarded());
                    }
                    Err(e) => warn!("session rejected: peer_addr={peer_addr}, error={e}"),
                }
                Some(backoff.initial_delay)
            }
            Err(e) => {
                let local_addr = listener.local_addr().ok();
                warn!("accept error: error={e:?}, local_addr={local_addr:?}, retry_in={delay:?}");
                select! {
                    biased;

                    () = shutdown.cancelled() => None,
                    () = sleep(delay) => Some(backoff.next_delay(delay)),
                }
            }
        }
    }
}
