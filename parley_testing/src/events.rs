//! Recording of endpoint lifecycle events.

use std::time::Duration;

use parley::{Endpoint, EndpointEvent, SessionId};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::timeout,
};

/// How long [`EventLog::next`] waits before giving up.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Events observed by a listener, tagged with the emitting session.
#[derive(Debug)]
pub struct EventLog {
    rx: UnboundedReceiver<(Option<SessionId>, EndpointEvent)>,
}

impl EventLog {
    /// Create a log and the listener feeding it.
    pub fn new() -> (impl Fn(&Endpoint, &EndpointEvent) + Send + Sync + 'static, Self) {
        let (tx, rx): (UnboundedSender<_>, _) = mpsc::unbounded_channel();
        let recorder = move |endpoint: &Endpoint, event: &EndpointEvent| {
            let _ = tx.send((endpoint.session_id(), event.clone()));
        };
        (recorder, Self { rx })
    }

    /// Wait for the next event.
    ///
    /// # Panics
    ///
    /// Panics if no event arrives within [`EVENT_TIMEOUT`].
    pub async fn next(&mut self) -> (Option<SessionId>, EndpointEvent) {
        timeout(EVENT_TIMEOUT, self.rx.recv())
            .await
            .expect("event within timeout")
            .expect("event listener dropped")
    }

    /// Wait for the next terminal event, skipping others.
    pub async fn next_terminal(&mut self) -> (Option<SessionId>, EndpointEvent) {
        loop {
            let (session, event) = self.next().await;
            if event.is_terminal() {
                return (session, event);
            }
        }
    }

    /// Events already delivered, without waiting.
    pub fn drain(&mut self) -> Vec<(Option<SessionId>, EndpointEvent)> {
        std::iter::from_fn(|| self.rx.try_recv().ok()).collect()
    }
}
