//! Lifecycle events and listener fan-out.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use log::error;

use super::Endpoint;
use crate::{error::Error, message::Kind, panic::format_panic};

/// Observable lifecycle notifications for an endpoint.
///
/// Exactly one of [`Closed`](Self::Closed) or [`Failed`](Self::Failed) is
/// emitted per endpoint, after every outstanding ask has been resolved.
#[derive(Clone, Debug)]
pub enum EndpointEvent {
    /// The endpoint started processing frames.
    Connected,
    /// A tell or ask named a function with no registered handler.
    Unhandled {
        /// Kind of the unroutable message.
        kind: Kind,
        /// The function name the peer used.
        function: String,
    },
    /// The endpoint closed normally, either locally or by peer EOF.
    Closed,
    /// The endpoint was torn down by a transport or protocol failure.
    Failed(Arc<Error>),
}

impl EndpointEvent {
    /// Returns true for [`Closed`](Self::Closed) and [`Failed`](Self::Failed).
    #[must_use]
    pub fn is_terminal(&self) -> bool { matches!(self, Self::Closed | Self::Failed(_)) }
}

/// Callback invoked for every event an endpoint emits.
pub type Listener = Arc<dyn Fn(&Endpoint, &EndpointEvent) + Send + Sync>;

/// Ordered set of listeners sharing one endpoint.
#[derive(Clone, Default)]
pub(crate) struct Listeners(Vec<Listener>);

impl Listeners {
    pub(crate) fn push(&mut self, listener: Listener) { self.0.push(listener); }

    pub(crate) fn extend(&mut self, other: &Listeners) { self.0.extend(other.0.iter().cloned()); }

    /// Deliver `event` to every listener in registration order.
    ///
    /// A panicking listener is logged and does not prevent delivery to the
    /// rest.
    pub(crate) fn emit(&self, endpoint: &Endpoint, event: &EndpointEvent) {
        for listener in &self.0 {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(endpoint, event))) {
                let panic_msg = format_panic(panic);
                error!("event listener panicked: panic={panic_msg}, event={event:?}");
                tracing::error!(panic = %panic_msg, ?event, "event listener panicked");
            }
        }
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners").field("len", &self.0.len()).finish()
    }
}
