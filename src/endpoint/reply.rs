//! Future resolving the outcome of an ask.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::sync::oneshot;

use super::ReplyOutcome;
use crate::{error::ReplyError, router::Body};

/// Resolves once with the reply to an ask, or with the failure that tore the
/// endpoint down before a reply arrived.
///
/// Dropping the future abandons the outcome; the reply is still consumed by
/// the endpoint when it arrives.
#[derive(Debug)]
#[must_use = "an ask's outcome is only observed by awaiting its ReplyFuture"]
pub struct ReplyFuture {
    id: String,
    rx: oneshot::Receiver<ReplyOutcome>,
}

impl ReplyFuture {
    pub(crate) fn new(id: String, rx: oneshot::Receiver<ReplyOutcome>) -> Self { Self { id, rx } }

    /// Correlation id carried by the ask on the wire.
    #[must_use]
    pub fn id(&self) -> &str { &self.id }
}

impl Future for ReplyFuture {
    type Output = Result<Body, ReplyError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the actor stopped without draining, e.g. at
        // runtime shutdown.
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ReplyError::Closed)))
    }
}
