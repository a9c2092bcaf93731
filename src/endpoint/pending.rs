//! Outstanding asks awaiting a reply.
//!
//! Owned exclusively by the endpoint actor, so no locking is needed. Every
//! registered continuation leaves the map exactly once: either through
//! [`PendingRequests::complete`] or through [`PendingRequests::drain`].

use std::collections::HashMap;

use log::debug;
use tokio::sync::oneshot;

use super::ReplyOutcome;
use crate::error::ReplyError;

#[derive(Debug, Default)]
pub(crate) struct PendingRequests {
    requests: HashMap<String, oneshot::Sender<ReplyOutcome>>,
}

impl PendingRequests {
    /// Track `sender` under `id`.
    ///
    /// Returns the sender back if `id` is already outstanding.
    pub(crate) fn register(
        &mut self,
        id: String,
        sender: oneshot::Sender<ReplyOutcome>,
    ) -> Result<(), oneshot::Sender<ReplyOutcome>> {
        if self.requests.contains_key(&id) {
            return Err(sender);
        }
        self.requests.insert(id, sender);
        Ok(())
    }

    /// Resolve the ask `id` with `outcome`.
    ///
    /// Returns false if no ask with that id is outstanding.
    pub(crate) fn complete(&mut self, id: &str, outcome: ReplyOutcome) -> bool {
        let Some(sender) = self.requests.remove(id) else {
            return false;
        };
        if sender.send(outcome).is_err() {
            debug!("reply dropped, caller stopped waiting: id={id}");
        }
        true
    }

    /// Fail every outstanding ask with `reason`, returning how many were
    /// resolved.
    pub(crate) fn drain(&mut self, reason: &ReplyError) -> usize {
        let count = self.requests.len();
        for (_, sender) in self.requests.drain() {
            let _ = sender.send(Err(reason.clone()));
        }
        count
    }

    pub(crate) fn len(&self) -> usize { self.requests.len() }
}
