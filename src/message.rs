//! Structured messages exchanged between endpoints.
//!
//! Each frame carries one [`Message`]. The `kind` field selects how the
//! receiving endpoint treats it; the remaining fields are optional and omitted
//! from the wire when absent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Function names that may never be used for tells, asks, or handlers.
///
/// `on` is the subscription-registration name of the event surface this
/// protocol grew up on; peers built on that surface cannot route it.
pub const RESERVED_FUNCTION_NAMES: &[&str] = &["on"];

/// Error text carried by a reply when no handler exists for an ask.
pub(crate) fn function_not_understood(function: &str) -> String {
    format!("function not understood: {function}")
}

/// Discriminates how a message is processed on arrival.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// One-way notification.
    Tell,
    /// Request expecting exactly one reply.
    Ask,
    /// Answer to an ask, correlated by id.
    Reply,
    /// Keepalive.
    Heartbeat,
}

impl Kind {
    /// Wire name of this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Tell => "tell",
            Kind::Ask => "ask",
            Kind::Reply => "reply",
            Kind::Heartbeat => "heartbeat",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

/// A single protocol message.
///
/// JSON `null` in `body` or `err` decodes as absent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// How the message is dispatched.
    pub kind: Kind,
    /// Correlation id, present on asks and replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Target function for tells and asks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Application payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Failure detail on replies. Takes precedence over `body`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<Value>,
}

impl Message {
    fn new(kind: Kind) -> Self {
        Self {
            kind,
            id: None,
            function: None,
            body: None,
            err: None,
        }
    }

    /// Build a tell addressed to `function`.
    #[must_use]
    pub fn tell(function: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            function: Some(function.into()),
            body,
            ..Self::new(Kind::Tell)
        }
    }

    /// Build an ask addressed to `function` with correlation `id`.
    #[must_use]
    pub fn ask(id: impl Into<String>, function: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            id: Some(id.into()),
            function: Some(function.into()),
            body,
            ..Self::new(Kind::Ask)
        }
    }

    /// Build the reply to ask `id` from a handler outcome.
    #[must_use]
    pub fn reply(id: impl Into<String>, outcome: std::result::Result<Option<Value>, String>) -> Self {
        let (body, err) = match outcome {
            Ok(body) => (body, None),
            Err(err) => (None, Some(Value::String(err))),
        };
        Self {
            id: Some(id.into()),
            body,
            err,
            ..Self::new(Kind::Reply)
        }
    }

    /// Build a heartbeat.
    #[must_use]
    pub fn heartbeat() -> Self { Self::new(Kind::Heartbeat) }

    /// Split a reply into its outcome, failure winning over body.
    ///
    /// A string `err` is passed through verbatim; any other JSON value is
    /// rendered as JSON text.
    #[must_use]
    pub fn into_outcome(self) -> std::result::Result<Option<Value>, String> {
        match self.err {
            Some(Value::String(err)) => Err(err),
            Some(other) => Err(other.to_string()),
            None => Ok(self.body),
        }
    }
}

/// Check that `function` may be used as a message function name.
///
/// # Errors
///
/// Returns [`Error::EmptyName`] for an empty name and [`Error::ReservedName`]
/// for a member of [`RESERVED_FUNCTION_NAMES`].
pub fn validate_function_name(function: &str) -> Result<()> {
    if function.is_empty() {
        return Err(Error::EmptyName);
    }
    if RESERVED_FUNCTION_NAMES.contains(&function) {
        return Err(Error::ReservedName(function.to_owned()));
    }
    Ok(())
}
