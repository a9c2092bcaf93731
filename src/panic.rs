//! Rendering of panic payloads raised by handlers, listeners, and actors.
//!
//! A panicking ask handler is answered with a reply whose `err` carries the
//! panic text, so payloads are reduced to a string here.

use std::{any::Any, fmt};

/// Panic payload that displays as its message.
///
/// `String` and `&'static str` payloads print verbatim; anything else falls
/// back to `Debug` formatting of the boxed payload.
///
/// ```
/// use parley::panic::format_panic;
///
/// let payload = std::panic::catch_unwind(|| panic!("disk {} offline", 3)).unwrap_err();
/// assert_eq!(format_panic(payload).to_string(), "disk 3 offline");
/// assert!(format_panic(Box::new(5_u32)).to_string().contains("Any"));
/// ```
#[derive(Debug)]
#[must_use]
pub struct PanicMessage(Box<dyn Any + Send>);

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.0.downcast_ref::<String>(), self.0.downcast_ref::<&'static str>()) {
            (Some(s), _) => f.write_str(s),
            (None, Some(s)) => f.write_str(s),
            (None, None) => write!(f, "{:?}", self.0),
        }
    }
}

/// Create a [`PanicMessage`] for the given payload.
pub fn format_panic(panic: Box<dyn Any + Send>) -> PanicMessage { PanicMessage(panic) }

/// A handler panic, displayed as the error text returned to the asking peer.
///
/// ```
/// use parley::panic::{HandlerPanic, format_panic};
///
/// let panic = HandlerPanic::new("resize", format_panic(Box::new("negative width")));
/// assert_eq!(panic.to_string(), "handler panicked: resize: negative width");
/// ```
#[derive(Debug)]
pub struct HandlerPanic {
    function: String,
    message: PanicMessage,
}

impl HandlerPanic {
    /// Attribute `message` to the handler registered for `function`.
    pub fn new(function: impl Into<String>, message: PanicMessage) -> Self {
        Self {
            function: function.into(),
            message,
        }
    }

    /// Function whose handler panicked.
    #[must_use]
    pub fn function(&self) -> &str { &self.function }

    /// The panic payload.
    pub fn message(&self) -> &PanicMessage { &self.message }
}

impl fmt::Display for HandlerPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler panicked: {}: {}", self.function, self.message)
    }
}
