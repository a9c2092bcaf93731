//! Metric helpers for `parley`.
//!
//! This module defines metric names and small helpers wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! the helpers compile to no-ops.

/// Name of the gauge tracking live endpoints.
pub const ENDPOINTS_ACTIVE: &str = "parley_endpoints_active";
/// Name of the counter tracking processed frames.
pub const FRAMES_PROCESSED: &str = "parley_frames_processed_total";
/// Name of the counter tracking endpoint failures.
pub const ERRORS_TOTAL: &str = "parley_errors_total";
/// Name of the counter tracking panicking handlers.
pub const HANDLER_PANICS: &str = "parley_handler_panics_total";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug)]
pub enum Direction {
    /// Frames read from the peer.
    Inbound,
    /// Frames written to the peer.
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), expect(dead_code, reason = "labels only feed metrics"))]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the live endpoints gauge.
pub fn inc_endpoints() {
    #[cfg(feature = "metrics")]
    metrics::gauge!(ENDPOINTS_ACTIVE).increment(1.0);
}

/// Decrement the live endpoints gauge.
pub fn dec_endpoints() {
    #[cfg(feature = "metrics")]
    metrics::gauge!(ENDPOINTS_ACTIVE).decrement(1.0);
}

/// Record a processed frame for the given direction.
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    metrics::counter!(FRAMES_PROCESSED, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record an endpoint torn down by a transport or protocol failure.
pub fn inc_errors() {
    #[cfg(feature = "metrics")]
    metrics::counter!(ERRORS_TOTAL).increment(1);
}

/// Record a handler that panicked.
pub fn inc_handler_panics() {
    #[cfg(feature = "metrics")]
    metrics::counter!(HANDLER_PANICS).increment(1);
}
