//! Utilities for exercising `parley` endpoints and registries in tests.
//!
//! Endpoints are started on `tokio::io::duplex` streams so tests never touch
//! the network. [`RawPeer`] speaks the frame protocol directly for protocol
//! level assertions, [`endpoint_pair`] connects a client endpoint to a
//! registry session, and [`EventLog`] records lifecycle events.
//!
//! ```rust
//! use parley::{Body, Endpoint, SessionRegistry};
//! use parley_testing::endpoint_pair;
//!
//! # async fn demo() -> parley_testing::TestResult<()> {
//! let registry = SessionRegistry::builder()
//!     .on_ask("echo", |_endpoint, body: Body| async move { Ok::<_, String>(body) })?
//!     .build();
//! let (client, _session) = endpoint_pair(Endpoint::builder(), &registry)?;
//! assert_eq!(client.ask("echo", "hi")?.await?, Some("hi".into()));
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod logging;
pub mod metrics;
pub mod pair;
pub mod peer;

pub use events::EventLog;
pub use logging::{LoggerHandle, logger};
pub use pair::{DEFAULT_CAPACITY, endpoint_pair, endpoint_pair_with_capacity};
pub use peer::RawPeer;

/// Result type used by fallible tests.
pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;
