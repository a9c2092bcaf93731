#![doc(html_root_url = "https://docs.rs/parley/latest")]
//! Public API for the `parley` library.
//!
//! `parley` is a symmetric RPC layer over persistent byte-stream connections.
//! Either side of a connection may send one-way notifications ("tells") or
//! requests awaiting a correlated reply ("asks"), addressed by function name.
//! Frames are length-prefixed JSON documents.
//!
//! ```no_run
//! use parley::{Body, Endpoint, SessionRegistry};
//! use tokio::net::TcpListener;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = SessionRegistry::builder()
//!     .on_ask("echo", |_endpoint, body: Body| async move { Ok::<_, String>(body) })?
//!     .build();
//! let listener = TcpListener::bind("127.0.0.1:7000").await?;
//! tokio::spawn(async move { registry.serve(listener, CancellationToken::new()).await });
//!
//! let client = Endpoint::builder().connect("127.0.0.1:7000").await?;
//! assert_eq!(client.ask("echo", "hi")?.await?, Some("hi".into()));
//! # Ok(())
//! # }
//! ```

pub mod byte_order;
pub mod codec;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod metrics;
pub mod panic;
pub mod router;
pub mod session;

pub use codec::{CodecError, FeedError, FrameDecoder, JsonFrameCodec, MAX_FRAME_LENGTH, encode};
pub use endpoint::{Endpoint, EndpointBuilder, EndpointConfig, EndpointEvent, ReplyFuture};
pub use error::{Error, ReplyError, Result};
pub use message::{Kind, Message, RESERVED_FUNCTION_NAMES};
pub use metrics::{Direction, ENDPOINTS_ACTIVE, ERRORS_TOTAL, FRAMES_PROCESSED, HANDLER_PANICS};
pub use router::{Body, Handler, Router};
pub use session::{SessionId, SessionRegistry, SessionRegistryBuilder};
