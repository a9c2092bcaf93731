//! Frame-level peer for protocol tests.

use std::{io, time::Duration};

use futures::{SinkExt, StreamExt};
use parley::{CodecError, Endpoint, EndpointBuilder, JsonFrameCodec, Message, SessionRegistry};
use tokio::{
    io::{AsyncWriteExt, DuplexStream, duplex},
    time::timeout,
};
use tokio_util::codec::Framed;

use crate::pair::DEFAULT_CAPACITY;

/// How long [`RawPeer::recv`] waits for a frame.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(60);

/// The far side of an endpoint, exchanging [`Message`]s without any
/// correlation logic of its own.
#[derive(Debug)]
pub struct RawPeer {
    framed: Framed<DuplexStream, JsonFrameCodec<Message>>,
}

impl RawPeer {
    fn new(io: DuplexStream) -> Self {
        Self {
            framed: Framed::new(io, JsonFrameCodec::default()),
        }
    }

    /// Spawn `builder` against a fresh peer.
    pub fn spawn(builder: EndpointBuilder) -> (Endpoint, Self) {
        let (local, remote) = duplex(DEFAULT_CAPACITY);
        (builder.spawn(local), Self::new(remote))
    }

    /// Open a session of `registry` against a fresh peer.
    ///
    /// # Errors
    ///
    /// Returns any error raised by the registry's per-session customiser.
    pub fn accept(registry: &SessionRegistry) -> parley::Result<(Endpoint, Self)> {
        let (local, remote) = duplex(DEFAULT_CAPACITY);
        Ok((registry.accept(local)?, Self::new(remote)))
    }

    /// Write one message frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be encoded or written.
    pub async fn send(&mut self, message: Message) -> Result<(), CodecError> {
        self.framed.send(message).await
    }

    /// Write raw bytes, bypassing the encoder.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.framed.get_mut().write_all(bytes).await
    }

    /// Read the next message.
    ///
    /// # Panics
    ///
    /// Panics if no valid frame arrives within [`FRAME_TIMEOUT`].
    pub async fn recv(&mut self) -> Message {
        timeout(FRAME_TIMEOUT, self.framed.next())
            .await
            .expect("frame within timeout")
            .expect("endpoint closed the stream")
            .expect("endpoint wrote a valid frame")
    }

    /// Read the next message or end of stream within `within`.
    ///
    /// Returns `Err` if nothing arrives in time.
    pub async fn try_recv(
        &mut self,
        within: Duration,
    ) -> Result<Option<Result<Message, CodecError>>, tokio::time::error::Elapsed> {
        timeout(within, self.framed.next()).await
    }

    /// Assert that no frame arrives within `within`.
    ///
    /// # Panics
    ///
    /// Panics if a frame or end of stream is observed.
    pub async fn assert_silent(&mut self, within: Duration) {
        if let Ok(frame) = self.try_recv(within).await {
            panic!("expected silence, got {frame:?}");
        }
    }

    /// Wait until the endpoint closes its side of the stream.
    ///
    /// # Panics
    ///
    /// Panics if the stream stays open past [`FRAME_TIMEOUT`]. Frames that
    /// arrive first are discarded.
    pub async fn expect_eof(&mut self) {
        loop {
            match timeout(FRAME_TIMEOUT, self.framed.next())
                .await
                .expect("stream closed within timeout")
            {
                None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    }
}
