//! Actor task driving a single endpoint.
//!
//! The actor polls its shutdown token, the writer task, completed handler
//! futures, queued commands, the inbound frame stream, and the heartbeat timer
//! in a `biased` `tokio::select!` loop. Handlers run as futures owned by the
//! actor, so a handler awaiting its own ask never blocks the read path.
//! Outbound frames go through an unbounded queue to a separate writer task, so
//! a peer that stops reading never stalls inbound processing.

use std::{
    io,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use futures::{
    FutureExt,
    SinkExt,
    StreamExt,
    future::{self, BoxFuture},
    stream::FuturesUnordered,
};
use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadHalf},
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior, interval_at, timeout},
};
use tokio_util::{
    codec::{BytesCodec, FramedRead, FramedWrite},
    sync::CancellationToken,
};

use super::{
    Command,
    Endpoint,
    EndpointConfig,
    event::{EndpointEvent, Listeners},
    pending::PendingRequests,
};
use crate::{
    codec::{CodecError, JsonFrameCodec, encode_with_limit},
    error::{Error, ReplyError},
    message::{Kind, Message, function_not_understood},
    metrics::{self, Direction},
    panic::{HandlerPanic, format_panic},
    router::{Handler, Router},
};

/// Upper bound on flushing queued frames and shutting down the writer during
/// teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// RAII guard keeping the live endpoints gauge accurate even if the actor
/// unwinds.
struct ActiveEndpoint;

impl ActiveEndpoint {
    fn new() -> Self {
        metrics::inc_endpoints();
        Self
    }
}

impl Drop for ActiveEndpoint {
    fn drop(&mut self) { metrics::dec_endpoints(); }
}

enum Event {
    Shutdown,
    WriterStopped(Result<(), Error>),
    Completed(Option<Message>),
    Command(Command),
    Inbound(Option<Result<Message, CodecError>>),
    Heartbeat,
}

/// Why the processing loop stopped.
enum Teardown {
    Closed,
    Failed(Error),
}

pub(crate) struct EndpointActor<T> {
    endpoint: Endpoint,
    reader: FramedRead<ReadHalf<T>, JsonFrameCodec<Message>>,
    outbound: mpsc::UnboundedSender<Bytes>,
    /// `None` once the writer task has been joined.
    writer: Option<JoinHandle<Result<(), Error>>>,
    commands: mpsc::UnboundedReceiver<Command>,
    shutdown: CancellationToken,
    router: Router,
    listeners: Listeners,
    pending: PendingRequests,
    in_flight: FuturesUnordered<BoxFuture<'static, Option<Message>>>,
    heartbeat: Option<Interval>,
    echo_heartbeats: bool,
    max_frame_length: usize,
}

impl<T> EndpointActor<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    pub(super) fn new(
        endpoint: Endpoint,
        io: T,
        commands: mpsc::UnboundedReceiver<Command>,
        shutdown: CancellationToken,
        router: Router,
        listeners: Listeners,
        config: EndpointConfig,
    ) -> Self {
        let (read, write) = tokio::io::split(io);
        let (outbound, frames) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_frames(FramedWrite::new(write, BytesCodec::new()), frames));
        let heartbeat = config.heartbeat_interval.map(|period| {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        Self {
            endpoint,
            reader: FramedRead::new(read, JsonFrameCodec::new(config.max_frame_length)),
            outbound,
            writer: Some(writer),
            commands,
            shutdown,
            router,
            listeners,
            pending: PendingRequests::default(),
            in_flight: FuturesUnordered::new(),
            heartbeat,
            echo_heartbeats: config.echo_heartbeats,
            max_frame_length: config.max_frame_length,
        }
    }

    /// Run the actor, logging and discarding any panic.
    ///
    /// A panicking actor still cancels its shutdown token; its pending asks
    /// resolve with [`ReplyError::Closed`] when their senders drop.
    pub(crate) async fn run_guarded(self) {
        let session = self.endpoint.session_id();
        let shutdown = self.shutdown.clone();
        if let Err(panic) = AssertUnwindSafe(self.run()).catch_unwind().await {
            shutdown.cancel();
            let panic_msg = format_panic(panic);
            // Emit via both `log` and `tracing` for tests that capture either.
            error!("endpoint task panicked: panic={panic_msg}, session={session:?}");
            tracing::error!(panic = %panic_msg, ?session, "endpoint task panicked");
        }
    }

    async fn run(mut self) {
        let _active = ActiveEndpoint::new();
        info!(
            "endpoint started: session={:?}, heartbeat={:?}, echo_heartbeats={}",
            self.endpoint.session_id(),
            self.heartbeat.as_ref().map(Interval::period),
            self.echo_heartbeats
        );
        self.listeners.emit(&self.endpoint, &EndpointEvent::Connected);
        let outcome = self.process().await;
        self.teardown(outcome).await;
    }

    async fn process(&mut self) -> Teardown {
        loop {
            let step = match self.next_event().await {
                Event::Shutdown | Event::Inbound(None) => return Teardown::Closed,
                Event::WriterStopped(result) => {
                    self.writer = None;
                    return match result {
                        Ok(()) => Teardown::Closed,
                        Err(e) => Teardown::Failed(e),
                    };
                }
                Event::Inbound(Some(Err(e))) => return Teardown::Failed(e.into()),
                Event::Inbound(Some(Ok(message))) => {
                    metrics::inc_frames(Direction::Inbound);
                    self.dispatch(message)
                }
                Event::Command(command) => {
                    self.handle_command(command);
                    Ok(())
                }
                Event::Completed(Some(reply)) => self.write_message(&reply),
                Event::Completed(None) => Ok(()),
                Event::Heartbeat => self.write_message(&Message::heartbeat()),
            };
            if let Err(e) = step {
                return Teardown::Failed(e);
            }
        }
    }

    async fn next_event(&mut self) -> Event {
        tokio::select! {
            biased;

            () = self.shutdown.cancelled() => Event::Shutdown,
            result = join_writer(self.writer.as_mut()) => Event::WriterStopped(result),
            Some(reply) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                Event::Completed(reply)
            }
            Some(command) = self.commands.recv() => Event::Command(command),
            frame = self.reader.next() => Event::Inbound(frame),
            () = next_tick(self.heartbeat.as_mut()) => Event::Heartbeat,
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Tell(frame) => self.write_frame(frame),
            Command::Ask { id, frame, reply } => {
                if let Err(reply) = self.pending.register(id.clone(), reply) {
                    let reason = format!("duplicate ask id {id}");
                    let _ = reply.send(Err(ReplyError::ConnectionFailed(reason)));
                    return;
                }
                self.write_frame(frame);
            }
        }
    }

    fn dispatch(&mut self, message: Message) -> Result<(), Error> {
        match message.kind {
            Kind::Tell => {
                self.dispatch_tell(message);
                Ok(())
            }
            Kind::Ask => self.dispatch_ask(message),
            Kind::Reply => {
                self.resolve(message);
                Ok(())
            }
            Kind::Heartbeat if self.echo_heartbeats => self.write_message(&Message::heartbeat()),
            Kind::Heartbeat => Ok(()),
        }
    }

    fn dispatch_tell(&mut self, message: Message) {
        let Message { function, body, .. } = message;
        let Some(function) = function else {
            warn!("dropping tell without function: session={:?}", self.endpoint.session_id());
            return;
        };
        let endpoint = self.endpoint.clone();
        let task = match self.router.get(&function).cloned() {
            Some(Handler::Tell(handler)) => {
                guarded(function, move || handler(endpoint, body)).map(|_| None).boxed()
            }
            Some(Handler::Ask(handler)) => guarded(function.clone(), move || handler(endpoint, body))
                .map(move |outcome| {
                    if let Ok(Err(e)) = outcome {
                        debug!("ask handler invoked by tell failed: function={function}, error={e}");
                    }
                    None
                })
                .boxed(),
            None => {
                self.unhandled(Kind::Tell, function);
                return;
            }
        };
        self.in_flight.push(task);
    }

    fn dispatch_ask(&mut self, message: Message) -> Result<(), Error> {
        let Message {
            id, function, body, ..
        } = message;
        let (Some(id), Some(function)) = (id, function) else {
            warn!("dropping ask without id or function: session={:?}", self.endpoint.session_id());
            return Ok(());
        };
        let endpoint = self.endpoint.clone();
        let task = match self.router.get(&function).cloned() {
            Some(Handler::Ask(handler)) => guarded(function, move || handler(endpoint, body))
                .map(move |outcome| Some(Message::reply(id, outcome.and_then(|reply| reply))))
                .boxed(),
            Some(Handler::Tell(handler)) => guarded(function, move || handler(endpoint, body))
                .map(move |outcome| Some(Message::reply(id, outcome.map(|()| None))))
                .boxed(),
            None => {
                let reply = Message::reply(id, Err(function_not_understood(&function)));
                self.unhandled(Kind::Ask, function);
                return self.write_message(&reply);
            }
        };
        self.in_flight.push(task);
        Ok(())
    }

    fn resolve(&mut self, message: Message) {
        let Some(id) = message.id.clone() else {
            debug!("ignoring reply without id");
            return;
        };
        let outcome = message.into_outcome().map_err(ReplyError::Remote);
        if !self.pending.complete(&id, outcome) {
            debug!("ignoring reply for unknown ask: id={id}");
        }
    }

    fn unhandled(&self, kind: Kind, function: String) {
        warn!(
            "no handler registered: kind={kind}, function={function}, session={:?}",
            self.endpoint.session_id()
        );
        self.listeners
            .emit(&self.endpoint, &EndpointEvent::Unhandled { kind, function });
    }

    /// Encode and write an actor-generated message.
    ///
    /// A reply too large to encode is replaced by an error reply so the
    /// asking side still receives exactly one answer.
    fn write_message(&self, message: &Message) -> Result<(), Error> {
        let frame = match encode_with_limit(message, self.max_frame_length) {
            Ok(frame) => frame,
            Err(e) => match (&message.kind, &message.id) {
                (Kind::Reply, Some(id)) => {
                    warn!("replacing unencodable reply: id={id}, error={e}");
                    let fallback = Message::reply(id.clone(), Err(e.to_string()));
                    encode_with_limit(&fallback, self.max_frame_length)?
                }
                _ => return Err(e.into()),
            },
        };
        self.write_frame(frame);
        Ok(())
    }

    /// Queue `frame` for the writer task.
    ///
    /// A send only fails once the writer has stopped; the loop observes that
    /// through [`Event::WriterStopped`].
    fn write_frame(&self, frame: Bytes) {
        if self.outbound.send(frame).is_err() {
            debug!("writer stopped, dropping frame: session={:?}", self.endpoint.session_id());
        }
    }

    async fn teardown(mut self, outcome: Teardown) {
        self.shutdown.cancel();
        self.commands.close();
        self.heartbeat = None;
        self.in_flight.clear();

        let reason = match &outcome {
            Teardown::Closed => ReplyError::Closed,
            Teardown::Failed(e) => ReplyError::ConnectionFailed(e.to_string()),
        };
        // Tells accepted before teardown are still written; asks could never
        // be answered, so they fail.
        let mut abandoned = 0;
        let mut flushed_tells = 0;
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Tell(frame) => {
                    self.write_frame(frame);
                    flushed_tells += 1;
                }
                Command::Ask { reply, .. } => {
                    let _ = reply.send(Err(reason.clone()));
                    abandoned += 1;
                }
            }
        }
        abandoned += self.pending.drain(&reason);
        self.close_writer().await;

        let session = self.endpoint.session_id();
        let event = match outcome {
            Teardown::Closed => {
                info!(
                    "endpoint closed: session={session:?}, abandoned_asks={abandoned}, \
                     flushed_tells={flushed_tells}"
                );
                EndpointEvent::Closed
            }
            Teardown::Failed(e) => {
                metrics::inc_errors();
                warn!("endpoint failed: session={session:?}, error={e}, abandoned_asks={abandoned}");
                tracing::warn!(error = %e, ?session, abandoned, "endpoint failed");
                EndpointEvent::Failed(Arc::new(e))
            }
        };
        self.listeners.emit(&self.endpoint, &event);
    }

    /// Let the writer drain its queue and shut the transport down, within
    /// [`CLOSE_TIMEOUT`].
    async fn close_writer(&mut self) {
        let Some(mut writer) = self.writer.take() else {
            return;
        };
        // The writer stops once every sender is gone; the only other one lives
        // in `self.outbound`.
        let (closed, _) = mpsc::unbounded_channel();
        drop(std::mem::replace(&mut self.outbound, closed));
        match timeout(CLOSE_TIMEOUT, &mut writer).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => debug!("failed to close transport: error={e}"),
            Ok(Err(e)) => debug!("writer task failed: error={e}"),
            Err(_) => {
                debug!("timed out closing transport");
                writer.abort();
            }
        }
    }
}

/// Write queued frames until the queue closes, then shut the sink down.
async fn write_frames<W>(
    mut sink: FramedWrite<W, BytesCodec>,
    mut frames: mpsc::UnboundedReceiver<Bytes>,
) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        sink.send(frame).await?;
        metrics::inc_frames(Direction::Outbound);
    }
    SinkExt::<Bytes>::close(&mut sink).await?;
    Ok(())
}

/// Await the writer task, or never resolve once it has been joined.
async fn join_writer(writer: Option<&mut JoinHandle<Result<(), Error>>>) -> Result<(), Error> {
    match writer {
        Some(handle) => handle.await.unwrap_or_else(|e| Err(Error::Io(io::Error::other(e)))),
        None => future::pending().await,
    }
}

async fn next_tick(heartbeat: Option<&mut Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

/// Invoke a handler, converting a panic in either the call or the returned
/// future into the error text sent to the peer.
fn guarded<T, F>(function: String, call: F) -> BoxFuture<'static, Result<T, String>>
where
    T: Send + 'static,
    F: FnOnce() -> BoxFuture<'static, T>,
{
    let report = move |panic| report_panic(HandlerPanic::new(function, format_panic(panic)));
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(fut) => AssertUnwindSafe(fut)
            .catch_unwind()
            .map(move |outcome| outcome.map_err(report))
            .boxed(),
        Err(panic) => future::ready(Err(report(panic))).boxed(),
    }
}

fn report_panic(panic: HandlerPanic) -> String {
    metrics::inc_handler_panics();
    let (function, message) = (panic.function(), panic.message());
    error!("handler panicked: function={function}, panic={message}");
    tracing::error!(%function, panic = %message, "handler panicked");
    panic.to_string()
}
