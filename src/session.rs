//! File transfer session over a single device link.
//!
//! A [`Session`] owns the outbound half of a [`TransportLink`], the inbound
//! [`LinkEvent`] channel and the [`FrameAssembler`] in between. It runs one
//! command at a time: a second call while an operation is in flight fails
//! with [`FileTransferError::Busy`] before anything is written to the link.
//!
//! Failures that leave the link in an unknown state close the session:
//! disconnects, transport write errors, timeouts and cancellation. Every later
//! call then fails with [`FileTransferError::Closed`]. Protocol errors and
//! non-OK device statuses end only the current operation.

use std::{sync::Arc, time::SystemTime};

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{
        Mutex,
        MutexGuard,
        mpsc::{self, error::TryRecvError},
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, field};

use crate::{
    assembler::FrameAssembler,
    config::SessionConfig,
    error::{CloseReason, FileTransferError, LinkError},
    link::{LinkEvent, StreamLink, TransportLink, split_stream},
    pacing::Pacer,
    protocol::{Command, Request, to_wire_time},
    transfer::{
        DirEntry,
        ListDirTransfer,
        ReadTransfer,
        StatusTransfer,
        Step,
        Transfer,
        WriteAck,
        WriteTransfer,
    },
};

/// Result type returned by session operations.
pub type Result<T, E = FileTransferError> = std::result::Result<T, E>;

/// Handle to a file transfer session.
///
/// Cloning the handle is cheap; all clones drive the same link and share the
/// one-operation-at-a-time guard.
///
/// # Examples
///
/// ```no_run
/// use fileframe::{Session, SessionConfig};
/// use tokio::net::TcpStream;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let stream = TcpStream::connect("127.0.0.1:7878").await?;
/// let session = Session::from_stream(stream, SessionConfig::default());
/// for entry in session.list_dir("/").await? {
///     println!("{}", entry.path);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Session<L> {
    inner: Arc<Inner<L>>,
}

impl<L> Clone for Session<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L> std::fmt::Debug for Session<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.inner.config)
            .field("cancelled", &self.inner.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

struct Inner<L> {
    engine: Mutex<Engine<L>>,
    config: SessionConfig,
    cancel: CancellationToken,
}

/// Whether the engine is free, running a command, or finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// No operation pending.
    Idle,
    /// A command is in flight.
    Busy(Command),
    /// The session can no longer be used.
    Closed(CloseReason),
}

struct Engine<L> {
    link: L,
    events: mpsc::Receiver<LinkEvent>,
    assembler: FrameAssembler,
    pacer: Pacer,
    state: State,
}

impl<L> Session<L>
where
    L: TransportLink + 'static,
{
    /// Create a session over an established link.
    ///
    /// `events` carries what the transport delivers from the device. A closed
    /// channel is treated the same as [`LinkEvent::Disconnected`].
    #[must_use]
    pub fn new(link: L, events: mpsc::Receiver<LinkEvent>, config: SessionConfig) -> Self {
        let engine = Engine {
            link,
            events,
            assembler: FrameAssembler::new(config.receive_capacity_value()),
            pacer: Pacer::new(config.max_fragment_len_value(), config.pacing_delay_value()),
            state: State::Idle,
        };
        Self {
            inner: Arc::new(Inner {
                engine: Mutex::new(engine),
                config,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Configuration this session was created with.
    #[must_use]
    pub fn config(&self) -> &SessionConfig { &self.inner.config }

    /// Abort the pending operation, if any, and close the session.
    ///
    /// The pending call resolves with [`FileTransferError::Cancelled`]; later
    /// calls fail with [`FileTransferError::Closed`].
    pub fn cancel(&self) { self.inner.cancel.cancel(); }

    /// Read the whole file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`FileTransferError::Device`] when the file cannot be read, or
    /// any session error described in [`FileTransferError`].
    pub async fn read_file(&self, path: &str) -> Result<Bytes> {
        let config = &self.inner.config;
        let transfer = ReadTransfer::new(config.read_credit(), config.max_read_len_value());
        let request = Request::Read {
            path: path.to_owned(),
            max_len: transfer.initial_window(),
        };
        let span = operation_span(Command::Read, path);
        self.execute(request, transfer)
            .instrument(span.clone())
            .await
            .inspect(|content| {
                span.record("bytes", content.len());
            })
    }

    /// Write `content` to `path` starting at byte `offset`.
    ///
    /// The device truncates the file to `offset + content.len()`. When
    /// `mod_time` is `None` the current time is sent.
    ///
    /// # Errors
    ///
    /// Returns [`FileTransferError::InvalidRequest`] when the write does not
    /// fit the protocol's 32-bit sizes, [`FileTransferError::Device`] when the
    /// device refuses it, or any session error described in
    /// [`FileTransferError`].
    pub async fn write_file(
        &self,
        path: &str,
        offset: u32,
        content: impl Into<Bytes>,
        mod_time: Option<SystemTime>,
    ) -> Result<WriteAck> {
        let transfer = WriteTransfer::new(offset, content.into())?;
        let request = Request::Write {
            path: path.to_owned(),
            offset,
            mod_time_ns: to_wire_time(mod_time.unwrap_or_else(SystemTime::now)),
            total_size: transfer.end(),
        };
        self.execute(request, transfer)
            .instrument(operation_span(Command::Write, path))
            .await
    }

    /// List the entries of the directory at `path`, in device order.
    ///
    /// # Errors
    ///
    /// Returns [`FileTransferError::Device`] when the directory cannot be
    /// listed, or any session error described in [`FileTransferError`].
    pub async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let request = Request::ListDir {
            path: path.to_owned(),
        };
        self.execute(request, ListDirTransfer::default())
            .instrument(operation_span(Command::ListDir, path))
            .await
    }

    /// Create the directory `path`, including missing parents.
    ///
    /// # Errors
    ///
    /// Returns [`FileTransferError::Device`] when the device refuses, or any
    /// session error described in [`FileTransferError`].
    pub async fn make_dir(&self, path: &str, mod_time: Option<SystemTime>) -> Result<()> {
        let request = Request::Mkdir {
            path: path.to_owned(),
            mod_time_ns: to_wire_time(mod_time.unwrap_or_else(SystemTime::now)),
        };
        self.execute(request, StatusTransfer::make_dir())
            .instrument(operation_span(Command::Mkdir, path))
            .await
    }

    /// Delete the file or directory at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`FileTransferError::Device`] when the device refuses, or any
    /// session error described in [`FileTransferError`].
    pub async fn delete(&self, path: &str) -> Result<()> {
        let request = Request::Delete {
            path: path.to_owned(),
        };
        self.execute(request, StatusTransfer::delete())
            .instrument(operation_span(Command::Delete, path))
            .await
    }

    /// Move or rename `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`FileTransferError::Device`] when the device refuses, or any
    /// session error described in [`FileTransferError`].
    pub async fn move_path(&self, from: &str, to: &str) -> Result<()> {
        let request = Request::Move {
            from: from.to_owned(),
            to: to.to_owned(),
        };
        self.execute(request, StatusTransfer::move_path())
            .instrument(tracing::debug_span!(
                "session.move",
                from,
                to,
                result = field::Empty
            ))
            .await
    }

    async fn execute<T>(&self, request: Request, transfer: T) -> Result<T::Output>
    where
        T: Transfer,
    {
        let engine = self
            .inner
            .engine
            .try_lock()
            .map_err(|_| FileTransferError::Busy)?;
        let mut op = InFlight::new(engine);
        let outcome = self.run(&mut op, request, transfer).await;
        op.finish(&outcome);
        record_outcome(&outcome);
        outcome
    }

    async fn run<T>(
        &self,
        op: &mut InFlight<'_, L>,
        request: Request,
        transfer: T,
    ) -> Result<T::Output>
    where
        T: Transfer,
    {
        if let State::Closed(reason) = op.engine.state {
            return Err(FileTransferError::Closed(reason));
        }
        if self.inner.cancel.is_cancelled() {
            return Err(FileTransferError::Closed(CloseReason::Cancelled));
        }
        let command = request.to_bytes()?;
        let engine = &mut *op.engine;
        let drive = async move {
            match self.inner.config.operation_timeout_value() {
                Some(limit) => tokio::time::timeout(limit, engine.drive(command, transfer))
                    .await
                    .unwrap_or(Err(FileTransferError::Timeout(limit))),
                None => engine.drive(command, transfer).await,
            }
        };
        tokio::select! {
            biased;
            () = self.inner.cancel.cancelled() => Err(FileTransferError::Cancelled),
            outcome = drive => outcome,
        }
    }
}

impl<T> Session<StreamLink<T>>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Create a session over a byte stream such as a TCP bridge or serial
    /// adapter.
    ///
    /// A background task forwards reads from the stream as fragments of at
    /// most the configured receive capacity. Must be called within a Tokio
    /// runtime.
    #[must_use]
    pub fn from_stream(stream: T, config: SessionConfig) -> Self {
        let (link, events, _reader) = split_stream(stream, config.receive_capacity_value());
        Self::new(link, events, config)
    }
}

impl<L> Engine<L>
where
    L: TransportLink,
{
    async fn drive<T>(&mut self, command: Bytes, mut transfer: T) -> Result<T::Output>
    where
        T: Transfer,
    {
        self.discard_stale()?;
        self.send(command).await?;
        self.state = State::Busy(transfer.command());
        loop {
            while let Some(frame) = self.assembler.next_frame(transfer.expects())? {
                tracing::trace!(tag = %frame.tag(), "frame assembled");
                match transfer.on_frame(frame)? {
                    Step::Reply(reply) => self.send(reply.to_bytes()?).await?,
                    Step::Await => {}
                    Step::Done(output) => return Ok(output),
                }
            }
            match self.events.recv().await {
                Some(LinkEvent::Fragment(fragment)) => {
                    tracing::trace!(len = fragment.len(), "fragment received");
                    self.assembler.push(&fragment);
                }
                Some(LinkEvent::Disconnected) | None => return Err(LinkError::Disconnected.into()),
            }
        }
    }

    async fn send(&mut self, frame: Bytes) -> Result<()> {
        tracing::debug!(len = frame.len(), "sending frame");
        self.pacer
            .send(&mut self.link, frame)
            .await
            .map_err(|e| LinkError::Io(e).into())
    }

    /// Drop fragments that arrived while no operation was pending.
    fn discard_stale(&mut self) -> Result<(), LinkError> {
        loop {
            match self.events.try_recv() {
                Ok(LinkEvent::Fragment(fragment)) => {
                    tracing::warn!(len = fragment.len(), "discarding stray fragment");
                }
                Ok(LinkEvent::Disconnected) | Err(TryRecvError::Disconnected) => {
                    return Err(LinkError::Disconnected);
                }
                Err(TryRecvError::Empty) => return Ok(()),
            }
        }
    }
}

impl<L> Engine<L> {
    fn reset(&mut self) {
        let dropped = self.assembler.clear();
        if dropped > 0 {
            tracing::warn!(dropped, "discarding unconsumed bytes");
        }
        self.state = State::Idle;
    }

    fn close(&mut self, reason: CloseReason) {
        let dropped = self.assembler.clear();
        match self.state {
            State::Closed(_) => return,
            State::Busy(command) => {
                tracing::info!(%reason, %command, dropped, "session closed");
            }
            State::Idle => tracing::info!(%reason, "session closed"),
        }
        self.state = State::Closed(reason);
        self.events.close();
    }
}

/// Exclusive access to the engine for one operation.
///
/// Dropping it before [`InFlight::finish`] means the operation future was
/// dropped mid-exchange, so the link state is unknown and the session closes.
struct InFlight<'a, L> {
    engine: MutexGuard<'a, Engine<L>>,
    armed: bool,
}

impl<'a, L> InFlight<'a, L> {
    fn new(engine: MutexGuard<'a, Engine<L>>) -> Self {
        Self {
            engine,
            armed: true,
        }
    }

    fn finish<T>(&mut self, outcome: &Result<T>) {
        self.armed = false;
        match outcome.as_ref().err().and_then(FileTransferError::close_reason) {
            Some(reason) => self.engine.close(reason),
            None => self.engine.reset(),
        }
    }
}

impl<L> Drop for InFlight<'_, L> {
    fn drop(&mut self) {
        if self.armed {
            self.engine.close(CloseReason::Cancelled);
        }
    }
}

fn operation_span(command: Command, path: &str) -> Span {
    tracing::debug_span!(
        "session.op",
        command = %command,
        path,
        bytes = field::Empty,
        result = field::Empty
    )
}

fn record_outcome<T>(outcome: &Result<T>) {
    let span = Span::current();
    match outcome {
        Ok(_) => span.record("result", "ok"),
        Err(e) => span.record("result", field::display(e)),
    };
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::{Bytes, BytesMut};
    use futures::FutureExt;
    use rstest::{fixture, rstest};
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        link::ChannelLink,
        protocol::{ReadData, Response, Status, StatusReply, Tag},
    };

    struct Harness {
        session: Session<ChannelLink>,
        sent: mpsc::Receiver<Bytes>,
        events: mpsc::Sender<LinkEvent>,
    }

    impl Harness {
        async fn deliver(&self, bytes: &[u8]) {
            self.events
                .send(LinkEvent::Fragment(Bytes::copy_from_slice(bytes)))
                .await
                .expect("session alive");
        }

        /// Collect everything sent so far into one buffer.
        fn drain_sent(&mut self) -> BytesMut {
            let mut out = BytesMut::new();
            while let Ok(piece) = self.sent.try_recv() {
                out.extend_from_slice(&piece);
            }
            out
        }
    }

    #[fixture]
    fn harness() -> Harness {
        let (link_tx, sent) = mpsc::channel(64);
        let (events, rx) = mpsc::channel(64);
        let config = SessionConfig::default()
            .pacing_delay(Duration::ZERO)
            .operation_timeout(Some(Duration::from_secs(5)));
        Harness {
            session: Session::new(ChannelLink::new(link_tx), rx, config),
            sent,
            events,
        }
    }

    fn delete_ok() -> Bytes {
        Response::Status(StatusReply {
            tag: Tag::DeleteStatus,
            status: Status::Ok,
            mod_time_ns: 0,
        })
        .to_bytes()
    }

    #[rstest]
    #[tokio::test]
    async fn second_operation_is_busy_without_sending(mut harness: Harness) {
        let session = harness.session.clone();
        let first = tokio::spawn(async move { session.delete("/a").await });
        let piece = harness.sent.recv().await.expect("command sent");
        assert_eq!(piece[0], Tag::DeleteCommand.as_u8());

        let second = harness.session.list_dir("/").now_or_never();
        assert!(matches!(second, Some(Err(FileTransferError::Busy))));
        assert!(harness.sent.try_recv().is_err(), "busy call must not send");

        harness.deliver(&delete_ok()).await;
        first.await.expect("join").expect("delete succeeds");
    }

    #[rstest]
    #[tokio::test]
    async fn disconnect_rejects_and_closes(mut harness: Harness) {
        let session = harness.session.clone();
        let read = tokio::spawn(async move { session.read_file("/big.bin").await });
        harness.sent.recv().await.expect("command sent");

        // Half a read data header is left in the assembler.
        harness.deliver(&[Tag::ReadData.as_u8(), 1, 0, 0, 0, 0]).await;
        harness
            .events
            .send(LinkEvent::Disconnected)
            .await
            .expect("session alive");

        let err = read.await.expect("join").expect_err("disconnected");
        assert!(matches!(err, FileTransferError::Link(LinkError::Disconnected)));
        assert!(harness.session.inner.engine.lock().await.assembler.is_empty());

        let err = harness.session.delete("/x").await.expect_err("closed");
        assert!(matches!(
            err,
            FileTransferError::Closed(CloseReason::Disconnected)
        ));
        assert!(harness.drain_sent().is_empty());
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn timeout_closes_the_session(mut harness: Harness) {
        let err = harness.session.delete("/slow").await.expect_err("no reply");
        assert!(matches!(err, FileTransferError::Timeout(d) if d == Duration::from_secs(5)));
        harness.drain_sent();

        let err = harness.session.delete("/slow").await.expect_err("closed");
        assert!(matches!(err, FileTransferError::Closed(CloseReason::TimedOut)));
    }

    #[rstest]
    #[tokio::test]
    async fn cancel_rejects_the_pending_operation(mut harness: Harness) {
        let session = harness.session.clone();
        let pending = tokio::spawn(async move { session.list_dir("/").await });
        harness.sent.recv().await.expect("command sent");

        harness.session.cancel();
        let err = pending.await.expect("join").expect_err("cancelled");
        assert!(matches!(err, FileTransferError::Cancelled));

        let err = harness.session.list_dir("/").await.expect_err("closed");
        assert!(matches!(err, FileTransferError::Closed(CloseReason::Cancelled)));
    }

    #[rstest]
    #[tokio::test]
    async fn dropped_future_closes_the_session(mut harness: Harness) {
        {
            let mut op = Box::pin(harness.session.delete("/a"));
            assert!((&mut op).now_or_never().is_none());
        }
        assert_eq!(harness.drain_sent()[0], Tag::DeleteCommand.as_u8());
        let err = harness.session.delete("/a").await.expect_err("closed");
        assert!(matches!(err, FileTransferError::Closed(CloseReason::Cancelled)));
    }

    #[rstest]
    #[tokio::test]
    async fn device_status_keeps_the_session_usable(mut harness: Harness) {
        let session = harness.session.clone();
        let read = tokio::spawn(async move { session.read_file("/missing").await });
        harness.sent.recv().await.expect("command sent");
        let refusal = Response::ReadData(ReadData {
            status: Status::Error,
            chunk_offset: 0,
            total_length: 0,
            data: Bytes::new(),
        });
        harness.deliver(&refusal.to_bytes()).await;
        let err = read.await.expect("join").expect_err("refused");
        assert_eq!(err.device_status(), Some(Status::Error));

        let session = harness.session.clone();
        let delete = tokio::spawn(async move { session.delete("/a").await });
        harness.sent.recv().await.expect("command sent");
        harness.deliver(&delete_ok()).await;
        delete.await.expect("join").expect("session still usable");
    }

    #[rstest]
    #[tokio::test]
    async fn unexpected_tag_rejects_only_the_operation(mut harness: Harness) {
        let session = harness.session.clone();
        let mkdir = tokio::spawn(async move { session.make_dir("/lib", None).await });
        harness.sent.recv().await.expect("command sent");
        harness.deliver(&delete_ok()).await;
        let err = mkdir.await.expect("join").expect_err("wrong reply");
        assert!(matches!(err, FileTransferError::Protocol(_)));
        assert_eq!(err.close_reason(), None);
    }

    #[rstest]
    #[traced_test]
    #[tokio::test]
    async fn stray_fragments_are_discarded(mut harness: Harness) {
        harness.deliver(b"\x99\x99").await;
        let session = harness.session.clone();
        let delete = tokio::spawn(async move { session.delete("/a").await });
        harness.sent.recv().await.expect("command sent");
        harness.deliver(&delete_ok()).await;
        delete.await.expect("join").expect("delete succeeds");
        assert!(logs_contain("discarding stray fragment"));
    }

    #[rstest]
    #[tokio::test]
    async fn oversized_path_is_rejected_before_sending(mut harness: Harness) {
        let path = "x".repeat(usize::from(u16::MAX) + 1);
        let err = harness.session.delete(&path).await.expect_err("too long");
        assert!(matches!(err, FileTransferError::InvalidRequest(_)));
        assert!(harness.drain_sent().is_empty());
        assert_eq!(harness.session.inner.engine.lock().await.state, State::Idle);
    }
}
