//! Transport seam between the protocol engine and the byte channel.
//!
//! A link has two halves. The outbound half implements [`TransportLink`] and
//! accepts byte pieces in order. The inbound half is a channel of
//! [`LinkEvent`]s: fragments exactly as the transport delivered them, and a
//! disconnect signal. Keeping the inbound side a plain channel lets tests feed
//! the engine arbitrary fragmentations without a real transport.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::mpsc,
    task::JoinHandle,
};

/// Default capacity of the inbound event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Something the transport reported to the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// Bytes delivered by the transport, with arbitrary boundaries.
    Fragment(Bytes),
    /// The transport is gone. Nothing further will arrive.
    Disconnected,
}

/// Sending half of a link.
///
/// Implementations must preserve order across calls. The session splits
/// frames into pieces no longer than its configured fragment length and may
/// pause between calls, so an implementation should write each piece as one
/// transport unit.
#[async_trait]
pub trait TransportLink: Send {
    /// Write one piece to the device.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the transport can no longer carry data.
    async fn send(&mut self, piece: Bytes) -> io::Result<()>;
}

#[async_trait]
impl<L: TransportLink + ?Sized> TransportLink for Box<L> {
    async fn send(&mut self, piece: Bytes) -> io::Result<()> { (**self).send(piece).await }
}

/// [`TransportLink`] that forwards each piece over a Tokio channel.
///
/// Useful for wiring a session to an in-process device model or to a task
/// that owns the real transport.
#[derive(Clone, Debug)]
pub struct ChannelLink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelLink {
    /// Wrap the sending side of a channel.
    #[must_use]
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self { Self { tx } }
}

#[async_trait]
impl TransportLink for ChannelLink {
    async fn send(&mut self, piece: Bytes) -> io::Result<()> {
        self.tx
            .send(piece)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "link receiver dropped"))
    }
}

/// [`TransportLink`] writing to the write half of a byte stream.
#[derive(Debug)]
pub struct StreamLink<T> {
    writer: WriteHalf<T>,
}

#[async_trait]
impl<T> TransportLink for StreamLink<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn send(&mut self, piece: Bytes) -> io::Result<()> {
        self.writer.write_all(&piece).await?;
        self.writer.flush().await
    }
}

/// Split a byte stream into a [`StreamLink`] and an event channel.
///
/// A reader task forwards every successful read as a
/// [`LinkEvent::Fragment`] of at most `read_len` bytes and reports
/// [`LinkEvent::Disconnected`] on end of stream or a read error. The task
/// exits when the stream ends or the receiver is dropped.
///
/// # Examples
///
/// ```
/// use fileframe::link::{LinkEvent, split_stream};
/// use tokio::io::AsyncWriteExt;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (local, mut remote) = tokio::io::duplex(64);
/// let (_link, mut events, _reader) = split_stream(local, 16);
/// remote.write_all(b"\x31\x01").await.expect("write");
/// drop(remote);
/// let mut received = Vec::new();
/// while let Some(event) = events.recv().await {
///     match event {
///         LinkEvent::Fragment(bytes) => received.extend_from_slice(&bytes),
///         LinkEvent::Disconnected => break,
///     }
/// }
/// assert_eq!(received, [0x31, 0x01]);
/// # }
/// ```
pub fn split_stream<T>(
    stream: T,
    read_len: usize,
) -> (StreamLink<T>, mpsc::Receiver<LinkEvent>, JoinHandle<()>)
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let (tx, rx) = mpsc::channel(DEFAULT_EVENT_CAPACITY);
    let handle = tokio::spawn(forward_reads(reader, tx, read_len.max(1)));
    (StreamLink { writer }, rx, handle)
}

async fn forward_reads<T>(mut reader: ReadHalf<T>, tx: mpsc::Sender<LinkEvent>, read_len: usize)
where
    T: AsyncRead,
{
    let mut buf = vec![0_u8; read_len];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("stream reached end of file");
                break;
            }
            Ok(n) => {
                let fragment = Bytes::copy_from_slice(&buf[..n]);
                if tx.send(LinkEvent::Fragment(fragment)).await.is_err() {
                    return;
                }
            }
            Err(error) => {
                tracing::warn!(%error, "stream read failed");
                break;
            }
        }
    }
    let _ = tx.send(LinkEvent::Disconnected).await;
}
