//! Hand-driven link for tests that script the device side byte by byte.

use std::{
    io,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use bytes::Bytes;
use fileframe::{LinkEvent, Session, SessionConfig, TransportLink};
use tokio::sync::mpsc;

/// [`TransportLink`] that records every piece it is given.
#[derive(Clone, Debug)]
pub struct ScriptedLink {
    sent: mpsc::UnboundedSender<Bytes>,
    log: Arc<Mutex<Vec<Bytes>>>,
}

#[async_trait]
impl TransportLink for ScriptedLink {
    async fn send(&mut self, piece: Bytes) -> io::Result<()> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(piece.clone());
        self.sent
            .send(piece)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "remote dropped"))
    }
}

/// The far end of a [`ScriptedLink`]: observes sent pieces and injects
/// fragments.
#[derive(Debug)]
pub struct Remote {
    sent: mpsc::UnboundedReceiver<Bytes>,
    log: Arc<Mutex<Vec<Bytes>>>,
    events: mpsc::Sender<LinkEvent>,
}

impl Remote {
    /// Wait for the next piece the session sends.
    pub async fn next_piece(&mut self) -> Option<Bytes> { self.sent.recv().await }

    /// Every piece sent so far.
    #[must_use]
    pub fn pieces(&self) -> Vec<Bytes> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of pieces sent so far.
    #[must_use]
    pub fn piece_count(&self) -> usize {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Deliver `bytes` as one fragment.
    ///
    /// # Panics
    ///
    /// Panics if the session has dropped its event channel.
    pub async fn deliver(&self, bytes: impl Into<Bytes>) {
        self.events
            .send(LinkEvent::Fragment(bytes.into()))
            .await
            .expect("session event channel closed");
    }

    /// Deliver `bytes` as fragments of at most `len` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero or the session has dropped its event channel.
    pub async fn deliver_split(&self, bytes: &[u8], len: usize) {
        for fragment in bytes.chunks(len) {
            self.deliver(Bytes::copy_from_slice(fragment)).await;
        }
    }

    /// Deliver `bytes` cut at each of `cuts`, which must be ascending.
    ///
    /// # Panics
    ///
    /// Panics if the session has dropped its event channel.
    pub async fn deliver_at(&self, bytes: &[u8], cuts: &[usize]) {
        let mut start = 0;
        for &cut in cuts.iter().chain(std::iter::once(&bytes.len())) {
            let cut = cut.clamp(start, bytes.len());
            if cut > start {
                self.deliver(Bytes::copy_from_slice(&bytes[start..cut])).await;
            }
            start = cut;
        }
    }

    /// Report a disconnect to the session.
    pub async fn disconnect(&self) { let _ = self.events.send(LinkEvent::Disconnected).await; }
}

/// Build a session over a [`ScriptedLink`] and return its [`Remote`].
///
/// # Examples
///
/// ```
/// use fileframe::SessionConfig;
/// use fileframe_testing::scripted_session;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (session, mut remote) = scripted_session(SessionConfig::default());
/// let delete = tokio::spawn(async move { session.delete("/a").await });
/// let command = remote.next_piece().await.expect("command");
/// assert_eq!(&command[..], b"\x30\x00\x02\x00/a");
/// remote.deliver(&b"\x31\x01"[..]).await;
/// delete.await.expect("join").expect("deleted");
/// # }
/// ```
#[must_use]
pub fn scripted_session(config: SessionConfig) -> (Session<ScriptedLink>, Remote) {
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::channel(256);
    let log = Arc::new(Mutex::new(Vec::new()));
    let link = ScriptedLink {
        sent: sent_tx,
        log: Arc::clone(&log),
    };
    (
        Session::new(link, event_rx, config),
        Remote {
            sent: sent_rx,
            log,
            events: event_tx,
        },
    )
}
