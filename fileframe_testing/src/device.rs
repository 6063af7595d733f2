//! In-memory model of a device speaking the file transfer protocol.
//!
//! [`SimulatedDevice`] keeps a small filesystem, answers every request the way
//! a board does and delivers its replies in fragments of a configurable size.
//! Write pacing can follow a fixed buffer size or a scripted sequence of
//! free-space values, and the whole filesystem can be made read-only to mimic
//! a board whose drive is mounted over USB.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::{Buf, Bytes, BytesMut};
use fileframe::{
    ChannelLink,
    LinkEvent,
    Session,
    SessionConfig,
    protocol::{
        EntryRecord,
        ReadData,
        Request,
        Response,
        Status,
        StatusReply,
        Tag,
        WritePacing,
        response::ENTRY_FLAG_DIRECTORY,
    },
};
use tokio::sync::mpsc;

/// Default free space advertised in each write pacing frame.
pub const DEFAULT_BUFFER_SIZE: u32 = 512;

/// One filesystem node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    /// A regular file.
    File { content: Vec<u8>, mod_time_ns: u64 },
    /// A directory.
    Dir { mod_time_ns: u64 },
}

#[derive(Debug)]
enum Pending {
    Read(Bytes),
    Write {
        path: String,
        next: u32,
        end: u32,
        mod_time_ns: u64,
    },
}

#[derive(Debug)]
struct State {
    nodes: BTreeMap<String, Node>,
    buffer_size: u32,
    free_space: VecDeque<u32>,
    usb_mounted: bool,
    pending: Option<Pending>,
    requests: Vec<Request>,
}

/// Builder and model for an in-memory device.
///
/// # Examples
///
/// ```
/// use fileframe::SessionConfig;
/// use fileframe_testing::SimulatedDevice;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (session, device) = SimulatedDevice::new()
///     .with_file("/boot_out.txt", "Adafruit CircuitPython")
///     .delivery_len(20)
///     .connect(SessionConfig::default().pacing_delay(std::time::Duration::ZERO));
/// let content = session.read_file("/boot_out.txt").await.expect("read");
/// assert_eq!(content, "Adafruit CircuitPython");
/// assert_eq!(device.requests().len(), 1);
/// # }
/// ```
#[derive(Debug)]
pub struct SimulatedDevice {
    state: State,
    delivery_len: usize,
}

impl Default for SimulatedDevice {
    fn default() -> Self { Self::new() }
}

impl SimulatedDevice {
    /// Create a device holding only the root directory.
    #[must_use]
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_owned(), Node::Dir { mod_time_ns: 0 });
        Self {
            state: State {
                nodes,
                buffer_size: DEFAULT_BUFFER_SIZE,
                free_space: VecDeque::new(),
                usb_mounted: false,
                pending: None,
                requests: Vec::new(),
            },
            delivery_len: usize::MAX,
        }
    }

    /// Add a file, creating missing parent directories.
    #[must_use]
    pub fn with_file(mut self, path: &str, content: impl AsRef<[u8]>) -> Self {
        let path = normalize(path);
        self.state.make_dirs(parent(&path), 0);
        self.state.nodes.insert(
            path,
            Node::File {
                content: content.as_ref().to_vec(),
                mod_time_ns: 0,
            },
        );
        self
    }

    /// Add a directory, creating missing parents.
    #[must_use]
    pub fn with_dir(mut self, path: &str) -> Self {
        self.state.make_dirs(&normalize(path), 0);
        self
    }

    /// Free space advertised in each write pacing frame once any scripted
    /// values are used up.
    #[must_use]
    pub fn buffer_size(mut self, bytes: u32) -> Self {
        self.state.buffer_size = bytes;
        self
    }

    /// Free-space values to advertise, in order, while a write is
    /// incomplete. The frame acknowledging the final byte always carries
    /// zero.
    #[must_use]
    pub fn free_space_script(mut self, script: impl IntoIterator<Item = u32>) -> Self {
        self.state.free_space = script.into_iter().collect();
        self
    }

    /// Largest fragment the device hands to the link. Replies are cut
    /// without regard for frame boundaries.
    #[must_use]
    pub fn delivery_len(mut self, bytes: usize) -> Self {
        self.delivery_len = bytes.max(1);
        self
    }

    /// Refuse every modification with `ERROR_USB_MOUNTED`.
    #[must_use]
    pub fn usb_mounted(mut self, mounted: bool) -> Self {
        self.state.usb_mounted = mounted;
        self
    }

    /// Spawn the device and return a session connected to it.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn connect(self, config: SessionConfig) -> (Session<ChannelLink>, DeviceHandle) {
        let (link_tx, link_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);
        let state = Arc::new(Mutex::new(self.state));
        tokio::spawn(serve(
            Arc::clone(&state),
            link_rx,
            event_tx.clone(),
            self.delivery_len,
        ));
        let session = Session::new(ChannelLink::new(link_tx), event_rx, config);
        (
            session,
            DeviceHandle {
                state,
                events: event_tx,
            },
        )
    }
}

/// Inspection and control of a running [`SimulatedDevice`].
#[derive(Clone, Debug)]
pub struct DeviceHandle {
    state: Arc<Mutex<State>>,
    events: mpsc::Sender<LinkEvent>,
}

impl DeviceHandle {
    /// Content of the file at `path`.
    #[must_use]
    pub fn file(&self, path: &str) -> Option<Bytes> {
        match lock(&self.state).nodes.get(&normalize(path)) {
            Some(Node::File { content, .. }) => Some(Bytes::copy_from_slice(content)),
            _ => None,
        }
    }

    /// Node stored at `path`.
    #[must_use]
    pub fn node(&self, path: &str) -> Option<Node> {
        lock(&self.state).nodes.get(&normalize(path)).cloned()
    }

    /// Every frame the device parsed, in arrival order.
    #[must_use]
    pub fn requests(&self) -> Vec<Request> { lock(&self.state).requests.clone() }

    /// Toggle the read-only USB-mounted mode.
    pub fn set_usb_mounted(&self, mounted: bool) { lock(&self.state).usb_mounted = mounted; }

    /// Report a disconnect to the session.
    pub async fn disconnect(&self) { let _ = self.events.send(LinkEvent::Disconnected).await; }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn serve(
    state: Arc<Mutex<State>>,
    mut link: mpsc::Receiver<Bytes>,
    events: mpsc::Sender<LinkEvent>,
    delivery_len: usize,
) {
    let mut inbound = BytesMut::new();
    while let Some(piece) = link.recv().await {
        inbound.extend_from_slice(&piece);
        loop {
            let (request, used) = match Request::parse(&inbound) {
                Ok(Some(parsed)) => parsed,
                Ok(None) => break,
                Err(_) => {
                    inbound.clear();
                    break;
                }
            };
            inbound.advance(used);
            let reply = lock(&state).handle(request);
            for fragment in reply.chunks(delivery_len) {
                let fragment = Bytes::copy_from_slice(fragment);
                if events.send(LinkEvent::Fragment(fragment)).await.is_err() {
                    return;
                }
            }
        }
    }
}

impl State {
    fn handle(&mut self, request: Request) -> BytesMut {
        self.requests.push(request.clone());
        let mut out = BytesMut::new();
        for response in self.respond(request) {
            response.encode(&mut out);
        }
        out
    }

    fn respond(&mut self, request: Request) -> Vec<Response> {
        match request {
            Request::Read { path, max_len } => vec![self.start_read(&path, max_len)],
            Request::ReadPacing { offset, max_len } => vec![self.continue_read(offset, max_len)],
            Request::Write {
                path,
                offset,
                mod_time_ns,
                total_size,
            } => vec![self.start_write(&path, offset, mod_time_ns, total_size)],
            Request::WriteData { chunk_offset, data } => {
                vec![self.continue_write(chunk_offset, &data)]
            }
            Request::Delete { path } => vec![self.delete(&path)],
            Request::Mkdir { path, mod_time_ns } => vec![self.mkdir(&path, mod_time_ns)],
            Request::ListDir { path } => self.list(&path),
            Request::Move { from, to } => vec![self.rename(&from, &to)],
        }
    }

    fn start_read(&mut self, path: &str, max_len: u32) -> Response {
        let Some(Node::File { content, .. }) = self.nodes.get(&normalize(path)) else {
            return read_chunk(Status::Error, &Bytes::new(), 0, 0);
        };
        let content = Bytes::copy_from_slice(content);
        let reply = read_chunk(Status::Ok, &content, 0, max_len);
        self.pending = Some(Pending::Read(content));
        reply
    }

    fn continue_read(&mut self, offset: u32, max_len: u32) -> Response {
        match &self.pending {
            Some(Pending::Read(content)) => read_chunk(Status::Ok, content, offset, max_len),
            _ => read_chunk(Status::Error, &Bytes::new(), 0, 0),
        }
    }

    fn start_write(&mut self, path: &str, offset: u32, mod_time_ns: u64, end: u32) -> Response {
        if self.usb_mounted {
            return write_pacing(Status::UsbMounted, 0, 0, 0);
        }
        let path = normalize(path);
        if !self.is_dir(parent(&path)) || self.is_dir(&path) {
            return write_pacing(Status::Error, 0, 0, 0);
        }
        let mut content = match self.nodes.remove(&path) {
            Some(Node::File { content, .. }) => content,
            _ => Vec::new(),
        };
        content.resize(offset as usize, 0);
        self.nodes.insert(
            path.clone(),
            Node::File {
                content,
                mod_time_ns,
            },
        );
        if offset >= end {
            return write_pacing(Status::Ok, offset, mod_time_ns, 0);
        }
        self.pending = Some(Pending::Write {
            path,
            next: offset,
            end,
            mod_time_ns,
        });
        write_pacing(Status::Ok, offset, mod_time_ns, self.next_free())
    }

    fn continue_write(&mut self, chunk_offset: u32, data: &[u8]) -> Response {
        let Some(Pending::Write {
            path,
            next,
            end,
            mod_time_ns,
        }) = self.pending.take()
        else {
            return write_pacing(Status::Error, 0, 0, 0);
        };
        let fits = u32::try_from(data.len())
            .ok()
            .and_then(|len| next.checked_add(len))
            .filter(|reached| *reached <= end);
        let (Some(reached), true) = (fits, chunk_offset == next) else {
            return write_pacing(Status::Error, next, mod_time_ns, 0);
        };
        if let Some(Node::File { content, .. }) = self.nodes.get_mut(&path) {
            content.extend_from_slice(data);
        }
        if reached == end {
            return write_pacing(Status::Ok, end, mod_time_ns, 0);
        }
        self.pending = Some(Pending::Write {
            path,
            next: reached,
            end,
            mod_time_ns,
        });
        write_pacing(Status::Ok, reached, mod_time_ns, self.next_free())
    }

    fn next_free(&mut self) -> u32 { self.free_space.pop_front().unwrap_or(self.buffer_size) }

    fn delete(&mut self, path: &str) -> Response {
        let path = normalize(path);
        let status = if self.usb_mounted {
            Status::UsbMounted
        } else if path == "/" || !self.nodes.contains_key(&path) {
            Status::Error
        } else {
            self.nodes.retain(|key, _| !within(key, &path));
            Status::Ok
        };
        status_reply(Tag::DeleteStatus, status, 0)
    }

    fn mkdir(&mut self, path: &str, mod_time_ns: u64) -> Response {
        let path = normalize(path);
        let status = if self.usb_mounted {
            Status::UsbMounted
        } else if self.make_dirs(&path, mod_time_ns) {
            Status::Ok
        } else {
            Status::Error
        };
        status_reply(Tag::MkdirStatus, status, mod_time_ns)
    }

    fn list(&self, path: &str) -> Vec<Response> {
        let path = normalize(path);
        if !self.is_dir(&path) {
            return vec![entry(Status::Error, 0, 0, "", None)];
        }
        let children: Vec<_> = self
            .nodes
            .iter()
            .filter(|(key, _)| key.as_str() != "/" && parent(key) == path)
            .collect();
        let Ok(total) = u32::try_from(children.len()) else {
            return vec![entry(Status::Error, 0, 0, "", None)];
        };
        if total == 0 {
            return vec![entry(Status::Ok, 0, 0, "", None)];
        }
        children
            .into_iter()
            .zip(0..)
            .map(|((key, node), index)| entry(Status::Ok, index, total, name(key), Some(node)))
            .collect()
    }

    fn rename(&mut self, from: &str, to: &str) -> Response {
        let (from, to) = (normalize(from), normalize(to));
        let status = if self.usb_mounted {
            Status::UsbMounted
        } else if from == "/"
            || !self.nodes.contains_key(&from)
            || self.nodes.contains_key(&to)
            || !self.is_dir(parent(&to))
            || within(&to, &from)
        {
            Status::Error
        } else {
            let moved: Vec<_> = self
                .nodes
                .keys()
                .filter(|key| within(key, &from))
                .cloned()
                .collect();
            for key in moved {
                if let Some(node) = self.nodes.remove(&key) {
                    self.nodes.insert(format!("{to}{}", &key[from.len()..]), node);
                }
            }
            Status::Ok
        };
        status_reply(Tag::MoveStatus, status, 0)
    }

    fn is_dir(&self, path: &str) -> bool { matches!(self.nodes.get(path), Some(Node::Dir { .. })) }

    /// Create `path` and its missing ancestors. Fails when a file is in the
    /// way.
    fn make_dirs(&mut self, path: &str, mod_time_ns: u64) -> bool {
        if path == "/" {
            return true;
        }
        if !self.make_dirs(parent(path), mod_time_ns) {
            return false;
        }
        match self.nodes.get(path) {
            Some(Node::Dir { .. }) => true,
            Some(Node::File { .. }) => false,
            None => {
                self.nodes
                    .insert(path.to_owned(), Node::Dir { mod_time_ns });
                true
            }
        }
    }
}

fn read_chunk(status: Status, content: &Bytes, offset: u32, max_len: u32) -> Response {
    let start = (offset as usize).min(content.len());
    let end = start.saturating_add(max_len as usize).min(content.len());
    Response::ReadData(ReadData {
        status,
        chunk_offset: offset,
        total_length: u32::try_from(content.len()).unwrap_or(u32::MAX),
        data: content.slice(start..end),
    })
}

fn write_pacing(status: Status, chunk_offset: u32, mod_time_ns: u64, free_space: u32) -> Response {
    Response::WritePacing(WritePacing {
        status,
        chunk_offset,
        mod_time_ns,
        free_space,
    })
}

fn status_reply(tag: Tag, status: Status, mod_time_ns: u64) -> Response {
    Response::Status(StatusReply {
        tag,
        status,
        mod_time_ns,
    })
}

fn entry(status: Status, index: u32, total: u32, name: &str, node: Option<&Node>) -> Response {
    let (flags, mod_time_ns, file_size) = match node {
        Some(Node::Dir { mod_time_ns }) => (ENTRY_FLAG_DIRECTORY, *mod_time_ns, 0),
        Some(Node::File {
            content,
            mod_time_ns,
        }) => (
            0,
            *mod_time_ns,
            u32::try_from(content.len()).unwrap_or(u32::MAX),
        ),
        None => (0, 0, 0),
    };
    Response::Entry(EntryRecord {
        status,
        index,
        total_items: total,
        flags,
        mod_time_ns,
        file_size,
        name: Bytes::copy_from_slice(name.as_bytes()),
    })
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    format!("/{trimmed}")
}

fn parent(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((head, _)) => head,
    }
}

fn name(path: &str) -> &str { path.rsplit_once('/').map_or(path, |(_, name)| name) }

fn within(path: &str, root: &str) -> bool {
    path == root || path.strip_prefix(root).is_some_and(|rest| rest.starts_with('/'))
}
