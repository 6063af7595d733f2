//! Canonical error types for the crate.
//!
//! Failures are split by how far they reach. [`ProtocolError`] and device
//! status failures end only the current operation. [`LinkError`], timeouts and
//! cancellation end the whole session, which then reports
//! [`FileTransferError::Closed`] until a new link is established.

use std::{fmt, io, str::Utf8Error, string::FromUtf8Error, time::Duration};

use thiserror::Error;

use crate::{
    assembler::FrameKind,
    protocol::{Command, Status, Tag},
};

/// Malformed or unexpected traffic from the device.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A frame started with a tag that is not valid here.
    #[error("unexpected frame tag {found:#04x} while awaiting {expected}")]
    UnexpectedTag { expected: FrameKind, found: u8 },
    /// The first byte is not a known tag for this direction.
    #[error("unknown frame tag {0:#04x}")]
    UnknownTag(u8),
    /// A frame is shorter than its fixed layout.
    #[error("frame of {len} bytes is shorter than the {needed} bytes its layout needs")]
    Truncated {
        tag: Option<Tag>,
        len: usize,
        needed: usize,
    },
    /// A read data frame declared more payload than the receive buffer holds.
    #[error("{kind} frame of {len} bytes exceeds the {limit}-byte receive buffer")]
    FrameTooLarge {
        kind: FrameKind,
        len: usize,
        limit: usize,
    },
    /// The device sent more than the client advertised.
    #[error("device sent {len} bytes but only {credit} were advertised")]
    CreditExceeded { len: u32, credit: u32 },
    /// A read chunk lies outside the declared file length.
    #[error("chunk {offset}+{len} overruns the {total}-byte file")]
    ChunkOutOfBounds { offset: u32, len: u32, total: u32 },
    /// A read chunk does not start where the previous one ended.
    #[error("read chunk at offset {found}, expected {expected}")]
    UnexpectedChunkOffset { expected: u32, found: u32 },
    /// The device changed the declared file length mid-transfer.
    #[error("file length changed from {expected} to {found} mid-transfer")]
    TotalLengthChanged { expected: u32, found: u32 },
    /// The declared file length exceeds the configured read limit.
    #[error("file of {len} bytes exceeds the {limit}-byte read limit")]
    FileTooLarge { len: u32, limit: usize },
    /// The device asked for write content outside the written range.
    #[error("device requested offset {offset} outside {start}..={end}")]
    OffsetOutOfRange { offset: u32, start: u32, end: u32 },
    /// A directory entry index is not below the declared entry count.
    #[error("entry index {index} out of range for {total} entries")]
    EntryOutOfRange { index: u32, total: u32 },
    /// The same directory entry index arrived twice.
    #[error("duplicate directory entry index {index}")]
    DuplicateEntry { index: u32 },
    /// Entry records disagree about the entry count.
    #[error("directory entry count changed from {expected} to {found}")]
    EntryCountChanged { expected: u32, found: u32 },
    /// The final entry arrived before all earlier entries.
    #[error("listing ended with {received} of {expected} entries")]
    TruncatedListing { expected: u32, received: usize },
    /// A directory entry name is not UTF-8.
    #[error("entry name is not valid UTF-8")]
    InvalidName(#[source] FromUtf8Error),
    /// A request path is not UTF-8.
    #[error("request path is not valid UTF-8")]
    InvalidPath(#[source] Utf8Error),
    /// A move command lacks the separator between its paths.
    #[error("move command is missing its path separator")]
    MalformedMove,
}

/// Transport failures. Terminal for the session.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The link reported a disconnect or its event channel closed.
    #[error("link disconnected")]
    Disconnected,
    /// Writing to the link failed.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

/// Requests that cannot be expressed on the wire.
#[derive(Debug, Error)]
pub enum RequestError {
    /// A path does not fit the `u16` length field.
    #[error("path of {len} bytes exceeds the 65535-byte limit")]
    PathTooLong { len: usize },
    /// Content does not fit the `u32` offset and length fields.
    #[error("{len} bytes at offset {offset} exceed the 4 GiB file limit")]
    TooLarge { offset: u32, len: usize },
}

/// Why a session stopped accepting operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The link went away.
    Disconnected,
    /// Writing to the link failed.
    TransportFault,
    /// An operation exceeded the configured timeout.
    TimedOut,
    /// An operation was cancelled or its future dropped mid-exchange.
    Cancelled,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "link disconnected",
            Self::TransportFault => "transport fault",
            Self::TimedOut => "operation timed out",
            Self::Cancelled => "operation cancelled",
        })
    }
}

/// Errors returned by [`Session`](crate::Session) operations.
#[derive(Debug, Error)]
pub enum FileTransferError {
    /// The link failed; the session is closed.
    #[error(transparent)]
    Link(#[from] LinkError),
    /// The device sent malformed traffic; the session stays usable.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// The device refused the command; the session stays usable.
    #[error("{command} failed on device: {status}")]
    Device { command: Command, status: Status },
    /// Another operation is already in flight on this session.
    #[error("another file operation is already in flight")]
    Busy,
    /// The request cannot be encoded. Nothing was sent.
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),
    /// The operation exceeded its timeout; the session is closed.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    /// The operation was cancelled; the session is closed.
    #[error("operation cancelled")]
    Cancelled,
    /// The session was closed by an earlier failure.
    #[error("session closed: {0}")]
    Closed(CloseReason),
}

impl FileTransferError {
    /// Reason this error closes the session, or `None` when the session
    /// remains usable.
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        match self {
            Self::Link(LinkError::Disconnected) => Some(CloseReason::Disconnected),
            Self::Link(LinkError::Io(_)) => Some(CloseReason::TransportFault),
            Self::Timeout(_) => Some(CloseReason::TimedOut),
            Self::Cancelled => Some(CloseReason::Cancelled),
            Self::Closed(reason) => Some(*reason),
            Self::Protocol(_) | Self::Device { .. } | Self::Busy | Self::InvalidRequest(_) => None,
        }
    }

    /// Device status carried by a [`FileTransferError::Device`] error.
    #[must_use]
    pub fn device_status(&self) -> Option<Status> {
        match self {
            Self::Device { status, .. } => Some(*status),
            _ => None,
        }
    }
}
