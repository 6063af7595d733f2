//! Reassembly of transport fragments into protocol frames.
//!
//! The transport delivers bytes in pieces that bear no relation to frame
//! boundaries: one fragment may hold a single byte, the tail of one frame and
//! the head of the next, or several directory entry records. [`FrameAssembler`]
//! buffers everything it is given and, for the [`FrameKind`] the session is
//! waiting on, reports whether a whole frame is available yet.

use std::fmt;

use bytes::BytesMut;

use crate::{
    error::ProtocolError,
    protocol::{
        Tag,
        response::{
            EntryRecord,
            MKDIR_STATUS_LEN,
            ReadData,
            Response,
            STATUS_LEN,
            WRITE_PACING_LEN,
            header_len,
        },
    },
};

/// Reply layout the session is currently waiting for.
///
/// Each variant carries its own completeness predicate through
/// [`FrameKind::frame_len`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// A read data frame: fixed header plus the declared chunk.
    ReadData,
    /// A fixed-size write pacing frame.
    WritePacing,
    /// One directory entry record: fixed header plus the declared name.
    ListDirEntry,
    /// A fixed-size delete status frame.
    DeleteStatus,
    /// A fixed-size mkdir status frame.
    MkdirStatus,
    /// A fixed-size move status frame.
    MoveStatus,
}

impl FrameKind {
    /// Tag every frame of this kind starts with.
    #[must_use]
    pub const fn tag(self) -> Tag {
        match self {
            Self::ReadData => Tag::ReadData,
            Self::WritePacing => Tag::WritePacing,
            Self::ListDirEntry => Tag::ListDirEntry,
            Self::DeleteStatus => Tag::DeleteStatus,
            Self::MkdirStatus => Tag::MkdirStatus,
            Self::MoveStatus => Tag::MoveStatus,
        }
    }

    /// Length of the fixed header.
    #[must_use]
    pub const fn header_len(self) -> usize { header_len(self.tag()) }

    /// Total length of the frame at the front of `buffered`, or `None` while
    /// its header is still incomplete.
    #[must_use]
    pub fn frame_len(self, buffered: &[u8]) -> Option<usize> {
        match self {
            Self::ReadData => ReadData::frame_len(buffered),
            Self::ListDirEntry => EntryRecord::frame_len(buffered),
            Self::WritePacing => (buffered.len() >= WRITE_PACING_LEN).then_some(WRITE_PACING_LEN),
            Self::MkdirStatus => (buffered.len() >= MKDIR_STATUS_LEN).then_some(MKDIR_STATUS_LEN),
            Self::DeleteStatus | Self::MoveStatus => {
                (buffered.len() >= STATUS_LEN).then_some(STATUS_LEN)
            }
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Display::fmt(&self.tag(), f) }
}

/// Growing receive buffer with per-kind frame extraction.
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: BytesMut,
    max_frame_len: usize,
}

impl FrameAssembler {
    /// Create an assembler that rejects read data frames longer than
    /// `max_frame_len`.
    ///
    /// The limit mirrors the client's advertised receive buffer: a device
    /// honouring its credit never declares a longer read frame. Other replies
    /// carry no credit and are bounded only by their own layout.
    #[must_use]
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_frame_len),
            max_frame_len,
        }
    }

    /// Append a fragment at the end of the buffer.
    pub fn push(&mut self, fragment: &[u8]) { self.buffer.extend_from_slice(fragment); }

    /// Split the next complete frame of `kind` off the front of the buffer.
    ///
    /// Returns `Ok(None)` while more data is needed; the buffered bytes are
    /// left untouched so the next fragment can complete the frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnexpectedTag`] when the buffered frame is not
    /// of `kind`, and [`ProtocolError::FrameTooLarge`] when a read data frame
    /// declares more than the receive buffer.
    ///
    /// # Examples
    ///
    /// ```
    /// use fileframe::{FrameAssembler, FrameKind, protocol::Response};
    ///
    /// let mut assembler = FrameAssembler::new(64);
    /// assembler.push(&[0x31]);
    /// assert!(assembler.next_frame(FrameKind::DeleteStatus).expect("valid").is_none());
    /// assembler.push(&[0x01]);
    /// let frame = assembler.next_frame(FrameKind::DeleteStatus).expect("valid");
    /// assert!(matches!(frame, Some(Response::Status(_))));
    /// assert!(assembler.is_empty());
    /// ```
    pub fn next_frame(&mut self, kind: FrameKind) -> Result<Option<Response>, ProtocolError> {
        let Some(&found) = self.buffer.first() else {
            return Ok(None);
        };
        if found != kind.tag().as_u8() {
            return Err(ProtocolError::UnexpectedTag {
                expected: kind,
                found,
            });
        }
        let Some(len) = kind.frame_len(&self.buffer) else {
            return Ok(None);
        };
        if kind == FrameKind::ReadData && len > self.max_frame_len {
            return Err(ProtocolError::FrameTooLarge {
                kind,
                len,
                limit: self.max_frame_len,
            });
        }
        if self.buffer.len() < len {
            return Ok(None);
        }
        let frame = self.buffer.split_to(len).freeze();
        tracing::trace!(%kind, len, buffered = self.buffer.len(), "frame assembled");
        Response::decode(frame).map(Some)
    }

    /// Number of buffered bytes not yet handed out as frames.
    #[must_use]
    pub fn len(&self) -> usize { self.buffer.len() }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.buffer.is_empty() }

    /// Drop all buffered bytes, returning how many were discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.buffer.len();
        self.buffer.clear();
        discarded
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};
    use rstest::{fixture, rstest};

    use super::*;
    use crate::protocol::{EntryRecord, ReadData, Status};

    #[fixture]
    fn assembler() -> FrameAssembler { FrameAssembler::new(1024) }

    fn entry(index: u32, total: u32, name: &'static [u8]) -> Bytes {
        Response::Entry(EntryRecord {
            status: Status::Ok,
            index,
            total_items: total,
            flags: 0,
            mod_time_ns: 0,
            file_size: 10,
            name: Bytes::from_static(name),
        })
        .to_bytes()
    }

    fn read_data(chunk: &'static [u8]) -> Bytes {
        Response::ReadData(ReadData {
            status: Status::Ok,
            chunk_offset: 0,
            total_length: 100,
            data: Bytes::from_static(chunk),
        })
        .to_bytes()
    }

    #[rstest]
    fn empty_buffer_needs_more(mut assembler: FrameAssembler) {
        assert!(assembler.next_frame(FrameKind::ReadData).expect("valid").is_none());
    }

    #[rstest]
    fn partial_header_is_kept(mut assembler: FrameAssembler) {
        let frame = read_data(b"hello");
        assembler.push(&frame[..10]);
        assert!(assembler.next_frame(FrameKind::ReadData).expect("valid").is_none());
        assert_eq!(assembler.len(), 10);
        assembler.push(&frame[10..]);
        let Some(Response::ReadData(data)) =
            assembler.next_frame(FrameKind::ReadData).expect("valid")
        else {
            panic!("expected read data");
        };
        assert_eq!(&data.data[..], b"hello");
        assert!(assembler.is_empty());
    }

    #[rstest]
    fn partial_payload_is_kept(mut assembler: FrameAssembler) {
        let frame = read_data(b"hello");
        assembler.push(&frame[..18]);
        assert!(assembler.next_frame(FrameKind::ReadData).expect("valid").is_none());
        assembler.push(&frame[18..]);
        assert!(assembler.next_frame(FrameKind::ReadData).expect("valid").is_some());
    }

    #[rstest]
    fn concatenated_records_are_split(mut assembler: FrameAssembler) {
        let mut bytes = BytesMut::new();
        bytes.extend_from_slice(&entry(0, 2, b"boot_out.txt"));
        bytes.extend_from_slice(&entry(1, 2, b"code.py"));
        assembler.push(&bytes[..bytes.len() - 3]);

        let first = assembler.next_frame(FrameKind::ListDirEntry).expect("valid");
        assert!(matches!(first, Some(Response::Entry(ref e)) if e.index == 0));
        assert!(assembler.next_frame(FrameKind::ListDirEntry).expect("valid").is_none());

        assembler.push(&bytes[bytes.len() - 3..]);
        let second = assembler.next_frame(FrameKind::ListDirEntry).expect("valid");
        assert!(matches!(second, Some(Response::Entry(ref e)) if &e.name[..] == b"code.py"));
    }

    #[rstest]
    fn wrong_tag_is_a_protocol_error(mut assembler: FrameAssembler) {
        assembler.push(&[0x31, 0x01]);
        let err = assembler
            .next_frame(FrameKind::ListDirEntry)
            .expect_err("delete status is not an entry");
        assert!(matches!(
            err,
            ProtocolError::UnexpectedTag {
                expected: FrameKind::ListDirEntry,
                found: 0x31
            }
        ));
    }

    #[test]
    fn oversized_declaration_is_rejected_before_buffering() {
        let mut assembler = FrameAssembler::new(32);
        let frame = read_data(b"this chunk is longer than sixteen bytes");
        assembler.push(&frame[..16]);
        let err = assembler
            .next_frame(FrameKind::ReadData)
            .expect_err("declared chunk exceeds buffer");
        assert!(matches!(err, ProtocolError::FrameTooLarge { limit: 32, .. }));
    }

    #[test]
    fn entry_records_ignore_the_read_buffer_limit() {
        let mut assembler = FrameAssembler::new(32);
        assembler.push(&entry(0, 1, b"a_rather_long_module_name_for_a_board.mpy"));
        let frame = assembler.next_frame(FrameKind::ListDirEntry).expect("valid");
        assert!(matches!(frame, Some(Response::Entry(ref e)) if e.name.len() == 41));
        assert!(assembler.is_empty());
    }

    #[rstest]
    #[case(FrameKind::WritePacing, 19, 20)]
    #[case(FrameKind::MkdirStatus, 15, 16)]
    #[case(FrameKind::MoveStatus, 1, 2)]
    fn fixed_frames_complete_at_header_len(
        #[case] kind: FrameKind,
        #[case] short: usize,
        #[case] full: usize,
    ) {
        let mut buffered = vec![0_u8; full];
        buffered[0] = kind.tag().as_u8();
        assert_eq!(kind.frame_len(&buffered[..short]), None);
        assert_eq!(kind.frame_len(&buffered), Some(full));
        assert_eq!(kind.header_len(), full);
    }

    #[rstest]
    fn clear_reports_discarded_bytes(mut assembler: FrameAssembler) {
        assembler.push(b"\x11\x01\x00");
        assert_eq!(assembler.clear(), 3);
        assert!(assembler.is_empty());
    }
}
