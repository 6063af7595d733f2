//! Device-to-client frames.
//!
//! Each reply layout has a fixed header; read data and directory entries carry
//! a variable tail whose length is declared in the header. The `frame_len`
//! helpers read that declaration so the assembler can tell a complete frame
//! from a partial one without decoding it.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{Status, Tag};
use crate::error::ProtocolError;

/// Header length of a read data frame, before the chunk bytes.
pub const READ_DATA_HEADER_LEN: usize = 16;
/// Length of a write pacing frame.
pub const WRITE_PACING_LEN: usize = 20;
/// Header length of one directory entry record, before the name bytes.
pub const LISTDIR_ENTRY_HEADER_LEN: usize = 28;
/// Length of a mkdir status frame.
pub const MKDIR_STATUS_LEN: usize = 16;
/// Length of a delete or move status frame.
pub const STATUS_LEN: usize = 2;

/// Directory flag bit in an entry record.
pub const ENTRY_FLAG_DIRECTORY: u32 = 0x01;

/// A chunk of file content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadData {
    pub status: Status,
    pub chunk_offset: u32,
    pub total_length: u32,
    pub data: Bytes,
}

impl ReadData {
    /// Total frame length declared by a buffered header, or `None` if the
    /// header itself is incomplete.
    #[must_use]
    pub fn frame_len(header: &[u8]) -> Option<usize> {
        let mut field = header.get(12..READ_DATA_HEADER_LEN)?;
        Some(READ_DATA_HEADER_LEN + field.get_u32_le() as usize)
    }

    fn decode(mut src: Bytes) -> Self {
        src.advance(1);
        let status = Status::from_u8(src.get_u8());
        src.advance(2);
        let chunk_offset = src.get_u32_le();
        let total_length = src.get_u32_le();
        let len = src.get_u32_le() as usize;
        Self {
            status,
            chunk_offset,
            total_length,
            data: src.split_to(len),
        }
    }

    /// Chunk length as carried on the wire.
    #[must_use]
    pub fn chunk_len(&self) -> u32 { u32::try_from(self.data.len()).unwrap_or(u32::MAX) }
}

/// Credit advertisement from the device during a write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WritePacing {
    pub status: Status,
    pub chunk_offset: u32,
    pub mod_time_ns: u64,
    pub free_space: u32,
}

impl WritePacing {
    fn decode(mut src: Bytes) -> Self {
        src.advance(1);
        let status = Status::from_u8(src.get_u8());
        src.advance(2);
        Self {
            status,
            chunk_offset: src.get_u32_le(),
            mod_time_ns: src.get_u64_le(),
            free_space: src.get_u32_le(),
        }
    }
}

/// One directory entry record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryRecord {
    pub status: Status,
    pub index: u32,
    pub total_items: u32,
    pub flags: u32,
    pub mod_time_ns: u64,
    pub file_size: u32,
    pub name: Bytes,
}

impl EntryRecord {
    /// Record length declared by a buffered header, or `None` if the header
    /// itself is incomplete.
    #[must_use]
    pub fn frame_len(header: &[u8]) -> Option<usize> {
        if header.len() < LISTDIR_ENTRY_HEADER_LEN {
            return None;
        }
        let mut field = header.get(2..4)?;
        Some(LISTDIR_ENTRY_HEADER_LEN + usize::from(field.get_u16_le()))
    }

    /// Whether the record names a directory.
    #[must_use]
    pub const fn is_dir(&self) -> bool { self.flags & ENTRY_FLAG_DIRECTORY != 0 }

    fn decode(mut src: Bytes) -> Self {
        src.advance(1);
        let status = Status::from_u8(src.get_u8());
        let name_len = usize::from(src.get_u16_le());
        let index = src.get_u32_le();
        let total_items = src.get_u32_le();
        let flags = src.get_u32_le();
        let mod_time_ns = src.get_u64_le();
        let file_size = src.get_u32_le();
        Self {
            status,
            index,
            total_items,
            flags,
            mod_time_ns,
            file_size,
            name: src.split_to(name_len),
        }
    }
}

/// Outcome of a delete, mkdir or move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusReply {
    pub tag: Tag,
    pub status: Status,
    /// Modification time echoed by mkdir; zero for the other commands.
    pub mod_time_ns: u64,
}

impl StatusReply {
    fn decode(mut src: Bytes, tag: Tag) -> Self {
        src.advance(1);
        let status = Status::from_u8(src.get_u8());
        let mod_time_ns = if tag == Tag::MkdirStatus {
            src.advance(6);
            src.get_u64_le()
        } else {
            0
        };
        Self {
            tag,
            status,
            mod_time_ns,
        }
    }
}

/// A complete frame received from the device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    ReadData(ReadData),
    WritePacing(WritePacing),
    Entry(EntryRecord),
    Status(StatusReply),
}

impl Response {
    /// Wire tag of this frame.
    #[must_use]
    pub const fn tag(&self) -> Tag {
        match self {
            Self::ReadData(_) => Tag::ReadData,
            Self::WritePacing(_) => Tag::WritePacing,
            Self::Entry(_) => Tag::ListDirEntry,
            Self::Status(reply) => reply.tag,
        }
    }

    /// Decode one complete frame.
    ///
    /// `frame` must hold exactly the bytes of a single frame; the assembler
    /// guarantees this before calling.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownTag`] for a tag that is not a reply and
    /// [`ProtocolError::Truncated`] if `frame` is shorter than its layout.
    pub fn decode(frame: Bytes) -> Result<Self, ProtocolError> {
        let Some(&raw) = frame.first() else {
            return Err(ProtocolError::Truncated {
                tag: None,
                len: 0,
                needed: 1,
            });
        };
        let tag = Tag::from_u8(raw).ok_or(ProtocolError::UnknownTag(raw))?;
        let needed = match tag {
            Tag::ReadData => ReadData::frame_len(&frame),
            Tag::WritePacing => Some(WRITE_PACING_LEN),
            Tag::ListDirEntry => EntryRecord::frame_len(&frame),
            Tag::MkdirStatus => Some(MKDIR_STATUS_LEN),
            Tag::DeleteStatus | Tag::MoveStatus => Some(STATUS_LEN),
            _ => return Err(ProtocolError::UnknownTag(raw)),
        };
        let needed = needed.unwrap_or(header_len(tag));
        if frame.len() < needed {
            return Err(ProtocolError::Truncated {
                tag: Some(tag),
                len: frame.len(),
                needed,
            });
        }
        Ok(match tag {
            Tag::ReadData => Self::ReadData(ReadData::decode(frame)),
            Tag::WritePacing => Self::WritePacing(WritePacing::decode(frame)),
            Tag::ListDirEntry => Self::Entry(EntryRecord::decode(frame)),
            _ => Self::Status(StatusReply::decode(frame, tag)),
        })
    }

    /// Append the wire form of this frame to `dst`.
    ///
    /// Clients never send replies; this exists so simulated devices and
    /// tests can produce byte-exact device traffic.
    ///
    /// # Examples
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use fileframe::protocol::{Response, Status, StatusReply, Tag};
    ///
    /// let reply = Response::Status(StatusReply {
    ///     tag: Tag::DeleteStatus,
    ///     status: Status::Ok,
    ///     mod_time_ns: 0,
    /// });
    /// let mut buf = BytesMut::new();
    /// reply.encode(&mut buf);
    /// assert_eq!(&buf[..], &[0x31, 0x01]);
    /// ```
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.tag().as_u8());
        match self {
            Self::ReadData(data) => {
                dst.put_u8(data.status.as_u8());
                dst.put_u16_le(0);
                dst.put_u32_le(data.chunk_offset);
                dst.put_u32_le(data.total_length);
                dst.put_u32_le(data.chunk_len());
                dst.put_slice(&data.data);
            }
            Self::WritePacing(pacing) => {
                dst.put_u8(pacing.status.as_u8());
                dst.put_u16_le(0);
                dst.put_u32_le(pacing.chunk_offset);
                dst.put_u64_le(pacing.mod_time_ns);
                dst.put_u32_le(pacing.free_space);
            }
            Self::Entry(entry) => {
                dst.put_u8(entry.status.as_u8());
                dst.put_u16_le(u16::try_from(entry.name.len()).unwrap_or(u16::MAX));
                dst.put_u32_le(entry.index);
                dst.put_u32_le(entry.total_items);
                dst.put_u32_le(entry.flags);
                dst.put_u64_le(entry.mod_time_ns);
                dst.put_u32_le(entry.file_size);
                dst.put_slice(&entry.name[..entry.name.len().min(usize::from(u16::MAX))]);
            }
            Self::Status(reply) => {
                dst.put_u8(reply.status.as_u8());
                if reply.tag == Tag::MkdirStatus {
                    dst.put_bytes(0, 6);
                    dst.put_u64_le(reply.mod_time_ns);
                }
            }
        }
    }

    /// Encode into a freshly allocated buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Fixed header length of a reply tag.
#[must_use]
pub const fn header_len(tag: Tag) -> usize {
    match tag {
        Tag::ReadData => READ_DATA_HEADER_LEN,
        Tag::WritePacing => WRITE_PACING_LEN,
        Tag::ListDirEntry => LISTDIR_ENTRY_HEADER_LEN,
        Tag::MkdirStatus => MKDIR_STATUS_LEN,
        _ => STATUS_LEN,
    }
}
