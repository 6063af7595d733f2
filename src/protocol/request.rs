//! Client-to-device frames.
//!
//! [`Request`] covers both the command that opens an exchange and the
//! continuation frames (read pacing, write data) sent while it runs. Encoding
//! validates every length field so an oversized path or payload is refused
//! before anything reaches the transport.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{Status, Tag};
use crate::error::{ProtocolError, RequestError};

/// Header length of a read command, before the path bytes.
pub const READ_COMMAND_HEADER_LEN: usize = 12;
/// Length of a read pacing frame.
pub const READ_PACING_LEN: usize = 12;
/// Header length of a write command, before the path bytes.
pub const WRITE_COMMAND_HEADER_LEN: usize = 20;
/// Header length of a write data frame, before the payload.
pub const WRITE_DATA_HEADER_LEN: usize = 12;
/// Header length of a delete command, before the path bytes.
pub const DELETE_COMMAND_HEADER_LEN: usize = 4;
/// Header length of a mkdir command, before the path bytes.
pub const MKDIR_COMMAND_HEADER_LEN: usize = 16;
/// Header length of a listdir command, before the path bytes.
pub const LISTDIR_COMMAND_HEADER_LEN: usize = 4;
/// Header length of a move command, before the two paths.
pub const MOVE_COMMAND_HEADER_LEN: usize = 6;

/// Separator between the old and new path of a move command.
const MOVE_SEPARATOR: u8 = b' ';

/// A frame sent from the client to the device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// Start reading `path` from offset zero, accepting `max_len` bytes.
    Read { path: String, max_len: u32 },
    /// Acknowledge `offset` bytes and accept up to `max_len` more.
    ReadPacing { offset: u32, max_len: u32 },
    /// Start writing `path` at `offset`; the final file is `total_size` bytes.
    Write {
        path: String,
        offset: u32,
        mod_time_ns: u64,
        total_size: u32,
    },
    /// Content bytes to be stored at `chunk_offset`.
    WriteData { chunk_offset: u32, data: Bytes },
    /// Delete `path`.
    Delete { path: String },
    /// Create the directory `path`.
    Mkdir { path: String, mod_time_ns: u64 },
    /// List the directory `path`.
    ListDir { path: String },
    /// Move `from` to `to`.
    Move { from: String, to: String },
}

impl Request {
    /// Tag written at offset zero.
    #[must_use]
    pub const fn tag(&self) -> Tag {
        match self {
            Self::Read { .. } => Tag::ReadCommand,
            Self::ReadPacing { .. } => Tag::ReadPacing,
            Self::Write { .. } => Tag::WriteCommand,
            Self::WriteData { .. } => Tag::WriteData,
            Self::Delete { .. } => Tag::DeleteCommand,
            Self::Mkdir { .. } => Tag::MkdirCommand,
            Self::ListDir { .. } => Tag::ListDirCommand,
            Self::Move { .. } => Tag::MoveCommand,
        }
    }

    /// Number of bytes [`encode`](Self::encode) will append.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Read { path, .. } => READ_COMMAND_HEADER_LEN + path.len(),
            Self::ReadPacing { .. } => READ_PACING_LEN,
            Self::Write { path, .. } => WRITE_COMMAND_HEADER_LEN + path.len(),
            Self::WriteData { data, .. } => WRITE_DATA_HEADER_LEN + data.len(),
            Self::Delete { path } => DELETE_COMMAND_HEADER_LEN + path.len(),
            Self::Mkdir { path, .. } => MKDIR_COMMAND_HEADER_LEN + path.len(),
            Self::ListDir { path } => LISTDIR_COMMAND_HEADER_LEN + path.len(),
            Self::Move { from, to } => MOVE_COMMAND_HEADER_LEN + from.len() + 1 + to.len(),
        }
    }

    /// Append the little-endian wire form of this frame to `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] when a path does not fit its `u16` length
    /// field or a payload does not fit its `u32` length field.
    ///
    /// # Examples
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use fileframe::protocol::Request;
    ///
    /// let mut buf = BytesMut::new();
    /// Request::Delete { path: "/a".into() }
    ///     .encode(&mut buf)
    ///     .expect("short path encodes");
    /// assert_eq!(&buf[..], &[0x30, 0, 2, 0, b'/', b'a']);
    /// ```
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), RequestError> {
        dst.reserve(self.encoded_len());
        match self {
            Self::Read { path, max_len } => {
                let path_len = path_len(path)?;
                put_head(dst, self.tag(), 0);
                dst.put_u16_le(path_len);
                dst.put_u32_le(0);
                dst.put_u32_le(*max_len);
                dst.put_slice(path.as_bytes());
            }
            Self::ReadPacing { offset, max_len } => {
                put_head(dst, self.tag(), Status::OK);
                dst.put_u16_le(0);
                dst.put_u32_le(*offset);
                dst.put_u32_le(*max_len);
            }
            Self::Write {
                path,
                offset,
                mod_time_ns,
                total_size,
            } => {
                let path_len = path_len(path)?;
                put_head(dst, self.tag(), 0);
                dst.put_u16_le(path_len);
                dst.put_u32_le(*offset);
                dst.put_u64_le(*mod_time_ns);
                dst.put_u32_le(*total_size);
                dst.put_slice(path.as_bytes());
            }
            Self::WriteData { chunk_offset, data } => {
                let len = u32::try_from(data.len()).map_err(|_| RequestError::TooLarge {
                    offset: *chunk_offset,
                    len: data.len(),
                })?;
                put_head(dst, self.tag(), Status::OK);
                dst.put_u16_le(0);
                dst.put_u32_le(*chunk_offset);
                dst.put_u32_le(len);
                dst.put_slice(data);
            }
            Self::Delete { path } | Self::ListDir { path } => {
                let path_len = path_len(path)?;
                put_head(dst, self.tag(), 0);
                dst.put_u16_le(path_len);
                dst.put_slice(path.as_bytes());
            }
            Self::Mkdir { path, mod_time_ns } => {
                let path_len = path_len(path)?;
                put_head(dst, self.tag(), 0);
                dst.put_u16_le(path_len);
                dst.put_u32_le(0);
                dst.put_u64_le(*mod_time_ns);
                dst.put_slice(path.as_bytes());
            }
            Self::Move { from, to } => {
                let from_len = path_len(from)?;
                let to_len = path_len(to)?;
                put_head(dst, self.tag(), 0);
                dst.put_u16_le(from_len);
                dst.put_u16_le(to_len);
                dst.put_slice(from.as_bytes());
                dst.put_u8(MOVE_SEPARATOR);
                dst.put_slice(to.as_bytes());
            }
        }
        Ok(())
    }

    /// Encode into a freshly allocated buffer.
    ///
    /// # Errors
    ///
    /// See [`encode`](Self::encode).
    pub fn to_bytes(&self) -> Result<Bytes, RequestError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Parse one client frame from the front of `src`.
    ///
    /// This is the device half of the codec. It returns `Ok(None)` until `src`
    /// holds the whole frame, then the request together with the number of
    /// bytes it occupied.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] for reply or unknown tags, paths that are
    /// not UTF-8, and move commands without the separator byte.
    ///
    /// # Examples
    ///
    /// ```
    /// use fileframe::protocol::Request;
    ///
    /// let bytes = [0x30, 0, 2, 0, b'/', b'a', 0xff];
    /// assert_eq!(Request::parse(&bytes[..5]).expect("valid prefix"), None);
    /// let (request, used) = Request::parse(&bytes).expect("valid").expect("complete");
    /// assert_eq!(request, Request::Delete { path: "/a".into() });
    /// assert_eq!(used, 6);
    /// ```
    pub fn parse(src: &[u8]) -> Result<Option<(Self, usize)>, ProtocolError> {
        let Some(&raw) = src.first() else {
            return Ok(None);
        };
        let tag = Tag::from_u8(raw).ok_or(ProtocolError::UnknownTag(raw))?;
        let header_len = match tag {
            Tag::ReadCommand => READ_COMMAND_HEADER_LEN,
            Tag::ReadPacing => READ_PACING_LEN,
            Tag::WriteCommand => WRITE_COMMAND_HEADER_LEN,
            Tag::WriteData => WRITE_DATA_HEADER_LEN,
            Tag::DeleteCommand => DELETE_COMMAND_HEADER_LEN,
            Tag::MkdirCommand => MKDIR_COMMAND_HEADER_LEN,
            Tag::ListDirCommand => LISTDIR_COMMAND_HEADER_LEN,
            Tag::MoveCommand => MOVE_COMMAND_HEADER_LEN,
            _ => return Err(ProtocolError::UnknownTag(raw)),
        };
        if src.len() < header_len {
            return Ok(None);
        }
        let tail_len = match tag {
            Tag::ReadPacing => 0,
            Tag::WriteData => u32_at(src, 8) as usize,
            Tag::MoveCommand => usize::from(u16_at(src, 2)) + 1 + usize::from(u16_at(src, 4)),
            _ => usize::from(u16_at(src, 2)),
        };
        let frame_len = header_len + tail_len;
        if src.len() < frame_len {
            return Ok(None);
        }
        let tail = &src[header_len..frame_len];
        let request = match tag {
            Tag::ReadCommand => Self::Read {
                path: utf8(tail)?,
                max_len: u32_at(src, 8),
            },
            Tag::ReadPacing => Self::ReadPacing {
                offset: u32_at(src, 4),
                max_len: u32_at(src, 8),
            },
            Tag::WriteCommand => Self::Write {
                path: utf8(tail)?,
                offset: u32_at(src, 4),
                mod_time_ns: (&src[8..16]).get_u64_le(),
                total_size: u32_at(src, 16),
            },
            Tag::WriteData => Self::WriteData {
                chunk_offset: u32_at(src, 4),
                data: Bytes::copy_from_slice(tail),
            },
            Tag::DeleteCommand => Self::Delete { path: utf8(tail)? },
            Tag::MkdirCommand => Self::Mkdir {
                path: utf8(tail)?,
                mod_time_ns: (&src[8..16]).get_u64_le(),
            },
            Tag::ListDirCommand => Self::ListDir { path: utf8(tail)? },
            _ => {
                let (from, rest) = tail.split_at(usize::from(u16_at(src, 2)));
                let Some((&MOVE_SEPARATOR, to)) = rest.split_first() else {
                    return Err(ProtocolError::MalformedMove);
                };
                Self::Move {
                    from: utf8(from)?,
                    to: utf8(to)?,
                }
            }
        };
        Ok(Some((request, frame_len)))
    }
}

fn u16_at(src: &[u8], at: usize) -> u16 { (&src[at..at + 2]).get_u16_le() }

fn u32_at(src: &[u8], at: usize) -> u32 { (&src[at..at + 4]).get_u32_le() }

fn utf8(bytes: &[u8]) -> Result<String, ProtocolError> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(ProtocolError::InvalidPath)
}

fn put_head(dst: &mut BytesMut, tag: Tag, second: u8) {
    dst.put_u8(tag.as_u8());
    dst.put_u8(second);
}

fn path_len(path: &str) -> Result<u16, RequestError> {
    u16::try_from(path.len()).map_err(|_| RequestError::PathTooLong { len: path.len() })
}

#[cfg(test)]
mod tests {
    use bytes::{Buf, Bytes};
    use rstest::rstest;

    use super::*;

    fn encode(request: &Request) -> Bytes { request.to_bytes().expect("request encodes") }

    #[test]
    fn read_command_layout() {
        let bytes = encode(&Request::Read {
            path: "/boot_out.txt".into(),
            max_len: 1008,
        });
        let mut buf = &bytes[..];
        assert_eq!(buf.get_u8(), 0x10);
        assert_eq!(buf.get_u8(), 0);
        assert_eq!(buf.get_u16_le(), 13);
        assert_eq!(buf.get_u32_le(), 0);
        assert_eq!(buf.get_u32_le(), 1008);
        assert_eq!(buf, b"/boot_out.txt");
    }

    #[test]
    fn read_pacing_layout() {
        let bytes = encode(&Request::ReadPacing {
            offset: 0x0102_0304,
            max_len: 16,
        });
        assert_eq!(
            &bytes[..],
            &[0x12, 0x01, 0, 0, 0x04, 0x03, 0x02, 0x01, 16, 0, 0, 0]
        );
    }

    #[test]
    fn write_command_layout() {
        let bytes = encode(&Request::Write {
            path: "/code.py".into(),
            offset: 4,
            mod_time_ns: 0x1122_3344_5566_7788,
            total_size: 12,
        });
        let mut buf = &bytes[..];
        assert_eq!(buf.get_u8(), 0x20);
        buf.advance(1);
        assert_eq!(buf.get_u16_le(), 8);
        assert_eq!(buf.get_u32_le(), 4);
        assert_eq!(buf.get_u64_le(), 0x1122_3344_5566_7788);
        assert_eq!(buf.get_u32_le(), 12);
        assert_eq!(buf, b"/code.py");
    }

    #[test]
    fn write_data_layout() {
        let bytes = encode(&Request::WriteData {
            chunk_offset: 4,
            data: Bytes::from_static(b"t(1)"),
        });
        assert_eq!(
            &bytes[..],
            &[0x22, 0x01, 0, 0, 4, 0, 0, 0, 4, 0, 0, 0, b't', b'(', b'1', b')']
        );
    }

    #[test]
    fn mkdir_command_layout() {
        let bytes = encode(&Request::Mkdir {
            path: "/lib".into(),
            mod_time_ns: 7,
        });
        assert_eq!(bytes.len(), MKDIR_COMMAND_HEADER_LEN + 4);
        let mut buf = &bytes[..];
        assert_eq!(buf.get_u8(), 0x40);
        buf.advance(1);
        assert_eq!(buf.get_u16_le(), 4);
        assert_eq!(buf.get_u32_le(), 0);
        assert_eq!(buf.get_u64_le(), 7);
        assert_eq!(buf, b"/lib");
    }

    #[test]
    fn move_command_separates_paths_with_space() {
        let bytes = encode(&Request::Move {
            from: "/a.py".into(),
            to: "/b.py".into(),
        });
        let mut buf = &bytes[..];
        assert_eq!(buf.get_u8(), 0x60);
        buf.advance(1);
        assert_eq!(buf.get_u16_le(), 5);
        assert_eq!(buf.get_u16_le(), 5);
        assert_eq!(buf, b"/a.py /b.py");
    }

    #[rstest]
    #[case::delete(Request::Delete { path: "/x".into() }, 0x30)]
    #[case::listdir(Request::ListDir { path: "/x".into() }, 0x50)]
    fn path_only_commands(#[case] request: Request, #[case] tag: u8) {
        assert_eq!(&encode(&request)[..], &[tag, 0, 2, 0, b'/', b'x']);
    }

    #[test]
    fn oversized_path_is_rejected() {
        let path = "a".repeat(usize::from(u16::MAX) + 1);
        let err = Request::ListDir { path }
            .to_bytes()
            .expect_err("path exceeds u16");
        assert!(matches!(err, RequestError::PathTooLong { len } if len == 65_536));
    }

    #[rstest]
    #[case::read(Request::Read { path: "/a.txt".into(), max_len: 1008 })]
    #[case::pacing(Request::ReadPacing { offset: 1008, max_len: 92 })]
    #[case::write(Request::Write { path: "/a".into(), offset: 0, mod_time_ns: 5, total_size: 3 })]
    #[case::data(Request::WriteData { chunk_offset: 1, data: Bytes::from_static(b"xyz") })]
    #[case::mkdir(Request::Mkdir { path: "/d".into(), mod_time_ns: 9 })]
    #[case::rename(Request::Move { from: "/a b".into(), to: "/c".into() })]
    fn device_side_parse_recovers_requests(#[case] request: Request) {
        let bytes = encode(&request);
        assert_eq!(Request::parse(&bytes[..bytes.len() - 1]).expect("prefix"), None);
        let (parsed, used) = Request::parse(&bytes).expect("valid").expect("complete");
        assert_eq!(parsed, request);
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn move_without_separator_is_malformed() {
        let bytes = [0x60, 0, 1, 0, 1, 0, b'a', b'-', b'b'];
        let err = Request::parse(&bytes).expect_err("missing separator");
        assert!(matches!(err, ProtocolError::MalformedMove));
    }

    #[test]
    fn encoded_len_matches_output() {
        let request = Request::Move {
            from: "/lib/old".into(),
            to: "/lib/new".into(),
        };
        assert_eq!(encode(&request).len(), request.encoded_len());
    }
}
