//! Write: device-advertised flow control.
//!
//! The mirror image of a read. After the write command the device repeatedly
//! reports the offset it expects next and how much free buffer it has; the
//! client answers each report with at most that many bytes. A report with no
//! free space ends the transfer.

use std::time::SystemTime;

use bytes::Bytes;

use super::{Step, Transfer, check_status, unexpected};
use crate::{
    assembler::FrameKind,
    error::{FileTransferError, ProtocolError, RequestError},
    protocol::{Command, Request, Response, WritePacing, from_wire_time},
};

/// Acknowledgement of a completed write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteAck {
    /// File length after the write: the write offset plus the content length.
    pub end_offset: u32,
    /// Modification time recorded by the device, in nanoseconds since the
    /// Unix epoch. Devices may truncate it to their clock resolution.
    pub modified_ns: u64,
}

impl WriteAck {
    /// Modification time recorded by the device.
    #[must_use]
    pub fn modified(&self) -> SystemTime { from_wire_time(self.modified_ns) }
}

#[derive(Debug)]
pub(crate) struct WriteTransfer {
    offset: u32,
    end: u32,
    content: Bytes,
}

impl WriteTransfer {
    /// Prepare a write of `content` at `offset`.
    pub(crate) fn new(offset: u32, content: Bytes) -> Result<Self, RequestError> {
        let end = u32::try_from(content.len())
            .ok()
            .and_then(|len| offset.checked_add(len))
            .ok_or(RequestError::TooLarge {
                offset,
                len: content.len(),
            })?;
        Ok(Self {
            offset,
            end,
            content,
        })
    }

    /// Final file size announced by the write command.
    pub(crate) fn end(&self) -> u32 { self.end }

    fn next_chunk(&self, pacing: &WritePacing) -> Result<Request, ProtocolError> {
        let chunk_offset = pacing.chunk_offset;
        if chunk_offset < self.offset || chunk_offset > self.end {
            return Err(ProtocolError::OffsetOutOfRange {
                offset: chunk_offset,
                start: self.offset,
                end: self.end,
            });
        }
        let len = (self.end - chunk_offset).min(pacing.free_space);
        let start = (chunk_offset - self.offset) as usize;
        Ok(Request::WriteData {
            chunk_offset,
            data: self.content.slice(start..start + len as usize),
        })
    }
}

impl Transfer for WriteTransfer {
    type Output = WriteAck;

    fn command(&self) -> Command { Command::Write }

    fn expects(&self) -> FrameKind { FrameKind::WritePacing }

    fn on_frame(&mut self, frame: Response) -> Result<Step<WriteAck>, FileTransferError> {
        let pacing = match frame {
            Response::WritePacing(pacing) => pacing,
            other => return Err(unexpected(self.expects(), &other)),
        };
        check_status(Command::Write, pacing.status)?;
        tracing::debug!(
            offset = pacing.chunk_offset,
            free = pacing.free_space,
            "write pacing"
        );
        if pacing.free_space == 0 {
            return Ok(Step::Done(WriteAck {
                end_offset: self.end,
                modified_ns: pacing.mod_time_ns,
            }));
        }
        Ok(Step::Reply(self.next_chunk(&pacing)?))
    }
}
