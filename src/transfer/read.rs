//! Read: client-advertised flow control.
//!
//! The client owns a fixed receive buffer, so it decides how much the device
//! may send in each round. The read command grants the first window and every
//! pacing frame acknowledges the bytes received so far and grants the next.

use bytes::{Bytes, BytesMut};

use super::{Step, Transfer, check_status, unexpected};
use crate::{
    assembler::FrameKind,
    error::{FileTransferError, ProtocolError},
    protocol::{Command, ReadData, Request, Response},
};

#[derive(Debug)]
pub(crate) struct ReadTransfer {
    /// Largest window the receive buffer allows.
    window: u32,
    /// Window granted by the last frame we sent.
    granted: u32,
    max_len: usize,
    content: Option<BytesMut>,
    received: u32,
}

impl ReadTransfer {
    pub(crate) fn new(window: u32, max_len: usize) -> Self {
        Self {
            window,
            granted: window,
            max_len,
            content: None,
            received: 0,
        }
    }

    /// Window granted by the opening command.
    pub(crate) fn initial_window(&self) -> u32 { self.window }

    fn store(&mut self, data: &ReadData) -> Result<u32, ProtocolError> {
        let len = data.chunk_len();
        if len > self.granted {
            return Err(ProtocolError::CreditExceeded {
                len,
                credit: self.granted,
            });
        }
        let total = data.total_length;
        if let Some(content) = &self.content {
            let expected = u32::try_from(content.len()).unwrap_or(u32::MAX);
            if expected != total {
                return Err(ProtocolError::TotalLengthChanged {
                    expected,
                    found: total,
                });
            }
        } else if total as usize > self.max_len {
            return Err(ProtocolError::FileTooLarge {
                len: total,
                limit: self.max_len,
            });
        }
        if data.chunk_offset != self.received {
            return Err(ProtocolError::UnexpectedChunkOffset {
                expected: self.received,
                found: data.chunk_offset,
            });
        }
        let content = self
            .content
            .get_or_insert_with(|| BytesMut::zeroed(total as usize));
        let end = data
            .chunk_offset
            .checked_add(len)
            .filter(|end| *end <= total)
            .ok_or(ProtocolError::ChunkOutOfBounds {
                offset: data.chunk_offset,
                len,
                total,
            })?;
        content[data.chunk_offset as usize..end as usize].copy_from_slice(&data.data);
        self.received = self.received.saturating_add(len);
        Ok(total.saturating_sub(self.received))
    }
}

impl Transfer for ReadTransfer {
    type Output = Bytes;

    fn command(&self) -> Command { Command::Read }

    fn expects(&self) -> FrameKind { FrameKind::ReadData }

    fn on_frame(&mut self, frame: Response) -> Result<Step<Bytes>, FileTransferError> {
        let data = match frame {
            Response::ReadData(data) => data,
            other => return Err(unexpected(self.expects(), &other)),
        };
        check_status(Command::Read, data.status)?;
        let remaining = self.store(&data)?;
        tracing::debug!(
            offset = data.chunk_offset,
            len = data.data.len(),
            total = data.total_length,
            remaining,
            "read chunk"
        );
        if remaining == 0 {
            let content = self.content.take().unwrap_or_default();
            return Ok(Step::Done(content.freeze()));
        }
        self.granted = self.window.min(remaining);
        Ok(Step::Reply(Request::ReadPacing {
            offset: self.received,
            max_len: self.granted,
        }))
    }
}
