//! Per-command state machines.
//!
//! A [`Transfer`] holds the accumulator of one in-flight command and reacts to
//! each complete reply frame by choosing the next [`Step`]. Transfers never
//! touch the transport: the session sends the replies they ask for and feeds
//! them the frames the assembler produces, which keeps every flow-control
//! decision testable with plain values.

mod list_dir;
mod read;
mod simple;
mod write;

pub use list_dir::DirEntry;
pub(crate) use list_dir::ListDirTransfer;
pub(crate) use read::ReadTransfer;
pub(crate) use simple::StatusTransfer;
pub use write::WriteAck;
pub(crate) use write::WriteTransfer;

use crate::{
    assembler::FrameKind,
    error::{FileTransferError, ProtocolError},
    protocol::{Command, Request, Response, Status},
};

/// What the session does after a transfer handled a frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Step<T> {
    /// Send a continuation frame, then wait for the next reply.
    Reply(Request),
    /// Wait for the next reply without sending anything.
    Await,
    /// The command finished.
    Done(T),
}

/// State machine for one command.
pub(crate) trait Transfer: Send {
    /// Value the command resolves with.
    type Output: Send;

    /// Command this transfer runs.
    fn command(&self) -> Command;

    /// Reply layout the transfer is waiting for.
    fn expects(&self) -> FrameKind;

    /// Handle one complete reply frame.
    fn on_frame(&mut self, frame: Response) -> Result<Step<Self::Output>, FileTransferError>;
}

/// Fail with the device's status unless it is OK.
fn check_status(command: Command, status: Status) -> Result<(), FileTransferError> {
    if status.is_ok() {
        Ok(())
    } else {
        Err(FileTransferError::Device { command, status })
    }
}

fn unexpected(expected: FrameKind, frame: &Response) -> FileTransferError {
    ProtocolError::UnexpectedTag {
        expected,
        found: frame.tag().as_u8(),
    }
    .into()
}
