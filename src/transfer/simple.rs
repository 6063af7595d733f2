//! Single-reply commands: delete, mkdir and move.

use super::{Step, Transfer, check_status, unexpected};
use crate::{
    assembler::FrameKind,
    error::FileTransferError,
    protocol::{Command, Response},
};

/// Waits for the one status frame a delete, mkdir or move produces.
#[derive(Debug)]
pub(crate) struct StatusTransfer {
    command: Command,
    kind: FrameKind,
}

impl StatusTransfer {
    pub(crate) fn delete() -> Self { Self::new(Command::Delete, FrameKind::DeleteStatus) }

    pub(crate) fn make_dir() -> Self { Self::new(Command::Mkdir, FrameKind::MkdirStatus) }

    pub(crate) fn move_path() -> Self { Self::new(Command::Move, FrameKind::MoveStatus) }

    fn new(command: Command, kind: FrameKind) -> Self { Self { command, kind } }
}

impl Transfer for StatusTransfer {
    type Output = ();

    fn command(&self) -> Command { self.command }

    fn expects(&self) -> FrameKind { self.kind }

    fn on_frame(&mut self, frame: Response) -> Result<Step<()>, FileTransferError> {
        let reply = match frame {
            Response::Status(reply) if reply.tag == self.kind.tag() => reply,
            other => return Err(unexpected(self.kind, &other)),
        };
        check_status(self.command, reply.status)?;
        Ok(Step::Done(()))
    }
}
