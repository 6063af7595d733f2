//! Frame tags and the commands they belong to.
//!
//! Every frame on the wire starts with a one-byte tag naming its layout. The
//! high nibble groups the tags of one command; the low nibble orders the
//! exchange (command first, then replies and continuations).

use std::fmt;

/// One-byte discriminator at offset zero of every frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    /// Client asks to read a file.
    ReadCommand = 0x10,
    /// Device returns a chunk of file content.
    ReadData = 0x11,
    /// Client grants the device credit for the next chunk.
    ReadPacing = 0x12,
    /// Client announces a write.
    WriteCommand = 0x20,
    /// Device grants the client credit for the next chunk.
    WritePacing = 0x21,
    /// Client sends a chunk of file content.
    WriteData = 0x22,
    /// Client asks to delete a file or empty directory.
    DeleteCommand = 0x30,
    /// Device reports the outcome of a delete.
    DeleteStatus = 0x31,
    /// Client asks to create a directory.
    MkdirCommand = 0x40,
    /// Device reports the outcome of a mkdir.
    MkdirStatus = 0x41,
    /// Client asks for the contents of a directory.
    ListDirCommand = 0x50,
    /// Device returns one directory entry record.
    ListDirEntry = 0x51,
    /// Client asks to rename or move a path.
    MoveCommand = 0x60,
    /// Device reports the outcome of a move.
    MoveStatus = 0x61,
}

impl Tag {
    /// Raw wire value.
    #[must_use]
    pub const fn as_u8(self) -> u8 { self as u8 }

    /// Parse a raw wire value, returning `None` for unknown tags.
    ///
    /// # Examples
    ///
    /// ```
    /// use fileframe::protocol::Tag;
    ///
    /// assert_eq!(Tag::from_u8(0x51), Some(Tag::ListDirEntry));
    /// assert_eq!(Tag::from_u8(0x99), None);
    /// ```
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x10 => Self::ReadCommand,
            0x11 => Self::ReadData,
            0x12 => Self::ReadPacing,
            0x20 => Self::WriteCommand,
            0x21 => Self::WritePacing,
            0x22 => Self::WriteData,
            0x30 => Self::DeleteCommand,
            0x31 => Self::DeleteStatus,
            0x40 => Self::MkdirCommand,
            0x41 => Self::MkdirStatus,
            0x50 => Self::ListDirCommand,
            0x51 => Self::ListDirEntry,
            0x60 => Self::MoveCommand,
            0x61 => Self::MoveStatus,
            _ => return None,
        })
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({:#04x})", self.as_u8())
    }
}

/// File operation a session can have in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    /// Read a whole file.
    Read,
    /// Write content at an offset.
    Write,
    /// Delete a path.
    Delete,
    /// Create a directory.
    Mkdir,
    /// List a directory.
    ListDir,
    /// Move or rename a path.
    Move,
}

impl Command {
    /// Tag of the frame that starts this command.
    #[must_use]
    pub const fn tag(self) -> Tag {
        match self {
            Self::Read => Tag::ReadCommand,
            Self::Write => Tag::WriteCommand,
            Self::Delete => Tag::DeleteCommand,
            Self::Mkdir => Tag::MkdirCommand,
            Self::ListDir => Tag::ListDirCommand,
            Self::Move => Tag::MoveCommand,
        }
    }

    /// Lower-case operation name used in logs and error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Mkdir => "mkdir",
            Self::ListDir => "listdir",
            Self::Move => "move",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}
