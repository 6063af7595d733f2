//! Directory listing.
//!
//! The device answers a listdir command with one record per entry, each
//! carrying its index and the total entry count. Records may arrive
//! concatenated or split anywhere; the assembler hands them over one at a
//! time and this transfer collects them until the last index is seen.

use std::{collections::BTreeMap, time::SystemTime};

use super::{Step, Transfer, check_status, unexpected};
use crate::{
    assembler::FrameKind,
    error::{FileTransferError, ProtocolError},
    protocol::{Command, EntryRecord, Response, from_wire_time},
};

/// One entry of a directory listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name relative to the listed directory.
    pub path: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// File size in bytes; zero for directories.
    pub file_size: u32,
    /// Modification time in milliseconds since the Unix epoch.
    pub modified_epoch_millis: u64,
}

impl DirEntry {
    /// Modification time as wall-clock time.
    #[must_use]
    pub fn modified(&self) -> SystemTime {
        from_wire_time(self.modified_epoch_millis.saturating_mul(1_000_000))
    }
}

impl TryFrom<EntryRecord> for DirEntry {
    type Error = ProtocolError;

    fn try_from(record: EntryRecord) -> Result<Self, Self::Error> {
        let is_dir = record.is_dir();
        let path = String::from_utf8(record.name.to_vec()).map_err(ProtocolError::InvalidName)?;
        Ok(Self {
            path,
            is_dir,
            file_size: record.file_size,
            modified_epoch_millis: record.mod_time_ns / 1_000_000,
        })
    }
}

#[derive(Debug, Default)]
pub(crate) struct ListDirTransfer {
    total: Option<u32>,
    entries: BTreeMap<u32, DirEntry>,
}

impl ListDirTransfer {
    fn accept(&mut self, record: EntryRecord) -> Result<Option<Vec<DirEntry>>, ProtocolError> {
        let total = record.total_items;
        match self.total {
            Some(expected) if expected != total => {
                return Err(ProtocolError::EntryCountChanged {
                    expected,
                    found: total,
                });
            }
            _ => self.total = Some(total),
        }
        if total == 0 {
            return Ok(Some(Vec::new()));
        }
        let index = record.index;
        if index >= total {
            return Err(ProtocolError::EntryOutOfRange { index, total });
        }
        if self.entries.contains_key(&index) {
            return Err(ProtocolError::DuplicateEntry { index });
        }
        self.entries.insert(index, DirEntry::try_from(record)?);
        if index != total - 1 {
            return Ok(None);
        }
        if self.entries.len() != total as usize {
            return Err(ProtocolError::TruncatedListing {
                expected: total,
                received: self.entries.len(),
            });
        }
        Ok(Some(std::mem::take(&mut self.entries).into_values().collect()))
    }
}

impl Transfer for ListDirTransfer {
    type Output = Vec<DirEntry>;

    fn command(&self) -> Command { Command::ListDir }

    fn expects(&self) -> FrameKind { FrameKind::ListDirEntry }

    fn on_frame(&mut self, frame: Response) -> Result<Step<Vec<DirEntry>>, FileTransferError> {
        let record = match frame {
            Response::Entry(record) => record,
            other => return Err(unexpected(self.expects(), &other)),
        };
        check_status(Command::ListDir, record.status)?;
        tracing::trace!(index = record.index, total = record.total_items, "directory entry");
        Ok(match self.accept(record)? {
            Some(entries) => Step::Done(entries),
            None => Step::Await,
        })
    }
}
