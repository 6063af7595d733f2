//! Wire codec for the file-transfer protocol.
//!
//! The protocol is a set of fixed little-endian header layouts, each opened by
//! a one-byte [`Tag`]. Encoding and decoding are pure functions over byte
//! buffers; all sequencing lives in [`crate::session`].

pub mod request;
pub mod response;
pub mod status;
pub mod tag;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub use request::Request;
pub use response::{EntryRecord, ReadData, Response, StatusReply, WritePacing};
pub use status::Status;
pub use tag::{Command, Tag};

/// Convert a wall-clock time to the nanosecond timestamps used on the wire.
///
/// Times before the Unix epoch clamp to zero and times past the `u64` range
/// saturate.
///
/// # Examples
///
/// ```
/// use std::time::{Duration, UNIX_EPOCH};
///
/// use fileframe::protocol::to_wire_time;
///
/// assert_eq!(to_wire_time(UNIX_EPOCH + Duration::from_millis(3)), 3_000_000);
/// ```
#[must_use]
pub fn to_wire_time(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
}

/// Convert a wire timestamp back to wall-clock time.
#[must_use]
pub fn from_wire_time(nanos: u64) -> SystemTime { UNIX_EPOCH + Duration::from_nanos(nanos) }
