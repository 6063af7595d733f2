//! Device status codes carried in replies.

use std::fmt;

/// Status byte reported by the device for the current command.
///
/// Anything other than [`Status::Ok`] terminates the command; the device is
/// reporting application state (for example, the filesystem is read-only
/// because the host has it mounted over USB), so callers should not retry
/// blindly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    /// The command succeeded.
    Ok,
    /// Generic failure, such as a missing path.
    Error,
    /// The filesystem is mounted by a USB host and is read-only.
    UsbMounted,
    /// A status value this client does not know.
    Other(u8),
}

impl Status {
    /// Raw wire value for [`Status::Ok`].
    pub const OK: u8 = 0x01;
    /// Raw wire value for [`Status::Error`].
    pub const ERROR: u8 = 0x02;
    /// Raw wire value for [`Status::UsbMounted`].
    pub const ERROR_USB_MOUNTED: u8 = 0x05;

    /// Decode a status byte.
    ///
    /// # Examples
    ///
    /// ```
    /// use fileframe::protocol::Status;
    ///
    /// assert_eq!(Status::from_u8(0x05), Status::UsbMounted);
    /// assert_eq!(Status::from_u8(0x07), Status::Other(0x07));
    /// ```
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            Self::OK => Self::Ok,
            Self::ERROR => Self::Error,
            Self::ERROR_USB_MOUNTED => Self::UsbMounted,
            other => Self::Other(other),
        }
    }

    /// Encode the status as its wire byte.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Ok => Self::OK,
            Self::Error => Self::ERROR,
            Self::UsbMounted => Self::ERROR_USB_MOUNTED,
            Self::Other(value) => value,
        }
    }

    /// Whether the device accepted the command.
    #[must_use]
    pub const fn is_ok(self) -> bool { matches!(self, Self::Ok) }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::Error => f.write_str("error"),
            Self::UsbMounted => f.write_str("filesystem mounted over USB"),
            Self::Other(value) => write!(f, "unknown status {value:#04x}"),
        }
    }
}
