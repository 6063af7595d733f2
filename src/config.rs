//! Session configuration.
//!
//! [`SessionConfig`] bounds the two flow-control windows and the outbound
//! pacing. Defaults suit a BLE link to a microcontroller with a 1 KiB receive
//! buffer; every value can be overridden with the builder-style setters.

use std::{num::NonZeroUsize, time::Duration};

use crate::protocol::response::READ_DATA_HEADER_LEN;

/// Default size of the client's receive buffer.
pub const DEFAULT_RECEIVE_CAPACITY: usize = 1024;
/// Smallest accepted receive buffer. It must hold every fixed reply header.
pub const MIN_RECEIVE_CAPACITY: usize = 32;
/// Default largest piece handed to the transport in one call.
pub const DEFAULT_MAX_FRAGMENT_LEN: usize = 512;
/// Default spacing between outbound pieces.
pub const DEFAULT_PACING_DELAY: Duration = Duration::from_millis(100);
/// Default per-operation timeout.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);
/// Default limit on the size of a file accepted by a read.
pub const DEFAULT_MAX_READ_LEN: usize = 16 * 1024 * 1024;

/// Tunables for a [`Session`](crate::Session).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use fileframe::SessionConfig;
///
/// let config = SessionConfig::default()
///     .receive_capacity(512)
///     .pacing_delay(Duration::from_millis(20))
///     .operation_timeout(None);
/// assert_eq!(config.read_credit(), 496);
/// assert_eq!(config.operation_timeout_value(), None);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    receive_capacity: usize,
    max_fragment_len: NonZeroUsize,
    pacing_delay: Duration,
    operation_timeout: Option<Duration>,
    max_read_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            receive_capacity: DEFAULT_RECEIVE_CAPACITY,
            max_fragment_len: NonZeroUsize::new(DEFAULT_MAX_FRAGMENT_LEN)
                .unwrap_or(NonZeroUsize::MIN),
            pacing_delay: DEFAULT_PACING_DELAY,
            operation_timeout: Some(DEFAULT_OPERATION_TIMEOUT),
            max_read_len: DEFAULT_MAX_READ_LEN,
        }
    }
}

impl SessionConfig {
    /// Set the size of the client's receive buffer.
    ///
    /// Values below [`MIN_RECEIVE_CAPACITY`] are raised to it.
    #[must_use]
    pub fn receive_capacity(mut self, bytes: usize) -> Self {
        self.receive_capacity = bytes.max(MIN_RECEIVE_CAPACITY);
        self
    }

    /// Set the largest piece handed to the transport in one call.
    ///
    /// A value of zero is treated as one.
    #[must_use]
    pub fn max_fragment_len(mut self, bytes: usize) -> Self {
        self.max_fragment_len = NonZeroUsize::new(bytes).unwrap_or(NonZeroUsize::MIN);
        self
    }

    /// Set the spacing between outbound pieces. Zero disables pacing.
    #[must_use]
    pub fn pacing_delay(mut self, delay: Duration) -> Self {
        self.pacing_delay = delay;
        self
    }

    /// Set the per-operation timeout. `None` waits indefinitely.
    #[must_use]
    pub fn operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the largest file a read will accept.
    #[must_use]
    pub fn max_read_len(mut self, bytes: usize) -> Self {
        self.max_read_len = bytes;
        self
    }

    /// Configured receive buffer size.
    #[must_use]
    pub const fn receive_capacity_value(&self) -> usize { self.receive_capacity }

    /// Configured largest outbound piece.
    #[must_use]
    pub const fn max_fragment_len_value(&self) -> NonZeroUsize { self.max_fragment_len }

    /// Configured spacing between outbound pieces.
    #[must_use]
    pub const fn pacing_delay_value(&self) -> Duration { self.pacing_delay }

    /// Configured per-operation timeout.
    #[must_use]
    pub const fn operation_timeout_value(&self) -> Option<Duration> { self.operation_timeout }

    /// Configured read size limit.
    #[must_use]
    pub const fn max_read_len_value(&self) -> usize { self.max_read_len }

    /// Largest chunk the device may send per read round: the receive buffer
    /// less the read data header.
    #[must_use]
    pub fn read_credit(&self) -> u32 {
        let credit = self.receive_capacity.saturating_sub(READ_DATA_HEADER_LEN);
        u32::try_from(credit).unwrap_or(u32::MAX)
    }
}
