//! Test doubles for driving a [`fileframe::Session`] without hardware.
//!
//! [`SimulatedDevice`] answers the protocol from an in-memory filesystem for
//! end-to-end tests. [`scripted_session`] hands the device side to the test
//! itself, which then sees every piece the session writes and chooses exactly
//! how reply bytes are fragmented.

pub mod device;
pub mod scripted;

use std::time::Duration;

pub use device::{DeviceHandle, Node, SimulatedDevice};
use fileframe::SessionConfig;
use rstest::fixture;
pub use scripted::{Remote, ScriptedLink, scripted_session};

/// Configuration without pacing delays and with a short timeout, suited to
/// tests running in real time.
#[fixture]
#[must_use]
pub fn fast_config() -> SessionConfig {
    SessionConfig::default()
        .pacing_delay(Duration::ZERO)
        .operation_timeout(Some(Duration::from_secs(5)))
}
