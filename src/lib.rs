#![doc(html_root_url = "https://docs.rs/fileframe/latest")]
//! Public API for the `fileframe` library.
//!
//! This crate is the client side of a tagged binary file-transfer protocol
//! spoken by microcontroller boards over a fragmenting, low-bandwidth link
//! such as BLE. It reassembles replies from arbitrary transport fragments,
//! runs the two flow-control schemes the protocol uses for reads and writes,
//! and exposes each file operation as one awaitable call on a [`Session`].

pub mod assembler;
pub mod config;
pub mod error;
pub mod link;
pub mod pacing;
pub mod protocol;
pub mod session;
mod transfer;

pub use assembler::{FrameAssembler, FrameKind};
pub use config::SessionConfig;
pub use error::{CloseReason, FileTransferError, LinkError, ProtocolError, RequestError};
pub use link::{ChannelLink, LinkEvent, StreamLink, TransportLink};
pub use protocol::{Command, Status};
pub use session::{Result, Session};
pub use transfer::{DirEntry, WriteAck};
