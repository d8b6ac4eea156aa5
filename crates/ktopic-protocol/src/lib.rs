//! ktopic Wire Protocol
//!
//! Message types exchanged between the TCP broker client and a broker.
//!
//! # Frame Layout
//!
//! ```text
//! +----------------+--------+----------------+----------------------+
//! | Length (u32 BE)| Format | Correlation ID | Payload (postcard)   |
//! | 4 bytes        | 1 byte | 4 bytes (BE)   | N bytes              |
//! +----------------+--------+----------------+----------------------+
//! ```
//!
//! The length prefix belongs to the transport; [`Request::to_wire`] and
//! [`Response::to_wire`] produce everything after it.
//!
//! # Protocol Stability
//!
//! The enum variant order is significant for postcard serialization. Changes
//! to variant order break wire compatibility.

mod error;
mod messages;

pub use error::{ProtocolError, Result};
pub use messages::{Acks, Request, Response};

/// Maximum message size (64 MiB)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Bytes preceding the payload: format byte + correlation id
pub const WIRE_HEADER_SIZE: usize = 5;

/// Payload encoding identified by the first byte of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum WireFormat {
    #[default]
    Postcard = 0x00,
}

impl WireFormat {
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Postcard),
            _ => None,
        }
    }
}
