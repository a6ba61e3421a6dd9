//! Session protocol spoken over the daemon's control socket.
//!
//! A session is one accepted connection carrying exactly one top-level
//! command and its argument exchange. External clients and isolation
//! workers speak the same protocol; workers are just clients that happen
//! to live inside the daemon process.

pub mod messages;
pub mod session;
pub mod tag;

use nestbox_common::error::NestboxError;
use thiserror::Error;

pub use session::{Message, Session};
pub use tag::Tag;

/// A peer violated the session protocol.
///
/// The daemon drops the offending session; no registry state changes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The peer closed the connection before the exchange was complete.
    #[error("peer disconnected mid-session")]
    Disconnected,

    /// Reading from or writing to the connection failed.
    #[error("session I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A frame announced a body larger than the protocol allows.
    #[error("message of {len} bytes exceeds the {max} byte limit")]
    Oversized {
        /// Announced or attempted body length.
        len: usize,
        /// Maximum accepted body length.
        max: usize,
    },

    /// A frame body was not UTF-8.
    #[error("message is not valid UTF-8")]
    InvalidUtf8,

    /// A message used the sentinel prefix but names no known tag.
    #[error("unknown sentinel {0:?}")]
    UnknownTag(String),

    /// A message of the wrong kind arrived.
    #[error("expected {expected}, got {got}")]
    Unexpected {
        /// What the decoder was waiting for.
        expected: String,
        /// What actually arrived.
        got: String,
    },

    /// An argument could not be interpreted.
    #[error("invalid {field}: {reason}")]
    InvalidArgument {
        /// Which argument was rejected.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

impl From<ProtocolError> for NestboxError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol {
            message: e.to_string(),
        }
    }
}
