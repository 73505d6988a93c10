//! Error types for NAT behavior discovery.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// STUN codec errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StunError {
    /// Datagram shorter than the 20-byte STUN header
    #[error("STUN message too short: {0} bytes")]
    MessageTooShort(usize),

    /// Magic cookie is not 0x2112A442
    #[error("invalid STUN magic cookie: 0x{0:08X}")]
    InvalidMagicCookie(u32),

    /// Message type has the top bits set or an unsupported method
    #[error("invalid STUN message type: 0x{0:04X}")]
    InvalidMessageType(u16),

    /// Declared body length does not fit the datagram
    #[error("STUN length mismatch: header declares {declared} bytes, {available} available")]
    LengthMismatch {
        /// Length from the header
        declared: usize,
        /// Bytes actually present after the header
        available: usize,
    },

    /// Attribute value could not be parsed
    #[error("invalid STUN attribute 0x{0:04X}")]
    InvalidAttribute(u16),
}

/// NAT discovery errors
///
/// Transport level failures abort the running suite. `Timeout` is also a
/// classification signal for the filtering suite.
#[derive(Debug, Error)]
pub enum NatError {
    /// Server name could not be resolved
    #[error("failed to resolve {target}: {reason}")]
    Resolution {
        /// The host:port that was looked up
        target: String,
        /// Resolver failure description
        reason: String,
    },

    /// Bind, send or receive failure
    #[error("socket error: {0}")]
    Socket(#[from] io::Error),

    /// Malformed STUN packet
    #[error("decode error: {0}")]
    Decode(#[from] StunError),

    /// Server response lacks an attribute needed for NAT discovery
    #[error("response missing {0}: server does not support NAT discovery")]
    MissingAttribute(&'static str),

    /// No response within the round-trip timeout
    #[error("timed out after {0:?} waiting for response")]
    Timeout(Duration),

    /// Response stream closed (receive task stopped)
    #[error("response channel closed")]
    ChannelClosed,

    /// Probe cancelled by the caller
    #[error("probe cancelled")]
    Cancelled,
}

impl NatError {
    /// Whether this error is a round-trip timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Result type for NAT discovery operations
pub type NatResult<T> = Result<T, NatError>;
