//! Error types for stlinkdump.

use std::io;
use thiserror::Error;

/// Result type for stlinkdump operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for stlinkdump operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial stream, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// USB transport error.
    #[cfg(feature = "native")]
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Opcode sequence does not fit in a command frame.
    #[error("Command is too long: {len} bytes (maximum {max})")]
    CommandTooLong {
        /// Length of the rejected opcode sequence.
        len: usize,
        /// Frame capacity.
        max: usize,
    },

    /// Not exactly one adapter matched the device filters.
    #[error("No devices or more than 1 device (found {count})")]
    AmbiguousOrMissingDevice {
        /// Number of matching devices.
        count: usize,
    },

    /// Device answered with fewer bytes than the response format needs.
    #[error("Short response: expected at least {expected} bytes, got {actual}")]
    ShortResponse {
        /// Minimum response length.
        expected: usize,
        /// Bytes actually received.
        actual: usize,
    },

    /// Bulk write transferred fewer bytes than requested.
    #[error("Short write: sent {actual} of {expected} bytes")]
    ShortWrite {
        /// Bytes requested.
        expected: usize,
        /// Bytes actually written.
        actual: usize,
    },

    /// The matched device exposes no bulk IN/OUT endpoint pair.
    #[error("Device has no bulk IN/OUT endpoint pair")]
    NoBulkEndpoints,

    /// Payload does not fit the 16-bit length field of a download header.
    #[error("Payload too large: {len} bytes (maximum {max})")]
    PayloadTooLarge {
        /// Payload length.
        len: usize,
        /// Largest encodable length.
        max: usize,
    },
}
