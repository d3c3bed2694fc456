//! Command transport to the adapter.
//!
//! The protocol layer only needs two primitives: a plain write, and a write
//! followed by a read of the reply. [`Transport`] captures exactly that so the
//! sequencing logic can run against USB hardware or an in-memory recorder.
//!
//! ```text
//! +------------------+
//! |  stlink / dump   |   probe, reboot, download
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! |  Transport trait |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! |   UsbTransport   |   bulk OUT / bulk IN
//! |      (rusb)      |
//! +------------------+
//! ```

#[cfg(feature = "native")]
pub mod usb;

use crate::error::Result;
use crate::protocol::Command;

/// Byte-level access to an opened adapter.
pub trait Transport {
    /// Write raw bytes as one transfer, expecting no reply.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Write a command frame and return the adapter's reply.
    fn write_and_read(&mut self, command: &Command) -> Result<Vec<u8>>;

    /// Write a command frame, expecting no reply.
    fn send(&mut self, command: &Command) -> Result<()> {
        self.write(command.as_bytes())
    }
}

#[cfg(feature = "native")]
pub use usb::{UsbLocator, UsbTransport};
