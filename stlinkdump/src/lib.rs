//! # stlinkdump
//!
//! Dump memory through an ST-Link/V2-1 by running a payload from its RAM.
//!
//! The adapter's bootloader accepts firmware downloads over USB. This crate
//! uses that to place a small payload at a chosen address, then collects the
//! memory the payload streams back over the adapter's virtual COM port.
//!
//! - Mode probing and reboot into the bootloader
//! - Block download (address block, payload block) with status polling
//! - Marker detection and fixed-size dump capture on the serial channel
//!
//! ## Features
//!
//! - `native` (default): real hardware via `rusb` and `serialport`
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use stlinkdump::{NativeBackend, SessionConfig, Sequencer};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let payload = std::fs::read("payload.bin")?;
//!     let config = SessionConfig::default();
//!
//!     let backend = NativeBackend::new("/dev/ttyACM0", &config)?;
//!     let mut sequencer = Sequencer::new(backend, config);
//!     let dump = sequencer.run(&payload, 0x2000_0000, |stage| {
//!         println!("{stage:?}");
//!     })?;
//!
//!     std::fs::write("dump.bin", dump)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod dump;
pub mod error;
pub mod port;
pub mod protocol;
pub mod sequencer;
pub mod stlink;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
#[cfg(feature = "native")]
pub use sequencer::NativeBackend;
#[cfg(feature = "native")]
pub use transport::{UsbLocator, UsbTransport};
pub use {
    device::{DeviceFilter, DeviceFilters, DeviceKind},
    dump::{DUMP_SIZE, START_MARKER, capture_dump},
    error::{Error, Result},
    port::{Port, SerialConfig},
    protocol::{Command, DownloadHeader},
    sequencer::{Backend, Sequencer, SessionConfig, Stage},
    stlink::{Delay, DeviceMode, ThreadDelay},
    transport::Transport,
};
