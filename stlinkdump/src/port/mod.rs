//! Serial channel abstraction.
//!
//! The injected payload reports back over the adapter's virtual COM port.
//! The dump logic only needs a byte stream, so anything implementing
//! [`Port`] (the native `serialport` back end, or a mock in tests) can feed it.
//!
//! ## Example
//!
//! ```rust,no_run
//! use stlinkdump::port::{Port, SerialConfig};
//!
//! fn example<P: Port>(port: &mut P) -> std::io::Result<()> {
//!     let mut buf = [0u8; 32];
//!     let n = port.read(&mut buf)?;
//!     println!("Received {} bytes on {}", n, port.name());
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::Read;
use std::time::Duration;

/// Baud rate the payload's UART runs at.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Read timeout of one serial poll. Timeouts are retried by the dump loop.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Serial port configuration.
///
/// Framing is always 8 data bits, no parity, one stop bit, no flow control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Timeout of a single read call.
    pub timeout: Duration,
}

impl SerialConfig {
    /// Create a new configuration with the default baud rate and poll timeout.
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate: DEFAULT_BAUD,
            timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    /// Set the read timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// An open serial channel.
pub trait Port: Read + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Get the read timeout.
    fn timeout(&self) -> Duration;
}

#[cfg(feature = "native")]
pub use native::NativePort;
