//! Native serial port implementation using the `serialport` crate.

use {
    crate::{
        error::Result,
        port::{Port, SerialConfig},
    },
    log::debug,
    serialport::{DataBits, FlowControl, Parity, StopBits},
    std::{io::Read, time::Duration},
};

/// Native serial port implementation.
///
/// The port closes when this value drops.
pub struct NativePort {
    port: Box<dyn serialport::SerialPort>,
    name: String,
    timeout: Duration,
    baud_rate: u32,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()?;

        debug!(
            "Opened serial port {} at {} baud (8N1)",
            config.port_name, config.baud_rate
        );

        Ok(Self {
            port,
            name: config.port_name.clone(),
            timeout: config.timeout,
            baud_rate: config.baud_rate,
        })
    }
}

impl Port for NativePort {
    fn name(&self) -> &str {
        &self.name
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port.read(buf)
    }
}

impl Drop for NativePort {
    fn drop(&mut self) {
        debug!("Closed serial port {}", self.name);
    }
}
