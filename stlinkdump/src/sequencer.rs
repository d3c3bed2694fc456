//! End-to-end run: bootloader entry, payload upload, dump capture.
//!
//! ```text
//! acquire - probe - [reboot] - release
//!     |
//!   settle 1000 ms
//!     |
//! open serial - acquire - block 0 (address) - block 1 (payload) - release
//!     |
//! wait for "start" - read dump
//! ```
//!
//! Each USB handle lives only for its own step and is dropped before the next
//! one starts. The serial channel is opened before the upload, so nothing the
//! payload prints can be missed, and is kept until the dump is complete.

use {
    crate::{
        device::DeviceFilters,
        dump::{DUMP_SIZE, START_MARKER, capture_dump},
        error::{Error, Result},
        port::{DEFAULT_BAUD, DEFAULT_POLL_TIMEOUT, Port},
        protocol::MAX_DOWNLOAD_LEN,
        stlink::{
            Delay, DeviceMode, REBOOT_SETTLE_DELAY, ThreadDelay, probe_mode,
            request_bootloader_reboot, upload_payload,
        },
        transport::Transport,
    },
    log::{debug, info},
    std::time::Duration,
};

/// Parameters of one run.
///
/// The defaults are the values the ST-Link/V2-1 and the stock payload
/// expect; only the host-side timeouts are meant to be tuned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// USB identities accepted as the adapter.
    pub filters: DeviceFilters,
    /// Wait between the mode probe step and the upload step.
    pub settle_delay: Duration,
    /// Marker preceding the dump.
    pub marker: Vec<u8>,
    /// Number of dump bytes to read.
    pub dump_size: usize,
    /// Timeout of a single USB bulk transfer.
    pub usb_timeout: Duration,
    /// Serial baud rate.
    pub serial_baud: u32,
    /// Timeout of a single serial read.
    pub serial_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            filters: DeviceFilters::stlink_v2_1(),
            settle_delay: REBOOT_SETTLE_DELAY,
            marker: START_MARKER.to_vec(),
            dump_size: DUMP_SIZE,
            usb_timeout: Duration::from_millis(1000),
            serial_baud: DEFAULT_BAUD,
            serial_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

/// Progress notifications emitted during [`Sequencer::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Probing the adapter's mode.
    CheckingDevice,
    /// Adapter runs its application firmware; reboot requested.
    RebootingToBootloader,
    /// Uploading address and payload blocks.
    SendingPayload,
    /// Upload done, waiting for the marker on the serial channel.
    WaitingForMarker,
    /// Dump bytes received so far. Emitted with `received == 0` as soon as
    /// the marker has been seen.
    Dumping {
        /// Bytes received.
        received: usize,
        /// Bytes expected.
        total: usize,
    },
}

/// Source of device handles and of the serial channel.
pub trait Backend {
    /// Handle type for the adapter.
    type Device: Transport;
    /// Serial channel type.
    type Serial: Port;

    /// Acquire the single adapter matching `filters`.
    fn acquire_device(&mut self, filters: &DeviceFilters) -> Result<Self::Device>;

    /// Open the serial channel.
    fn open_serial(&mut self) -> Result<Self::Serial>;
}

/// Drives one complete run against a [`Backend`].
pub struct Sequencer<B: Backend, D: Delay = ThreadDelay> {
    backend: B,
    delay: D,
    config: SessionConfig,
}

impl<B: Backend> Sequencer<B> {
    /// Create a sequencer that sleeps on the current thread.
    pub fn new(backend: B, config: SessionConfig) -> Self {
        Self::with_delay(backend, ThreadDelay, config)
    }
}

impl<B: Backend, D: Delay> Sequencer<B, D> {
    /// Create a sequencer with a custom delay source.
    pub fn with_delay(backend: B, delay: D, config: SessionConfig) -> Self {
        Self {
            backend,
            delay,
            config,
        }
    }

    /// Get the run parameters.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Probe the adapter and reboot it into the bootloader if needed.
    ///
    /// Returns the mode seen before any reboot. The device handle is released
    /// before this returns.
    pub fn ensure_bootloader<F>(&mut self, observer: &mut F) -> Result<DeviceMode>
    where
        F: FnMut(Stage),
    {
        observer(Stage::CheckingDevice);
        let mut device = self.backend.acquire_device(&self.config.filters)?;

        let mode = DeviceMode::from_raw(probe_mode(&mut device)?);
        if mode.needs_bootloader_reboot() {
            info!("Rebooting to bootloader (mode 0x{:04X})", mode.raw());
            observer(Stage::RebootingToBootloader);
            request_bootloader_reboot(&mut device)?;
        } else {
            debug!("Bootloader already active (mode 0x{:04X})", mode.raw());
        }

        Ok(mode)
    }

    /// Run the whole sequence and return the captured dump.
    ///
    /// Stops at the first error. Handles acquired up to that point are
    /// released on the way out.
    pub fn run<F>(
        &mut self,
        payload: &[u8],
        stack_offset: u32,
        mut observer: F,
    ) -> Result<Vec<u8>>
    where
        F: FnMut(Stage),
    {
        if payload.len() > MAX_DOWNLOAD_LEN {
            return Err(Error::PayloadTooLarge {
                len: payload.len(),
                max: MAX_DOWNLOAD_LEN,
            });
        }

        self.ensure_bootloader(&mut observer)?;
        self.delay.delay(self.config.settle_delay);

        let serial = self.backend.open_serial()?;
        info!(
            "Serial channel {} open at {} baud ({} ms read timeout)",
            serial.name(),
            serial.baud_rate(),
            serial.timeout().as_millis()
        );

        observer(Stage::SendingPayload);
        {
            let mut device = self.backend.acquire_device(&self.config.filters)?;
            upload_payload(&mut device, &mut self.delay, stack_offset, payload)?;
        }

        observer(Stage::WaitingForMarker);
        capture_dump(
            serial,
            &self.config.marker,
            self.config.dump_size,
            |received, total| observer(Stage::Dumping { received, total }),
        )
    }
}

#[cfg(feature = "native")]
pub use native_impl::NativeBackend;

#[cfg(feature = "native")]
mod native_impl {
    use super::{Backend, DeviceFilters, Result, SessionConfig};
    use crate::port::{NativePort, SerialConfig};
    use crate::transport::{UsbLocator, UsbTransport};

    /// Real hardware: `rusb` for the adapter, `serialport` for the channel.
    pub struct NativeBackend {
        locator: UsbLocator,
        serial: SerialConfig,
    }

    impl NativeBackend {
        /// Create a backend talking to the serial port `port_name`.
        pub fn new(port_name: impl Into<String>, config: &SessionConfig) -> Result<Self> {
            let locator = UsbLocator::new()?.with_timeout(config.usb_timeout);
            let serial = SerialConfig {
                port_name: port_name.into(),
                baud_rate: config.serial_baud,
                timeout: config.serial_timeout,
            };
            Ok(Self { locator, serial })
        }
    }

    impl Backend for NativeBackend {
        type Device = UsbTransport;
        type Serial = NativePort;

        fn acquire_device(&mut self, filters: &DeviceFilters) -> Result<UsbTransport> {
            self.locator.acquire(filters)
        }

        fn open_serial(&mut self) -> Result<NativePort> {
            NativePort::open(&self.serial)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::select_single;
    use crate::protocol::{Command, DownloadHeader, make_command};
    use crate::testing::{
        Event, Fragment, FragmentedSerial, Journal, MockTransport, RecordingDelay, journal,
    };

    struct MockBackend {
        journal: Journal,
        mode: u16,
        devices: usize,
        serial: Vec<u8>,
    }

    impl Backend for MockBackend {
        type Device = MockTransport;
        type Serial = FragmentedSerial;

        fn acquire_device(&mut self, _filters: &DeviceFilters) -> Result<MockTransport> {
            select_single(vec![(); self.devices])?;
            Ok(MockTransport::new(self.journal.clone(), self.mode))
        }

        fn open_serial(&mut self) -> Result<FragmentedSerial> {
            self.journal.borrow_mut().push(Event::SerialOpened);
            Ok(FragmentedSerial::new(
                &self.serial,
                &[Fragment::Bytes(2), Fragment::TimedOut, Fragment::Bytes(4096)],
            ))
        }
    }

    fn dump_stream(dump: &[u8]) -> Vec<u8> {
        let mut stream = b"boot\r\n".to_vec();
        stream.extend_from_slice(START_MARKER);
        stream.extend_from_slice(dump);
        stream
    }

    fn sequencer(
        log: &Journal,
        mode: u16,
        devices: usize,
    ) -> Sequencer<MockBackend, RecordingDelay> {
        let dump: Vec<u8> = (0..DUMP_SIZE).map(|i| (i % 253) as u8).collect();
        let backend = MockBackend {
            journal: log.clone(),
            mode,
            devices,
            serial: dump_stream(&dump),
        };
        Sequencer::with_delay(
            backend,
            RecordingDelay::new(log.clone()),
            SessionConfig::default(),
        )
    }

    #[test]
    fn test_full_run_from_application_firmware() {
        let _ = env_logger::builder().is_test(true).try_init();
        let log = journal();
        let mut seq = sequencer(&log, 0x0100, 1);
        let payload: Vec<u8> = (1..=12).collect();

        let mut stages = Vec::new();
        let dump = seq.run(&payload, 0x2000_0000, |s| stages.push(s)).unwrap();
        assert_eq!(dump.len(), DUMP_SIZE);
        assert_eq!(dump[..4], [0, 1, 2, 3]);

        let status = Command::download_status();
        let poll = Duration::from_millis(100);
        let expected = vec![
            Event::DeviceAcquired,
            Event::Exchange(make_command(&[0xF5]).unwrap()),
            Event::Write(make_command(&[0xF9, 0x01]).unwrap().as_bytes().to_vec()),
            Event::DeviceReleased,
            Event::Delay(Duration::from_millis(1000)),
            Event::SerialOpened,
            Event::DeviceAcquired,
            Event::Write(DownloadHeader::new(0, 5).to_command().as_bytes().to_vec()),
            Event::Write(vec![0x21, 0x00, 0x00, 0x00, 0x20]),
            Event::Exchange(status),
            Event::Delay(poll),
            Event::Exchange(status),
            Event::Write(DownloadHeader::new(1, 12).to_command().as_bytes().to_vec()),
            Event::Write(payload.clone()),
            Event::Exchange(status),
            Event::Delay(poll),
            Event::Exchange(status),
            Event::DeviceReleased,
        ];
        assert_eq!(*log.borrow(), expected);

        assert_eq!(
            stages[..4],
            [
                Stage::CheckingDevice,
                Stage::RebootingToBootloader,
                Stage::SendingPayload,
                Stage::WaitingForMarker,
            ]
        );
        assert_eq!(
            stages[4],
            Stage::Dumping {
                received: 0,
                total: DUMP_SIZE
            }
        );
        assert_eq!(
            stages.last(),
            Some(&Stage::Dumping {
                received: DUMP_SIZE,
                total: DUMP_SIZE
            })
        );
    }

    #[test]
    fn test_bootloader_mode_skips_reboot() {
        let log = journal();
        let mut seq = sequencer(&log, 0x0200, 1);

        seq.run(&[0xAA; 3], 0x2000_0000, |_| {}).unwrap();

        let events = log.borrow();
        let reboot = make_command(&[0xF9, 0x01]).unwrap().as_bytes().to_vec();
        assert!(!events.contains(&Event::Write(reboot)));
        // Settle delay still happens
        assert_eq!(events[3], Event::Delay(Duration::from_millis(1000)));
    }

    #[test]
    fn test_ensure_bootloader_threshold() {
        let log = journal();
        let mode = sequencer(&log, 0x01FF, 1)
            .ensure_bootloader(&mut |_: Stage| {})
            .unwrap();
        assert_eq!(mode, DeviceMode::Application(0x01FF));
        assert_eq!(log.borrow().len(), 4);

        let log = journal();
        let mode = sequencer(&log, 0x0200, 1)
            .ensure_bootloader(&mut |_: Stage| {})
            .unwrap();
        assert_eq!(mode, DeviceMode::Bootloader(0x0200));
        assert_eq!(log.borrow().len(), 3);
    }

    #[test]
    fn test_missing_or_ambiguous_device_stops_before_io() {
        for devices in [0, 2, 3] {
            let log = journal();
            let mut seq = sequencer(&log, 0x0100, devices);

            let err = seq.run(&[1, 2, 3], 0x2000_0000, |_| {}).unwrap_err();
            assert!(
                matches!(err, Error::AmbiguousOrMissingDevice { count } if count == devices)
            );
            assert!(log.borrow().is_empty());
        }
    }

    #[test]
    fn test_oversized_payload_rejected_before_device() {
        let log = journal();
        let mut seq = sequencer(&log, 0x0100, 1);

        let payload = vec![0u8; MAX_DOWNLOAD_LEN + 1];
        let err = seq.run(&payload, 0, |_| {}).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { .. }));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_default_session_config() {
        let config = SessionConfig::default();
        assert_eq!(config.marker, b"start");
        assert_eq!(config.dump_size, 0x20000);
        assert_eq!(config.settle_delay, Duration::from_millis(1000));
        assert_eq!(config.serial_baud, 115_200);
        assert_eq!(config.filters, DeviceFilters::stlink_v2_1());
    }
}
