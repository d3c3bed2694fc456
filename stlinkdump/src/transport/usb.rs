//! USB transport using the `rusb` crate.

use {
    crate::{
        device::{DeviceFilters, DeviceKind, select_single},
        error::{Error, Result},
        protocol::Command,
        transport::Transport,
    },
    log::{debug, trace},
    rusb::{Context, Device, DeviceHandle, Direction, TransferType, UsbContext},
    std::time::Duration,
};

/// Default timeout for a single bulk transfer.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Bulk endpoint pair of the adapter's command interface.
#[derive(Debug, Clone, Copy)]
struct BulkEndpoints {
    interface: u8,
    input: u8,
    output: u8,
    max_packet_size: u16,
}

/// Finds and opens the adapter on the USB bus.
pub struct UsbLocator {
    context: Context,
    timeout: Duration,
}

impl UsbLocator {
    /// Create a locator with its own libusb context.
    pub fn new() -> Result<Self> {
        Ok(Self {
            context: Context::new()?,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Set the timeout applied to every bulk transfer of acquired handles.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// List attached devices matching `filters`, without opening them.
    pub fn find(&self, filters: &DeviceFilters) -> Result<Vec<(Device<Context>, DeviceKind)>> {
        let mut matches = Vec::new();

        for device in self.context.devices()?.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    trace!(
                        "Skipping device {:03}:{:03}: {e}",
                        device.bus_number(),
                        device.address()
                    );
                    continue;
                },
            };

            if let Some(kind) = filters.classify(descriptor.vendor_id(), descriptor.product_id()) {
                debug!(
                    "Found {} at bus {:03} address {:03} ({:04X}:{:04X})",
                    kind.name(),
                    device.bus_number(),
                    device.address(),
                    descriptor.vendor_id(),
                    descriptor.product_id()
                );
                matches.push((device, kind));
            }
        }

        Ok(matches)
    }

    /// Open the single attached adapter matching `filters`.
    ///
    /// Fails with [`Error::AmbiguousOrMissingDevice`] unless exactly one
    /// device matches; in that case nothing is opened.
    pub fn acquire(&self, filters: &DeviceFilters) -> Result<UsbTransport> {
        let (device, kind) = select_single(self.find(filters)?)?;
        UsbTransport::open(&device, kind, self.timeout)
    }
}

/// An opened adapter with its command interface claimed.
///
/// The interface is released and the handle closed when this value drops.
pub struct UsbTransport {
    handle: DeviceHandle<Context>,
    endpoints: BulkEndpoints,
    kind: DeviceKind,
    timeout: Duration,
}

impl UsbTransport {
    fn open(device: &Device<Context>, kind: DeviceKind, timeout: Duration) -> Result<Self> {
        let endpoints = find_bulk_endpoints(device)?;
        let mut handle = device.open()?;

        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            trace!("Kernel driver auto-detach unavailable: {e}");
        }
        handle.claim_interface(endpoints.interface)?;

        debug!(
            "Opened {} (interface {}, OUT 0x{:02X}, IN 0x{:02X})",
            kind.name(),
            endpoints.interface,
            endpoints.output,
            endpoints.input
        );

        Ok(Self {
            handle,
            endpoints,
            kind,
            timeout,
        })
    }
}

impl Transport for UsbTransport {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        trace!("USB OUT {} bytes: {:02X?}", data.len(), data);
        let written = self
            .handle
            .write_bulk(self.endpoints.output, data, self.timeout)?;
        check_written(data.len(), written)
    }

    fn write_and_read(&mut self, command: &Command) -> Result<Vec<u8>> {
        self.write(command.as_bytes())?;

        let mut buf = vec![0u8; usize::from(self.endpoints.max_packet_size)];
        let n = self
            .handle
            .read_bulk(self.endpoints.input, &mut buf, self.timeout)?;
        buf.truncate(n);
        trace!("USB IN {n} bytes: {buf:02X?}");
        Ok(buf)
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(self.endpoints.interface) {
            debug!("Failed to release interface {}: {e}", self.endpoints.interface);
        }
        debug!("Closed {}", self.kind.name());
    }
}

fn check_written(expected: usize, actual: usize) -> Result<()> {
    if actual != expected {
        return Err(Error::ShortWrite { expected, actual });
    }
    Ok(())
}

/// Endpoint attributes needed to pick the command pipe.
#[derive(Debug, Clone, Copy)]
struct EndpointInfo {
    transfer_type: TransferType,
    direction: Direction,
    address: u8,
    max_packet_size: u16,
}

/// Pair the first bulk IN and first bulk OUT endpoint of one interface.
fn pair_bulk_endpoints<I>(interface: u8, endpoints: I) -> Option<BulkEndpoints>
where
    I: IntoIterator<Item = EndpointInfo>,
{
    let mut input = None;
    let mut output = None;

    for endpoint in endpoints {
        if endpoint.transfer_type != TransferType::Bulk {
            continue;
        }
        match endpoint.direction {
            Direction::In if input.is_none() => {
                input = Some((endpoint.address, endpoint.max_packet_size));
            },
            Direction::Out if output.is_none() => {
                output = Some(endpoint.address);
            },
            _ => {},
        }
    }

    let ((input, max_packet_size), output) = (input?, output?);
    Some(BulkEndpoints {
        interface,
        input,
        output,
        max_packet_size: max_packet_size.max(64),
    })
}

/// Locate the first interface exposing both a bulk IN and a bulk OUT endpoint.
fn find_bulk_endpoints(device: &Device<Context>) -> Result<BulkEndpoints> {
    let config = device.active_config_descriptor()?;

    for interface in config.interfaces() {
        for descriptor in interface.descriptors() {
            let endpoints = descriptor.endpoint_descriptors().map(|e| EndpointInfo {
                transfer_type: e.transfer_type(),
                direction: e.direction(),
                address: e.address(),
                max_packet_size: e.max_packet_size(),
            });
            if let Some(pair) = pair_bulk_endpoints(descriptor.interface_number(), endpoints) {
                return Ok(pair);
            }
        }
    }

    Err(Error::NoBulkEndpoints)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(transfer_type: TransferType, direction: Direction, address: u8) -> EndpointInfo {
        EndpointInfo {
            transfer_type,
            direction,
            address,
            max_packet_size: 64,
        }
    }

    #[test]
    fn test_pair_bulk_endpoints_picks_first_pair() {
        // Debug interface layout: data IN, command OUT, trace IN
        let endpoints = [
            endpoint(TransferType::Bulk, Direction::In, 0x81),
            endpoint(TransferType::Bulk, Direction::Out, 0x01),
            endpoint(TransferType::Bulk, Direction::In, 0x82),
        ];

        let pair = pair_bulk_endpoints(0, endpoints).unwrap();
        assert_eq!(pair.interface, 0);
        assert_eq!(pair.input, 0x81);
        assert_eq!(pair.output, 0x01);
        assert_eq!(pair.max_packet_size, 64);
    }

    #[test]
    fn test_pair_bulk_endpoints_skips_non_bulk() {
        let endpoints = [
            endpoint(TransferType::Interrupt, Direction::In, 0x83),
            endpoint(TransferType::Bulk, Direction::Out, 0x02),
            endpoint(TransferType::Bulk, Direction::In, 0x84),
        ];

        let pair = pair_bulk_endpoints(3, endpoints).unwrap();
        assert_eq!(pair.interface, 3);
        assert_eq!(pair.input, 0x84);
        assert_eq!(pair.output, 0x02);
    }

    #[test]
    fn test_pair_bulk_endpoints_needs_both_directions() {
        let only_in = [endpoint(TransferType::Bulk, Direction::In, 0x81)];
        assert!(pair_bulk_endpoints(0, only_in).is_none());

        let interrupt_only = [
            endpoint(TransferType::Interrupt, Direction::In, 0x81),
            endpoint(TransferType::Interrupt, Direction::Out, 0x01),
        ];
        assert!(pair_bulk_endpoints(0, interrupt_only).is_none());
    }

    #[test]
    fn test_pair_bulk_endpoints_floors_packet_size() {
        let mut small_in = endpoint(TransferType::Bulk, Direction::In, 0x81);
        small_in.max_packet_size = 8;
        let endpoints = [small_in, endpoint(TransferType::Bulk, Direction::Out, 0x01)];

        assert_eq!(pair_bulk_endpoints(0, endpoints).unwrap().max_packet_size, 64);
    }

    #[test]
    fn test_check_written() {
        assert!(check_written(16, 16).is_ok());
        assert!(matches!(
            check_written(16, 10),
            Err(Error::ShortWrite {
                expected: 16,
                actual: 10
            })
        ));
    }

    #[test]
    fn test_locator_without_filters_finds_nothing() {
        // Hosts without libusb access cannot create a context
        let Ok(locator) = UsbLocator::new() else {
            return;
        };
        let filters = DeviceFilters::new(Vec::new());

        assert!(locator.find(&filters).unwrap().is_empty());
        assert!(matches!(
            locator.acquire(&filters),
            Err(Error::AmbiguousOrMissingDevice { count: 0 })
        ));
    }
}
