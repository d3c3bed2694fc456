//! ST-Link mode probing, bootloader entry and block download.
//!
//! All operations take an already acquired [`Transport`] and issue one command
//! at a time, waiting for each to finish. Nothing is retried: any transport
//! error ends the operation.
//!
//! ## Download sequence
//!
//! ```text
//! host                                   adapter
//!  |  F3 01 blk blk 00 00 len len (header)  |
//!  |--------------------------------------->|
//!  |  data[0..64], data[64..128], ...       |
//!  |--------------------------------------->|
//!  |  F3 03 (status)                        |
//!  |--------------------------------------->|
//!  |  xx t0 t1 .. (poll timeout)            |
//!  |<---------------------------------------|
//!  |  ... sleep timeout ...                 |
//!  |  F3 03 (status, reply ignored)         |
//!  |--------------------------------------->|
//!  |<---------------------------------------|
//! ```

use {
    crate::{
        error::{Error, Result},
        protocol::{
            BOOTLOADER_MODE_THRESHOLD, Command, DownloadHeader, MAX_CHUNK_SIZE, MAX_DOWNLOAD_LEN,
            decode_mode, decode_status_timeout, set_address_payload,
        },
        transport::Transport,
    },
    log::{debug, info, trace},
    std::{thread, time::Duration},
};

/// Block number that carries the transfer address.
pub const ADDRESS_BLOCK: u16 = 0;

/// Block number that carries the payload.
pub const PAYLOAD_BLOCK: u16 = 1;

/// Wait after a reboot request before the adapter is usable again.
pub const REBOOT_SETTLE_DELAY: Duration = Duration::from_millis(1000);

/// Something that can suspend the current flow for a while.
pub trait Delay {
    /// Block for `duration`.
    fn delay(&mut self, duration: Duration);
}

/// [`Delay`] backed by `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadDelay;

impl Delay for ThreadDelay {
    fn delay(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Firmware currently running on the adapter, as reported by get-mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    /// Normal debug-probe firmware; uploads are not accepted yet.
    Application(u16),
    /// Bootloader, ready for downloads.
    Bootloader(u16),
}

impl DeviceMode {
    /// Classify a raw mode word.
    pub fn from_raw(raw: u16) -> Self {
        if raw < BOOTLOADER_MODE_THRESHOLD {
            Self::Application(raw)
        } else {
            Self::Bootloader(raw)
        }
    }

    /// The raw mode word.
    pub fn raw(self) -> u16 {
        match self {
            Self::Application(raw) | Self::Bootloader(raw) => raw,
        }
    }

    /// Whether the adapter must be rebooted before it accepts uploads.
    pub fn needs_bootloader_reboot(self) -> bool {
        matches!(self, Self::Application(_))
    }
}

/// Ask the adapter for its current mode word.
pub fn probe_mode<T: Transport + ?Sized>(device: &mut T) -> Result<u16> {
    let response = device.write_and_read(&Command::get_mode())?;
    let mode = decode_mode(&response)?;
    debug!("Device mode: 0x{mode:04X}");
    Ok(mode)
}

/// Ask the adapter to restart into its bootloader.
///
/// The adapter drops off the bus without acknowledging; wait
/// [`REBOOT_SETTLE_DELAY`] before acquiring it again.
pub fn request_bootloader_reboot<T: Transport + ?Sized>(device: &mut T) -> Result<()> {
    device.send(&Command::reboot_to_bootloader())
}

/// Download `data` as block `block`.
///
/// The data goes out in chunks of at most 64 bytes. Afterwards the status is
/// polled once, the host sleeps for the timeout it reports, and the status is
/// polled a second time with the reply discarded.
pub fn download_block<T, D>(device: &mut T, delay: &mut D, block: u16, data: &[u8]) -> Result<()>
where
    T: Transport + ?Sized,
    D: Delay + ?Sized,
{
    let length = u16::try_from(data.len()).map_err(|_| Error::PayloadTooLarge {
        len: data.len(),
        max: MAX_DOWNLOAD_LEN,
    })?;

    debug!("Downloading block {block} ({length} bytes)");
    device.send(&DownloadHeader::new(block, length).to_command())?;

    for (i, chunk) in data.chunks(MAX_CHUNK_SIZE).enumerate() {
        trace!("Block {block} chunk {i}: {} bytes", chunk.len());
        device.write(chunk)?;
    }

    let status = device.write_and_read(&Command::download_status())?;
    let timeout = decode_status_timeout(&status)?;
    debug!("Block {block} poll timeout: {} ms", timeout.as_millis());
    delay.delay(timeout);

    device.write_and_read(&Command::download_status())?;
    Ok(())
}

/// Point the bootloader at `address` for the following payload block.
pub fn set_transfer_address<T, D>(device: &mut T, delay: &mut D, address: u32) -> Result<()>
where
    T: Transport + ?Sized,
    D: Delay + ?Sized,
{
    debug!("Setting transfer address to 0x{address:08X}");
    download_block(device, delay, ADDRESS_BLOCK, &set_address_payload(address))
}

/// Upload `payload` to `address`: an address block followed by a payload block.
pub fn upload_payload<T, D>(
    device: &mut T,
    delay: &mut D,
    address: u32,
    payload: &[u8],
) -> Result<()>
where
    T: Transport + ?Sized,
    D: Delay + ?Sized,
{
    if payload.len() > MAX_DOWNLOAD_LEN {
        return Err(Error::PayloadTooLarge {
            len: payload.len(),
            max: MAX_DOWNLOAD_LEN,
        });
    }

    info!("Uploading {} bytes to 0x{address:08X}", payload.len());
    set_transfer_address(device, delay, address)?;
    download_block(device, delay, PAYLOAD_BLOCK, payload)
}
