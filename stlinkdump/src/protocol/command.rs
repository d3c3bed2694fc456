//! ST-Link command frames.
//!
//! Every request sent to the adapter is a fixed 16-byte frame. The leading
//! bytes carry the opcode and its operands, the rest is zero padding.
//!
//! ## Download header
//!
//! ```text
//! +------+------+-----------+-----------+-----------+-------------+
//! | 0xF3 | 0x01 | Block (LE)| Cksum (LE)| Len (LE)  |  zero pad   |
//! +------+------+-----------+-----------+-----------+-------------+
//! |  1   |  1   |  2 bytes  |  2 bytes  |  2 bytes  |   8 bytes   |
//! +------+------+-----------+-----------+-----------+-------------+
//! ```

use {
    crate::error::{Error, Result},
    byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt},
    std::{fmt, time::Duration},
};

/// Size of every command frame.
pub const COMMAND_LEN: usize = 16;

/// Largest data chunk written in one bulk transfer during a download.
pub const MAX_CHUNK_SIZE: usize = 0x40;

/// Largest payload a single download header can describe.
pub const MAX_DOWNLOAD_LEN: usize = u16::MAX as usize;

/// Mode values at or above this are reported by the bootloader.
pub const BOOTLOADER_MODE_THRESHOLD: u16 = 0x0200;

/// Leading opcode bytes understood by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Download sub-protocol (0xF3).
    Dfu = 0xF3,
    /// Query current mode (0xF5).
    GetMode = 0xF5,
    /// Reboot request (0xF9).
    Reboot = 0xF9,
}

/// Download sub-command: header announcing a data block.
const DFU_DOWNLOAD: u8 = 0x01;

/// Download sub-command: status/poll.
const DFU_GET_STATUS: u8 = 0x03;

/// Reboot sub-command: restart into the bootloader.
const REBOOT_TO_BOOTLOADER: u8 = 0x01;

/// Block-0 payload prefix selecting the transfer address.
const SET_ADDRESS: u8 = 0x21;

/// A zero-padded 16-byte command frame.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Command([u8; COMMAND_LEN]);

/// Build a command frame from up to 16 opcode/operand bytes.
pub fn make_command(bytes: &[u8]) -> Result<Command> {
    if bytes.len() > COMMAND_LEN {
        return Err(Error::CommandTooLong {
            len: bytes.len(),
            max: COMMAND_LEN,
        });
    }

    let mut frame = [0u8; COMMAND_LEN];
    frame[..bytes.len()].copy_from_slice(bytes);
    Ok(Command(frame))
}

impl Command {
    /// Frame that asks for the current mode.
    pub fn get_mode() -> Self {
        Self::fixed(&[Opcode::GetMode as u8])
    }

    /// Frame that restarts the adapter into its bootloader.
    pub fn reboot_to_bootloader() -> Self {
        Self::fixed(&[Opcode::Reboot as u8, REBOOT_TO_BOOTLOADER])
    }

    /// Frame that polls the download status.
    pub fn download_status() -> Self {
        Self::fixed(&[Opcode::Dfu as u8, DFU_GET_STATUS])
    }

    /// Raw frame bytes.
    pub fn as_bytes(&self) -> &[u8; COMMAND_LEN] {
        &self.0
    }

    /// Opcode byte at the head of the frame.
    pub fn opcode(&self) -> u8 {
        self.0[0]
    }

    // Only for constant sequences that are known to fit.
    fn fixed(bytes: &[u8]) -> Self {
        let mut frame = [0u8; COMMAND_LEN];
        frame[..bytes.len()].copy_from_slice(bytes);
        Self(frame)
    }
}

impl AsRef<[u8]> for Command {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({:02X?})", self.0)
    }
}

/// Header announcing one download block.
///
/// The checksum is always transmitted as zero; the bootloader does not
/// check it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadHeader {
    /// Block number (0 selects the address, 1 carries the payload).
    pub block: u16,
    /// Number of data bytes that follow.
    pub length: u16,
    /// Block checksum.
    pub checksum: u16,
}

impl DownloadHeader {
    /// Header for `length` bytes of data in `block`.
    pub fn new(block: u16, length: u16) -> Self {
        Self {
            block,
            length,
            checksum: 0,
        }
    }

    /// Encode as a command frame.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn to_command(&self) -> Command {
        let mut bytes = Vec::with_capacity(8);
        bytes.push(Opcode::Dfu as u8);
        bytes.push(DFU_DOWNLOAD);
        bytes.write_u16::<LittleEndian>(self.block).unwrap();
        bytes.write_u16::<LittleEndian>(self.checksum).unwrap();
        bytes.write_u16::<LittleEndian>(self.length).unwrap();
        Command::fixed(&bytes)
    }
}

/// Block-0 payload that points the bootloader at `address`.
pub fn set_address_payload(address: u32) -> [u8; 5] {
    let mut payload = [0u8; 5];
    payload[0] = SET_ADDRESS;
    payload[1..].copy_from_slice(&address.to_le_bytes());
    payload
}

/// Decode the little-endian mode word of a get-mode response.
pub fn decode_mode(response: &[u8]) -> Result<u16> {
    let mut cursor = response;
    cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| Error::ShortResponse {
            expected: 2,
            actual: response.len(),
        })
}

/// Decode the poll timeout of a download status response.
///
/// Byte 2 feeds both the middle and the high byte of the millisecond value
/// and byte 3 is never read. This matches what the adapter has been observed
/// to accept; do not "fix" it without checking against real hardware.
pub fn decode_status_timeout(response: &[u8]) -> Result<Duration> {
    if response.len() < 3 {
        return Err(Error::ShortResponse {
            expected: 3,
            actual: response.len(),
        });
    }

    let millis = u64::from(response[1])
        | (u64::from(response[2]) << 8)
        | (u64::from(response[2]) << 16);
    Ok(Duration::from_millis(millis))
}
