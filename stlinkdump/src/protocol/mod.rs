//! ST-Link command protocol.

pub mod command;

// Re-export common types
pub use command::{
    BOOTLOADER_MODE_THRESHOLD, COMMAND_LEN, Command, DownloadHeader, MAX_CHUNK_SIZE,
    MAX_DOWNLOAD_LEN, Opcode, decode_mode, decode_status_timeout, make_command,
    set_address_payload,
};
