//! Capture of the memory dump streamed back by the injected payload.
//!
//! The payload announces itself with a literal marker and then sends a fixed
//! number of raw bytes. Serial reads may return any amount of data, time out,
//! or be interrupted; the loops here keep going until the marker has been
//! seen and the buffer is full. There is deliberately no overall deadline.

use {
    crate::error::{Error, Result},
    log::{debug, info},
    std::{
        collections::VecDeque,
        io::{self, BufRead, BufReader, Read},
    },
};

/// Marker the payload prints right before the dump.
pub const START_MARKER: &[u8] = b"start";

/// Size of the dump produced by the payload.
pub const DUMP_SIZE: usize = 0x20000;

fn is_retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

fn end_of_stream() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "serial stream ended",
    ))
}

/// Consume the stream up to and including the first occurrence of `marker`.
///
/// Bytes after the marker stay in `reader`. Returns how many bytes preceded
/// the marker.
pub fn wait_for_marker<R: BufRead + ?Sized>(reader: &mut R, marker: &[u8]) -> Result<usize> {
    if marker.is_empty() {
        return Ok(0);
    }

    let mut window = VecDeque::with_capacity(marker.len());
    let mut seen = 0usize;

    loop {
        let available = match reader.fill_buf() {
            Ok([]) => return Err(end_of_stream()),
            Ok(buf) => buf,
            Err(e) if is_retryable(&e) => continue,
            Err(e) => return Err(e.into()),
        };

        let mut consumed = 0;
        let mut found = false;
        for &byte in available {
            consumed += 1;
            if window.len() == marker.len() {
                window.pop_front();
            }
            window.push_back(byte);
            if window.iter().eq(marker.iter()) {
                found = true;
                break;
            }
        }

        reader.consume(consumed);
        seen += consumed;

        if found {
            let skipped = seen - marker.len();
            debug!("Marker found after {skipped} bytes of noise");
            return Ok(skipped);
        }
    }
}

/// Read exactly `size` bytes, accumulating partial reads.
///
/// `progress` is called after every successful read with (bytes so far, total).
pub fn read_dump<R, F>(reader: &mut R, size: usize, mut progress: F) -> Result<Vec<u8>>
where
    R: Read + ?Sized,
    F: FnMut(usize, usize),
{
    let mut buf = vec![0u8; size];
    let mut filled = 0;

    while filled < size {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Err(end_of_stream()),
            Ok(n) => {
                filled += n;
                progress(filled, size);
            },
            Err(e) if is_retryable(&e) => {},
            Err(e) => return Err(e.into()),
        }
    }

    Ok(buf)
}

/// Wait for `marker` on `channel`, then read a `size`-byte dump.
///
/// `progress` is first called with (0, total) as soon as the marker has been
/// consumed, then as in [`read_dump`].
pub fn capture_dump<R, F>(
    channel: R,
    marker: &[u8],
    size: usize,
    mut progress: F,
) -> Result<Vec<u8>>
where
    R: Read,
    F: FnMut(usize, usize),
{
    let mut reader = BufReader::new(channel);

    debug!("Waiting for {}-byte marker", marker.len());
    wait_for_marker(&mut reader, marker)?;

    info!("Dumping {size} bytes");
    progress(0, size);
    read_dump(&mut reader, size, progress)
}
