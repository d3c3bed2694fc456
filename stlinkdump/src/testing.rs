//! In-memory doubles shared by the unit tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{Command, Opcode};
use crate::stlink::Delay;
use crate::transport::Transport;

/// One observable step of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    DeviceAcquired,
    DeviceReleased,
    SerialOpened,
    Write(Vec<u8>),
    Exchange(Command),
    Delay(Duration),
}

/// Ordered log shared between the doubles of one test.
pub(crate) type Journal = Rc<RefCell<Vec<Event>>>;

pub(crate) fn journal() -> Journal {
    Rc::new(RefCell::new(Vec::new()))
}

/// Transport that records traffic and answers from canned replies.
pub(crate) struct MockTransport {
    journal: Journal,
    mode: u16,
    status: Vec<u8>,
    fail_writes_after: Option<usize>,
    writes: usize,
}

impl MockTransport {
    pub(crate) fn new(journal: Journal, mode: u16) -> Self {
        journal.borrow_mut().push(Event::DeviceAcquired);
        Self {
            journal,
            mode,
            status: vec![0x00, 0x64, 0x00, 0x00, 0x05, 0x00],
            fail_writes_after: None,
            writes: 0,
        }
    }

    pub(crate) fn with_status(mut self, status: Vec<u8>) -> Self {
        self.status = status;
        self
    }

    pub(crate) fn fail_writes_after(mut self, count: usize) -> Self {
        self.fail_writes_after = Some(count);
        self
    }

    fn count_write(&mut self) -> Result<()> {
        if self.fail_writes_after == Some(self.writes) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "device unplugged",
            )));
        }
        self.writes += 1;
        Ok(())
    }
}

impl Transport for MockTransport {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.count_write()?;
        self.journal.borrow_mut().push(Event::Write(data.to_vec()));
        Ok(())
    }

    fn write_and_read(&mut self, command: &Command) -> Result<Vec<u8>> {
        self.count_write()?;
        self.journal.borrow_mut().push(Event::Exchange(*command));
        if command.opcode() == Opcode::GetMode as u8 {
            Ok(self.mode.to_le_bytes().to_vec())
        } else {
            Ok(self.status.clone())
        }
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.journal.borrow_mut().push(Event::DeviceReleased);
    }
}

/// Delay that records instead of sleeping.
pub(crate) struct RecordingDelay {
    journal: Journal,
}

impl RecordingDelay {
    pub(crate) fn new(journal: Journal) -> Self {
        Self { journal }
    }
}

impl Delay for RecordingDelay {
    fn delay(&mut self, duration: Duration) {
        self.journal.borrow_mut().push(Event::Delay(duration));
    }
}

/// Serial stream that hands out its data in fixed-size pieces.
///
/// Unlike `Cursor<Vec<u8>>`, each read returns at most the next scripted
/// fragment length, and `TimedOut` errors can be interleaved.
pub(crate) struct FragmentedSerial {
    data: VecDeque<u8>,
    fragments: VecDeque<Fragment>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Fragment {
    Bytes(usize),
    TimedOut,
}

impl FragmentedSerial {
    pub(crate) fn new(data: &[u8], fragments: &[Fragment]) -> Self {
        Self {
            data: data.iter().copied().collect(),
            fragments: fragments.iter().copied().collect(),
        }
    }
}

impl io::Read for FragmentedSerial {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = match self.fragments.pop_front() {
            Some(Fragment::TimedOut) => {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            },
            Some(Fragment::Bytes(n)) => n,
            None => usize::MAX,
        };
        let n = buf.len().min(limit).min(self.data.len());
        for (dst, src) in buf.iter_mut().zip(self.data.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl Port for FragmentedSerial {
    fn name(&self) -> &str {
        "mock"
    }

    fn baud_rate(&self) -> u32 {
        crate::port::DEFAULT_BAUD
    }

    fn timeout(&self) -> Duration {
        crate::port::DEFAULT_POLL_TIMEOUT
    }
}
