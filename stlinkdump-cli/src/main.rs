//! stlinkdump CLI - dump memory through an ST-Link/V2-1.
//!
//! Uploads a payload into the adapter's RAM through its bootloader, waits for
//! the payload to announce itself on the virtual COM port, and saves the
//! memory it streams back.
//!
//! Exit codes:
//! - `0`: dump written
//! - `1`: wrong number of arguments
//! - `2`: stack offset cannot be parsed
//! - `-1`: anything else (reported on stdout)
//!
//! The command line is exactly four positional arguments. There are no flags,
//! so arguments starting with `-` are taken as values.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use console::style;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::debug;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process;
use stlinkdump::{NativeBackend, Sequencer, Stage};

mod config;

use config::Config;

/// Number of positional arguments.
const ARG_COUNT: usize = 4;

/// Wrong argument count.
const EXIT_USAGE: i32 = 1;
/// Stack offset not a number.
const EXIT_BAD_OFFSET: i32 = 2;
/// Any other failure.
const EXIT_FAILURE: i32 = -1;

/// stlinkdump - dump memory through an ST-Link/V2-1 bootloader.
#[derive(Parser)]
#[command(name = "stlinkdump")]
#[command(about, long_about = None)]
#[command(disable_help_flag = true, disable_version_flag = true)]
struct Cli {
    /// Payload binary uploaded into the adapter's RAM.
    #[arg(value_name = "payload", allow_hyphen_values = true)]
    payload: PathBuf,

    /// Serial port the payload reports on (e.g. /dev/ttyACM0, COM3).
    #[arg(value_name = "serial_port", allow_hyphen_values = true)]
    serial_port: String,

    /// Address the payload is written to (decimal, or hex with 0x, &H or #).
    #[arg(value_name = "stack_offset", allow_hyphen_values = true)]
    stack_offset: String,

    /// File receiving the dump.
    #[arg(value_name = "output_path", allow_hyphen_values = true)]
    output_path: PathBuf,
}

/// Parse the command line.
///
/// `args` includes the program name. Anything other than exactly
/// [`ARG_COUNT`] arguments after it is a usage error; `--` and dash-prefixed
/// arguments count as ordinary values.
fn parse_args<I>(args: I) -> Option<Cli>
where
    I: IntoIterator<Item = OsString>,
{
    let mut args = args.into_iter();
    let program = args.next()?;
    let values: Vec<OsString> = args.collect();
    if values.len() != ARG_COUNT {
        return None;
    }

    // Everything after the escape is positional, including another `--`
    let argv = [program, OsString::from("--")].into_iter().chain(values);
    Cli::try_parse_from(argv).ok()
}

/// Parse a stack offset.
///
/// Accepts decimal, or hexadecimal prefixed with `0x`, `0X`, `&H`, `&h` or
/// `#`. Surrounding whitespace is ignored.
fn parse_stack_offset(s: &str) -> Option<u32> {
    let s = s.trim();
    let hex = ["0x", "0X", "&H", "&h", "#"]
        .iter()
        .find_map(|prefix| s.strip_prefix(prefix));

    match hex {
        Some(digits) => {
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
                return None;
            }
            u32::from_str_radix(digits, 16).ok()
        },
        None => s.parse().ok(),
    }
}

/// Operator-facing progress output.
struct Reporter {
    progress: Option<ProgressBar>,
    fancy: bool,
}

impl Reporter {
    fn new() -> Self {
        Self {
            progress: None,
            fancy: console::Term::stderr().is_term() && console::colors_enabled_stderr(),
        }
    }

    fn step(msg: &str) {
        println!("{}", style(msg).cyan());
    }

    fn stage(&mut self, stage: Stage) {
        match stage {
            Stage::CheckingDevice => Self::step("Checking device..."),
            Stage::RebootingToBootloader => Self::step("Rebooting to bootloader"),
            Stage::SendingPayload => Self::step("Sending payload..."),
            Stage::WaitingForMarker => Self::step("Waiting for start sequence..."),
            Stage::Dumping { received, total } => {
                let pb = self.progress.get_or_insert_with(|| {
                    Self::step("Dumping!");
                    Self::progress_bar(total, self.fancy)
                });
                pb.set_position(received as u64);
            },
        }
    }

    fn progress_bar(total: usize, fancy: bool) -> ProgressBar {
        if !fancy {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total as u64);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] \
                     {bytes}/{total_bytes} ({bytes_per_sec})",
                )
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(ProgressDrawTarget::stderr());
        pb
    }

    fn finish(&mut self) {
        if let Some(pb) = self.progress.take() {
            pb.finish_and_clear();
        }
    }
}

fn stage_name(stage: Stage) -> &'static str {
    match stage {
        Stage::CheckingDevice => "Checking device",
        Stage::RebootingToBootloader => "Rebooting to bootloader",
        Stage::SendingPayload => "Sending payload",
        Stage::WaitingForMarker => "Waiting for start sequence",
        Stage::Dumping { .. } => "Reading dump",
    }
}

fn run(cli: &Cli, stack_offset: u32) -> Result<()> {
    let payload = fs::read(&cli.payload)
        .with_context(|| format!("Failed to read payload {}", cli.payload.display()))?;
    debug!(
        "Payload: {} bytes, stack offset 0x{stack_offset:08X}",
        payload.len()
    );

    let session = Config::load().session();
    let backend = NativeBackend::new(cli.serial_port.as_str(), &session)
        .context("Failed to initialize USB")?;
    let mut sequencer = Sequencer::new(backend, session);
    debug!("Session: {:?}", sequencer.config());

    let mut reporter = Reporter::new();
    let mut last = Stage::CheckingDevice;
    let result = sequencer.run(&payload, stack_offset, |stage| {
        last = stage;
        reporter.stage(stage);
    });
    reporter.finish();
    let dump = result.with_context(|| format!("{} failed", stage_name(last)))?;

    fs::write(&cli.output_path, &dump)
        .with_context(|| format!("Failed to write dump to {}", cli.output_path.display()))?;

    println!("{}", style("Done!").green().bold());
    Ok(())
}

fn main() {
    let Some(cli) = parse_args(env::args_os()) else {
        println!("{}", Cli::command().render_usage());
        process::exit(EXIT_USAGE);
    };

    // NO_COLOR and TTY detection
    if env::var_os("NO_COLOR").is_some() {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_target(false)
        .format_timestamp(None)
        .init();

    debug!("stlinkdump v{}", env!("CARGO_PKG_VERSION"));

    let Some(stack_offset) = parse_stack_offset(&cli.stack_offset) else {
        println!("Cannot parse stack offset.");
        process::exit(EXIT_BAD_OFFSET);
    };

    if let Err(e) = run(&cli, stack_offset) {
        println!("Something went wrong: {e:#}");
        process::exit(EXIT_FAILURE);
    }
}
