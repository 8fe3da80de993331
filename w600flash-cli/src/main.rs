//! w600flash CLI - Command-line tool for flashing W600 chips.
//!
//! ## Features
//!
//! - Download a firmware image through the ROM bootloader
//! - Remembered serial port and baud rate
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use w600flash::{AbortReason, BaudRate, SessionError};

mod commands;
mod config;
mod serial;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// CLI-only error classes.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation.
    #[error("{0}")]
    Usage(String),
    /// The user aborted.
    #[error("{0}")]
    Cancelled(String),
}

/// w600flash - Download firmware to W600 chips over their ROM bootloader.
///
/// Usage: w600flash [PORT] IMAGE [BAUD]
///
/// Environment variables:
///   `W600FLASH_PORT`              - Serial port
///   `W600FLASH_BAUD`              - Transfer baud rate (default: 2000000)
///   `W600FLASH_NON_INTERACTIVE`   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "w600flash")]
#[command(author, version, about, long_about = None)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// `[PORT] IMAGE [BAUD]`: one operand is the image, two are port and
    /// image, three add the baud rate.
    #[arg(value_name = "ARGS", num_args = 0..=3)]
    operands: Vec<String>,

    /// Serial port to use (remembered from the last run if omitted).
    #[arg(short, long, env = "W600FLASH_PORT")]
    port: Option<String>,

    /// Baud rate for the transfer: 115200, 460800, 921600, 1000000 or 2000000.
    #[arg(short, long, env = "W600FLASH_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, env = "W600FLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to the preference file.
    #[arg(long = "config", value_name = "PATH")]
    config_path: Option<PathBuf>,

    /// List available serial ports and exit.
    #[arg(long, conflicts_with_all = ["operands", "completions"])]
    list_ports: bool,

    /// Print a shell completion script and exit.
    #[arg(long, value_enum, value_name = "SHELL", conflicts_with = "operands")]
    completions: Option<Shell>,
}

/// What to flash, after folding operands and options together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FlashRequest {
    /// Explicitly requested port.
    pub port: Option<String>,
    /// Image file.
    pub image: PathBuf,
    /// Explicitly requested baud rate.
    pub baud: Option<u32>,
}

impl Cli {
    /// Map `[PORT] IMAGE [BAUD]` onto a request. Operands win over options.
    fn flash_request(&self) -> Result<FlashRequest, CliError> {
        let (port, image, baud) = match self.operands.as_slice() {
            [] => {
                return Err(CliError::Usage(
                    "missing firmware image (usage: w600flash [PORT] IMAGE [BAUD])".into(),
                ));
            },
            [image] => (None, image, None),
            [port, image] => (Some(port), image, None),
            [port, image, baud] => (Some(port), image, Some(baud)),
            _ => return Err(CliError::Usage("too many arguments".into())),
        };

        let baud = match baud {
            Some(b) => Some(
                b.parse::<u32>()
                    .map_err(|_| CliError::Usage(format!("invalid baud rate '{b}'")))?,
            ),
            None => self.baud,
        };

        Ok(FlashRequest {
            port: port.cloned().or_else(|| self.port.clone()),
            image: PathBuf::from(image),
            baud,
        })
    }
}

/// Exit status for a library error.
fn library_exit_code(err: &w600flash::Error) -> i32 {
    use w600flash::Error;

    match err {
        Error::Config(_) => 3,
        Error::PortUnavailable(_) => 4,
        Error::UnsupportedBaud(_) => 5,
        Error::SyncTimeout { .. } => 6,
        Error::BaudSwitchFailure(_) => 7,
        Error::TransferAborted(AbortReason::Interrupted) => 130,
        Error::TransferAborted(_) => 8,
        Error::Io(_) | Error::Serial(_) => 9,
    }
}

/// Exit status for a failed run.
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }
    if let Some(session_err) = err.downcast_ref::<SessionError>() {
        return library_exit_code(&session_err.error);
    }
    if let Some(lib_err) = err.downcast_ref::<w600flash::Error>() {
        return library_exit_code(lib_err);
    }
    1
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn install_interrupt_handler() {
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    w600flash::set_interrupt_checker(was_interrupted);
}

fn run(cli: &Cli) -> Result<()> {
    if let Some(shell) = cli.completions {
        commands::completions::cmd_completions(shell);
        return Ok(());
    }
    if cli.list_ports {
        return commands::ports::cmd_list_ports();
    }

    let request = cli.flash_request()?;

    // An explicit baud is validated before anything else happens.
    if let Some(baud) = request.baud {
        BaudRate::try_from(baud)?;
    }

    install_interrupt_handler();

    let mut config = match &cli.config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };

    commands::flash::cmd_flash(cli, &mut config, &request)
}

fn main() {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Zero arguments: usage on stdout, nothing else.
    if env::args_os().len() <= 1 {
        let _ = Cli::command().print_help();
        std::process::exit(0);
    }

    let cli = Cli::parse();
    init_logging(&cli);

    debug!(
        "w600flash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code(&err));
    }
}
