//! Flash command implementation.

use anyhow::{Result, anyhow};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;
use w600flash::{FirmwareImage, FlashSession, NativePortEnumerator, SessionConfig};

use crate::config::Config;
use crate::serial::{SerialOptions, resolve_baud, resolve_port};
use crate::{Cli, CliError, FlashRequest, use_fancy_output, was_interrupted};

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".into()).into())
    } else {
        Ok(())
    }
}

fn progress_bar(cli: &Cli, total: usize) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(total as u64);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

/// Flash command implementation.
pub(crate) fn cmd_flash(cli: &Cli, config: &mut Config, request: &FlashRequest) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Loading image {}",
            style("📦").cyan(),
            request.image.display()
        );
    }

    let image = FirmwareImage::from_file(&request.image)
        .map_err(|e| anyhow!("Failed to read image {}: {e}", request.image.display()))?;

    let options = SerialOptions {
        non_interactive: cli.non_interactive,
    };
    let port = resolve_port::<NativePortEnumerator>(request.port.as_deref(), config, options)?;
    let baud = resolve_baud(request.baud, config)?;

    if let Err(e) = config.save_if_changed() {
        warn!("Failed to save preferences: {e}");
    }
    ensure_not_interrupted()?;

    let session = FlashSession::new(SessionConfig::new(&port, baud))?;

    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            style(&port).green(),
            session.target()
        );
        eprintln!(
            "{} Waiting for the bootloader (reset the board if it does not respond)",
            style("⏳").yellow()
        );
    }

    let pb = progress_bar(cli, image.total_packets());
    pb.set_message("Downloading");

    let result = session.run_native(image.data(), &mut |done: usize, _total: usize| {
        pb.set_position(done as u64);
    });

    let report = match result {
        Ok(report) => report,
        Err(err) => {
            pb.abandon();
            return Err(err.into());
        },
    };
    pb.finish_with_message("Complete");

    if !report.transfer.eot_acknowledged {
        warn!("Device did not acknowledge the end of transfer");
    }

    if !cli.quiet {
        eprintln!(
            "\n{} Flashed {} bytes in {} packets ({} retransmissions)",
            style("🎉").green().bold(),
            report.transfer.bytes,
            report.transfer.packets,
            report.transfer.retransmissions
        );
    }

    Ok(())
}
