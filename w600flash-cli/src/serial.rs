//! Serial port and baud rate resolution.
//!
//! Explicit arguments win when they are usable; otherwise the remembered
//! preference is used, and as a last resort the user picks a port from a
//! list. Non-interactive runs never prompt.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, info, warn},
    std::io::IsTerminal,
    w600flash::{BaudProfile, BaudRate, DEFAULT_BAUD, Error, PortEnumerator, PortInfo},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialOptions {
    /// Never prompt.
    pub non_interactive: bool,
}

impl SerialOptions {
    fn can_prompt(self) -> bool {
        !self.non_interactive && std::io::stdin().is_terminal() && std::io::stderr().is_terminal()
    }
}

/// Decide which port to open.
///
/// A requested port that exists is remembered. A requested port that is
/// missing falls back to the remembered one. The result must be present on
/// the system or the run fails with [`Error::PortUnavailable`].
pub fn resolve_port<E: PortEnumerator>(
    requested: Option<&str>,
    config: &mut Config,
    options: SerialOptions,
) -> Result<String> {
    let stored = config.connection.serial.clone();

    let port = match (requested, stored) {
        (Some(name), _) if E::is_available(name) => {
            config.remember_port(name);
            name.to_string()
        },
        (Some(name), Some(stored)) => {
            warn!("Serial port {name} is not available, falling back to {stored}");
            stored
        },
        (Some(name), None) => name.to_string(),
        (None, Some(stored)) => {
            debug!("Using port from config: {stored}");
            stored
        },
        (None, None) if options.can_prompt() => {
            let name = select_port_interactive(&E::list_ports()?)?;
            config.remember_port(&name);
            name
        },
        (None, None) => {
            return Err(Error::Config(
                "no serial port given and none remembered; pass one with --port".into(),
            )
            .into());
        },
    };

    if !E::is_available(&port) {
        return Err(Error::PortUnavailable(port).into());
    }
    Ok(port)
}

/// Decide the transfer speed and remember it.
///
/// An explicit unsupported baud is an error; a remembered one is ignored.
pub fn resolve_baud(requested: Option<u32>, config: &mut Config) -> Result<u32, Error> {
    let baud = match (requested, config.connection.baud) {
        (Some(baud), _) => BaudRate::try_from(baud)?.get(),
        (None, Some(stored)) if BaudProfile::lookup(stored).is_some() => stored,
        (None, Some(stored)) => {
            warn!("Ignoring unsupported remembered baud rate {stored}");
            DEFAULT_BAUD
        },
        (None, None) => DEFAULT_BAUD,
    };
    config.remember_baud(baud);
    Ok(baud)
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".into()).into()
            } else {
                Error::Config(format!("port selection prompt failed: {io_err}")).into()
            }
        },
    }
}

/// One line per port for the selection list.
pub(crate) fn describe_port(port: &PortInfo) -> String {
    let vid_pid = match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
        _ => String::new(),
    };
    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();
    format!("{}{vid_pid}{product}", port.name)
}

/// Interactive port selection.
fn select_port_interactive(ports: &[PortInfo]) -> Result<String> {
    if ports.is_empty() {
        return Err(Error::Config("no serial ports found".into()).into());
    }

    eprintln!(
        "{} Found {} serial port(s)",
        style("ℹ").blue(),
        ports.len()
    );

    // Truncate labels to fit terminal width to prevent wrapping.
    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let items: Vec<String> = ports
        .iter()
        .map(|p| console::truncate_str(&describe_port(p), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the serial port the W600 is connected to")
        .items(&items)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection.and_then(|index| ports.get(index)) {
        Some(port) => {
            info!("Selected port: {}", port.name);
            Ok(port.name.clone())
        },
        None => Err(CliError::Cancelled("Port selection cancelled".into()).into()),
    }
}
