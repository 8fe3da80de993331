//! Port listing.

use anyhow::Result;
use console::style;
use w600flash::{NativePortEnumerator, PortEnumerator};

use crate::serial::describe_port;

/// List ports command implementation.
///
/// Port names go to stdout, one per line; decoration goes to stderr.
pub(crate) fn cmd_list_ports() -> Result<()> {
    let ports = NativePortEnumerator::list_ports()?;

    eprintln!("{}", style("Available serial ports").bold().underlined());
    if ports.is_empty() {
        eprintln!("  {}", style("(none)").dim());
    }
    for port in &ports {
        println!("{}", describe_port(port));
    }
    Ok(())
}
