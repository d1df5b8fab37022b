//! Serial port selection.
//!
//! The port comes from, in order: the `--port` flag (or `XMFLASH_PORT`), the
//! configuration file, or the list of detected ports. With several detected
//! ports the user picks one interactively; in non-interactive mode that is a
//! usage error instead.

use {
    crate::{CliError, commands::ports::describe_port, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, error, info},
    std::{cmp::Ordering, io::IsTerminal},
    xmflash::{NativePortEnumerator, PortEnumerator, PortInfo},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail if the choice is ambiguous).
    pub non_interactive: bool,
}

/// A resolved port and how it was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedPort {
    /// Port name/path.
    pub name: String,
    /// The user picked it from a prompt.
    pub prompted: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Pick a port without a prompt: only a single candidate qualifies.
fn select_non_interactive_port(ports: Vec<PortInfo>) -> Result<SelectedPort> {
    match ports.len().cmp(&1) {
        Ordering::Equal => {
            let port = ports
                .into_iter()
                .next()
                .expect("ports has exactly 1 element here");
            Ok(SelectedPort {
                name: port.name,
                prompted: false,
            })
        },
        Ordering::Greater => Err(usage_err(
            "Multiple serial ports found; pass --port or set XMFLASH_PORT",
        )),
        Ordering::Less => Err(usage_err("No serial ports available")),
    }
}

/// Resolve the serial port to use.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(name) = &options.port {
        return Ok(SelectedPort {
            name: name.clone(),
            prompted: false,
        });
    }

    if let Some(name) = &config.connection.serial {
        debug!("Using port from config: {name}");
        return Ok(SelectedPort {
            name: name.clone(),
            prompted: false,
        });
    }

    let ports = NativePortEnumerator::list_ports()?;
    if ports.is_empty() {
        return Err(usage_err("No serial ports found"));
    }

    if options.non_interactive {
        return select_non_interactive_port(ports);
    }

    if ports.len() == 1 {
        let selected = select_non_interactive_port(ports)?;
        info!("Auto-selected port: {}", selected.name);
        return Ok(selected);
    }

    ensure_interactive_terminal()?;
    select_port_interactive(ports)
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Port selection needs an interactive terminal; pass --port instead",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                usage_err("Port selection prompt failed")
            }
        },
    }
}

fn select_port_interactive(ports: Vec<PortInfo>) -> Result<SelectedPort> {
    eprintln!(
        "{} Detected {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    // Keep labels on one line in narrow terminals
    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|p| console::truncate_str(&describe_port(p), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the serial port of the sender")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => {
            let port = ports
                .into_iter()
                .nth(index)
                .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
            Ok(SelectedPort {
                name: port.name,
                prompted: true,
            })
        },
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}

/// Offer to store a prompted port in the local config file.
pub fn ask_remember_port(selected: &SelectedPort, config: &mut Config) -> Result<()> {
    if !selected.prompted {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Remember {} for next time?", selected.name))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_port(&selected.name) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}
