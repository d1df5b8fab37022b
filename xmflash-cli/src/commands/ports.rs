//! `list-ports` command.

use anyhow::Result;
use console::style;
use xmflash::{NativePortEnumerator, PortEnumerator, PortInfo};

/// List serial ports, as text on stderr or JSON on stdout.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let detected = NativePortEnumerator::list_ports()?;

    if json {
        println!("{}", ports_json(&detected)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports:").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &detected {
        eprintln!("  {} {}", style("•").green(), describe_port(port));
    }

    Ok(())
}

fn ports_json(ports: &[PortInfo]) -> Result<String> {
    let output = serde_json::json!({
        "ok": true,
        "data": {
            "ports": ports,
        }
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

/// One-line description: name, USB ids and product when known.
pub(crate) fn describe_port(port: &PortInfo) -> String {
    let vid_pid = match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
        _ => String::new(),
    };
    let product = port
        .product
        .as_deref()
        .filter(|p| !p.is_empty())
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{}{vid_pid}{product}", style(&port.name).cyan())
}
