//! `receive` command: run an XMODEM download into a flash image file.

use anyhow::{Context, Result};
use console::style;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use log::{debug, warn};
use std::path::PathBuf;
use std::time::Duration;
use xmflash::{
    FlashRegion, ImageFile, NativePort, Port, ProgramSink, Progress, TerminalStatus,
    TransferSummary, XmodemConfig, XmodemReceiver,
};

use crate::config::Config;
use crate::serial::{SerialOptions, ask_remember_port, select_serial_port};
use crate::{Cli, CliError, use_fancy_output};

/// Baud rate when neither the CLI nor the config names one.
pub(crate) const DEFAULT_BAUD: u32 = 115_200;

/// Region base when neither the CLI nor the config names one.
pub(crate) const DEFAULT_REGION_BASE: u32 = 0;

/// Region size when neither the CLI nor the config names one (1 MiB).
pub(crate) const DEFAULT_REGION_SIZE: u32 = 0x0010_0000;

/// Arguments of the `receive` subcommand.
#[derive(Debug, Clone, Default)]
pub(crate) struct ReceiveArgs {
    pub output: PathBuf,
    pub address: Option<u32>,
    pub region_base: Option<u32>,
    pub region_size: Option<u32>,
    pub verify: bool,
    pub keep_erased_tail: bool,
    pub retries: Option<u32>,
    pub json: bool,
}

/// Everything a download needs, after CLI and config are combined.
#[derive(Debug, Clone)]
pub(crate) struct ReceiveSettings {
    pub region: FlashRegion,
    pub address: u32,
    pub baud: u32,
    pub verify: bool,
    pub engine: XmodemConfig,
}

impl ReceiveSettings {
    /// Combine CLI arguments (which win) with the loaded config.
    pub(crate) fn resolve(args: &ReceiveArgs, cli_baud: Option<u32>, config: &Config) -> Self {
        let base = args
            .region_base
            .or(config.target.base)
            .unwrap_or(DEFAULT_REGION_BASE);
        let size = args
            .region_size
            .or(config.target.size)
            .unwrap_or(DEFAULT_REGION_SIZE);

        let mut engine = config.xmodem.to_engine_config();
        if let Some(retries) = args.retries {
            engine.max_retries = retries;
        }

        Self {
            region: FlashRegion::new(base, size),
            address: args.address.unwrap_or(base),
            baud: cli_baud.or(config.connection.baud).unwrap_or(DEFAULT_BAUD),
            verify: args.verify || config.target.verify,
            engine,
        }
    }
}

fn transfer_err(status: TerminalStatus, message: impl Into<String>) -> anyhow::Error {
    CliError::Transfer {
        status,
        message: message.into(),
    }
    .into()
}

/// Receive command implementation.
pub(crate) fn cmd_receive(cli: &Cli, config: &mut Config, args: &ReceiveArgs) -> Result<()> {
    let settings = ReceiveSettings::resolve(args, cli.baud, config);
    debug!("Receive settings: {settings:?}");

    // Destination check comes before any I/O
    if let Err(e) = settings.region.validate_destination(settings.address) {
        if args.json {
            println!("{}", failure_json(TerminalStatus::AddressError, &e.to_string())?);
        }
        return Err(transfer_err(TerminalStatus::AddressError, e.to_string()));
    }

    let selected = select_serial_port(
        &SerialOptions {
            port: cli.port.clone(),
            non_interactive: cli.non_interactive,
        },
        config,
    )?;
    if !cli.non_interactive {
        ask_remember_port(&selected, config)?;
    }

    let mut port = NativePort::open_simple(&selected.name, settings.baud).map_err(|e| {
        transfer_err(
            TerminalStatus::CommsError,
            format!("cannot open {}: {e}", selected.name),
        )
    })?;

    let mut image = ImageFile::create(&args.output, settings.region)
        .with_context(|| format!("Failed to create image {}", args.output.display()))?
        .with_verify(settings.verify);

    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            selected.name,
            settings.baud
        );
        eprintln!(
            "{} Waiting for sender, programming from {:#010x}",
            style("⏳").yellow(),
            settings.address
        );
    }

    let pb = progress_bar(cli.quiet);
    let result = receive_into(&mut port, &mut image, &settings, |p: &Progress| {
        pb.set_position(p.bytes_written);
        pb.set_message(format!("block {} @ {:#010x}", p.block, p.address));
    });
    let status = TerminalStatus::from_result(&result);

    // Keep whatever was committed, even after a failure
    let image_len = image
        .finish(!args.keep_erased_tail)
        .with_context(|| format!("Failed to finish image {}", args.output.display()))?;

    match result {
        Ok(summary) => {
            pb.finish_and_clear();
            report_success(cli, args, &summary, image_len)
        },
        Err(e) => {
            pb.abandon();
            if let Some(blocks) = e.blocks_written() {
                warn!("{blocks} blocks were committed before the transfer stopped");
            }
            if args.json {
                println!("{}", failure_json(status, &e.to_string())?);
            }
            Err(transfer_err(status, e.to_string()))
        },
    }
}

/// Run one download over `port`, starting from an empty receive buffer.
///
/// Bytes left in the UART from before the kick-off NAK would otherwise be
/// read as a broken first frame.
fn receive_into<P, S, F>(
    port: &mut P,
    sink: &mut S,
    settings: &ReceiveSettings,
    progress: F,
) -> xmflash::Result<TransferSummary>
where
    P: Port + ?Sized,
    S: ProgramSink + ?Sized,
    F: FnMut(&Progress),
{
    debug!("Clearing buffers on {}", port.name());
    port.clear_buffers()?;

    let mut receiver = XmodemReceiver::with_config(port, sink, settings.engine.clone());
    let result = receiver.download_and_program_with_progress(settings.address, progress);
    debug!("Receiver ended in {:?} state", receiver.state());
    result
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {bytes} received {msg}")
            .unwrap(),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn report_success(
    cli: &Cli,
    args: &ReceiveArgs,
    summary: &TransferSummary,
    image_len: u64,
) -> Result<()> {
    if args.json {
        println!("{}", success_json(summary, args, image_len)?);
        return Ok(());
    }

    if !cli.quiet {
        eprintln!(
            "{} Programmed {} ({} blocks) at {:#010x}..{:#010x}",
            style("✓").green(),
            HumanBytes(summary.bytes_written),
            summary.blocks_written,
            summary.base_address,
            summary.end_address
        );
        if summary.duplicates > 0 || summary.rejected > 0 {
            eprintln!(
                "    {} {} resent, {} rejected",
                style("•").dim(),
                summary.duplicates,
                summary.rejected
            );
        }
        eprintln!(
            "{} Image written to {} ({})",
            style("🎉").green().bold(),
            args.output.display(),
            HumanBytes(image_len)
        );
    }
    Ok(())
}

fn success_json(summary: &TransferSummary, args: &ReceiveArgs, image_len: u64) -> Result<String> {
    let output = serde_json::json!({
        "ok": true,
        "data": {
            "status": TerminalStatus::Success,
            "code": TerminalStatus::Success.code(),
            "summary": summary,
            "output": args.output.display().to_string(),
            "image_len": image_len,
        }
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

fn failure_json(status: TerminalStatus, message: &str) -> Result<String> {
    let output = serde_json::json!({
        "ok": false,
        "error": {
            "status": status,
            "code": status.code(),
            "message": message,
        }
    });
    Ok(serde_json::to_string_pretty(&output)?)
}
