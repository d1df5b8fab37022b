//! xmflash CLI - receive an XMODEM download into a flash image.
//!
//! ## Features
//!
//! - Receive a checksum-mode XMODEM transfer over a serial port
//! - Program each block into a file-backed flash image at a target address
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable and TOML configuration support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use xmflash::TerminalStatus;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if spinners and colors should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

mod commands;
mod config;
mod serial;

use config::Config;

/// Exit code for usage errors.
const EXIT_USAGE: i32 = 2;

/// Exit code when the user cancelled a prompt.
const EXIT_CANCELLED: i32 = 130;

/// Exit codes for failed transfers start here; the terminal status code is added.
const EXIT_TRANSFER_BASE: i32 = 10;

/// Errors that map to a specific exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or missing setup (no port, no TTY for prompts).
    #[error("{0}")]
    Usage(String),

    /// The user cancelled an interactive prompt.
    #[error("{0}")]
    Cancelled(String),

    /// The transfer ended with a non-success terminal status.
    #[error("Transfer failed ({status}): {message}")]
    Transfer {
        /// Terminal status reported by the engine.
        status: TerminalStatus,
        /// Error detail.
        message: String,
    },
}

/// xmflash - Receive XMODEM downloads into a flash image.
///
/// Environment variables:
///   XMFLASH_PORT              - Default serial port
///   XMFLASH_BAUD              - Default baud rate (default: 115200)
///   XMFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "xmflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "XMFLASH_PORT")]
    port: Option<String>,

    /// Baud rate (overrides the config file).
    #[arg(short, long, global = true, env = "XMFLASH_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "XMFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Receive an XMODEM transfer and program it into a flash image.
    Receive {
        /// Image file standing in for the target flash region.
        #[arg(short, long)]
        output: PathBuf,

        /// Destination address of the first block (default: region base).
        #[arg(short, long, value_parser = parse_hex_u32)]
        address: Option<u32>,

        /// First writable address of the flash region.
        #[arg(long, value_parser = parse_hex_u32)]
        region_base: Option<u32>,

        /// Size of the flash region in bytes.
        #[arg(long, value_parser = parse_hex_u32)]
        region_size: Option<u32>,

        /// Read every block back after programming it.
        #[arg(long)]
        verify: bool,

        /// Keep the erased (0xFF) tail after the last programmed block.
        #[arg(long)]
        keep_erased_tail: bool,

        /// Receive attempts per frame before timing out.
        #[arg(long)]
        retries: Option<u32>,

        /// Print the transfer summary as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parse hexadecimal address (supports 0x prefix and underscores).
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    // Support underscore separators like 0x00_80_00_00
    let s: String = s.chars().filter(|c| *c != '_').collect();
    u32::from_str_radix(&s, 16).map_err(|e| format!("Invalid hex address: {e}"))
}

/// Map an error to the process exit code.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<CliError>() {
        Some(CliError::Usage(_)) => EXIT_USAGE,
        Some(CliError::Cancelled(_)) => EXIT_CANCELLED,
        Some(CliError::Transfer { status, .. }) => EXIT_TRANSFER_BASE + i32::from(status.code()),
        None => 1,
    }
}

fn main() {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
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

    debug!(
        "xmflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code(&err));
    }
}

fn run(cli: &Cli) -> Result<()> {
    // Load configuration
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Receive {
            output,
            address,
            region_base,
            region_size,
            verify,
            keep_erased_tail,
            retries,
            json,
        } => {
            let args = commands::receive::ReceiveArgs {
                output: output.clone(),
                address: *address,
                region_base: *region_base,
                region_size: *region_size,
                verify: *verify,
                keep_erased_tail: *keep_erased_tail,
                retries: *retries,
                json: *json,
            };
            commands::receive::cmd_receive(cli, &mut config, &args)
        },
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}
