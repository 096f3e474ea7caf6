//! scanlink CLI - serial QR/barcode scanner tools and registration kiosk.
//!
//! ## Features
//!
//! - List serial ports and show which scanner candidate would be used
//! - Print scans to stdout
//! - Send configuration commands to the scanner
//! - Manage registration API keys
//! - Run the registration kiosk
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};

mod clock;
mod commands;
mod config;
mod keystore;
mod prompt;
mod registration;

use commands::completions::cmd_completions;
use commands::keys::cmd_keys;
use commands::kiosk::cmd_kiosk;
use commands::list_ports::cmd_list_ports;
use commands::listen::cmd_listen;
use commands::send::cmd_send;
use config::Config;
use keystore::KeyStore;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl+C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

static INTERRUPT_HANDLER: Once = Once::new();

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl+C was pressed.
fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Route Ctrl+C to [`was_interrupted`]. A second Ctrl+C exits immediately.
fn install_interrupt_handler() -> Result<()> {
    let mut result = Ok(());
    INTERRUPT_HANDLER.call_once(|| {
        result = ctrlc::set_handler(|| {
            if INTERRUPTED.swap(true, Ordering::Relaxed) {
                std::process::exit(130);
            }
        });
    });
    result.map_err(|e| anyhow::anyhow!("Failed to install Ctrl+C handler: {e}"))
}

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or missing setup.
    #[error("{0}")]
    Usage(String),
    /// The user aborted a prompt.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    pub(crate) fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Cancelled(_) => 130,
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<CliError>().map_or(1, CliError::exit_code)
}

/// scanlink - serial QR/barcode scanner tools and registration kiosk.
///
/// Environment variables:
///   SCANLINK_PORT              - Scanner device path
///   SCANLINK_KEY               - API key (id or name) for the kiosk
///   SCANLINK_DATA_DIR          - Directory holding keys.json
///   SCANLINK_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "scanlink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Scanner device path (auto-detected if not specified).
    #[arg(short, long, global = true, env = "SCANLINK_PORT")]
    port: Option<String>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "SCANLINK_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    /// Directory holding the API key store.
    #[arg(long, global = true, env = "SCANLINK_DATA_DIR", value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List serial ports and scanner candidates.
    ListPorts {
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },

    /// Print every scan to stdout until Ctrl+C.
    Listen {
        /// Prefix each scan with the time it completed.
        #[arg(long)]
        timestamp: bool,
    },

    /// Send one command line to the scanner (CRLF is appended).
    Send {
        /// Command text.
        text: String,
    },

    /// Manage registration API keys.
    Keys {
        #[command(subcommand)]
        action: KeysCommand,
    },

    /// Register participants from scanned QR codes.
    Kiosk {
        /// API key to use, by id or name.
        #[arg(short, long, env = "SCANLINK_KEY")]
        key: Option<String>,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (detected from $SHELL if omitted).
        #[arg(value_enum)]
        shell: Option<Shell>,
    },
}

/// API key management commands.
#[derive(Subcommand)]
enum KeysCommand {
    /// List stored keys, newest first.
    List {
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
        /// Show full key values instead of masked ones.
        #[arg(long)]
        show_values: bool,
    },

    /// Store a new key.
    Add {
        /// Label for the key.
        name: String,
        /// Bearer token value.
        value: String,
    },

    /// Delete a key by id.
    Remove {
        /// Key id.
        id: u64,
    },
}

impl Cli {
    /// Whether stdout carries machine-readable output.
    fn json_output(&self) -> bool {
        matches!(
            self.command,
            Commands::ListPorts { json: true }
                | Commands::Keys {
                    action: KeysCommand::List { json: true, .. }
                }
        )
    }

    fn log_level(&self) -> &'static str {
        if self.json_output() {
            return "error";
        }
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

fn init_logging(cli: &Cli) {
    env_logger::Builder::from_env(Env::default().default_filter_or(cli.log_level()))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn main() {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code_for(&err));
    }
}

fn run(cli: &Cli) -> Result<()> {
    debug!(
        "scanlink v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    let config = match &cli.config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };
    let scanner_config = config.scanner_config(cli.port.as_deref());

    match &cli.command {
        Commands::ListPorts { json } => cmd_list_ports(&scanner_config, *json),
        Commands::Listen { timestamp } => cmd_listen(cli, scanner_config, *timestamp),
        Commands::Send { text } => cmd_send(cli, scanner_config, text),
        Commands::Keys { action } => {
            let mut store = KeyStore::open_in(cli.data_dir.as_deref())?;
            cmd_keys(&mut store, action, cli.quiet)
        },
        Commands::Kiosk { key } => {
            let mut store = KeyStore::open_in(cli.data_dir.as_deref())?;
            cmd_kiosk(cli, &config, &mut store, key.as_deref())
        },
        Commands::Completions { shell } => cmd_completions(*shell),
    }
}
