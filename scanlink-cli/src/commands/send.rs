//! `send`: write one command line to the scanner.

use anyhow::{Context, Result};
use console::style;
use scanlink::{NativeBackend, Scanner, ScannerConfig};
use std::sync::Arc;

use crate::{Cli, CliError};

/// Reject text that would split into several device lines.
pub(crate) fn validate_command(text: &str) -> Result<(), CliError> {
    if text.is_empty() {
        return Err(CliError::Usage("Command text must not be empty".to_string()));
    }
    if text.contains(['\r', '\n']) {
        return Err(CliError::Usage(
            "Command text must be a single line; CRLF is appended automatically".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn cmd_send(cli: &Cli, scanner_config: ScannerConfig, text: &str) -> Result<()> {
    validate_command(text)?;

    let scanner = Scanner::spawn(scanner_config, Arc::new(NativeBackend))
        .context("Failed to start scanner service")?;
    let path = scanner
        .initialize()
        .context("Failed to connect to the scanner")?;

    scanner
        .send_command(text)
        .with_context(|| format!("Failed to send command to {path}"))?;

    if !cli.quiet {
        eprintln!("{} Sent {text:?} to {}", style("✓").green(), style(&path).cyan());
    }
    scanner.disconnect();
    Ok(())
}
