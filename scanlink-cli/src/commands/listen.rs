//! `listen`: print every completed scan to stdout.

use anyhow::{Context, Result};
use console::style;
use log::{debug, warn};
use scanlink::{ConnectionState, NativeBackend, Scanner, ScannerConfig};
use std::io::{self, Write as _};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use crate::clock::now_time_of_day;
use crate::{Cli, install_interrupt_handler, was_interrupted};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Format one scan line for output.
pub(crate) fn format_scan(scan: &str, timestamp: Option<&str>) -> String {
    match timestamp {
        Some(ts) => format!("[{ts}] {scan}"),
        None => scan.to_string(),
    }
}

pub(crate) fn cmd_listen(cli: &Cli, scanner_config: ScannerConfig, timestamp: bool) -> Result<()> {
    install_interrupt_handler()?;

    let scanner = Scanner::spawn(scanner_config, Arc::new(NativeBackend))
        .context("Failed to start scanner service")?;
    let path = scanner
        .initialize()
        .context("Failed to connect to the scanner")?;

    let (tx, rx) = mpsc::channel::<String>();
    scanner.on_scan(move |scan| tx.send(scan.to_string()).map_err(Into::into));

    if !cli.quiet {
        eprintln!(
            "{} Listening on {} {}",
            style("📡").cyan(),
            style(&path).green(),
            style("(Ctrl+C to stop)").dim()
        );
    }

    let mut stdout = io::stdout().lock();
    let mut reported_error = false;
    while !was_interrupted() {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(scan) => {
                let ts = timestamp.then(now_time_of_day);
                writeln!(stdout, "{}", format_scan(&scan, ts.as_deref()))?;
                stdout.flush()?;
            },
            Err(RecvTimeoutError::Timeout) => {
                let state = scanner.state();
                if state == ConnectionState::Error && !reported_error {
                    warn!("Scanner on {path} reported an error; waiting for further data");
                }
                reported_error = state == ConnectionState::Error;
                if !scanner.connection_status() {
                    anyhow::bail!("Scanner on {path} disconnected");
                }
            },
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!("Stopping listener");
    scanner.remove_scan_listener();
    scanner.disconnect();
    Ok(())
}
