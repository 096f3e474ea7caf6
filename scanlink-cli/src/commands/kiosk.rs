//! `kiosk`: register participants from scanned QR codes.
//!
//! One scan triggers one registration request. Scans arriving while a
//! request is in flight or its result is on screen are dropped.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info, warn};
use scanlink::{NativeBackend, Scanner, ScannerConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::keystore::{ApiKey, KeyStore};
use crate::prompt::{choose_key, confirm_reconnect};
use crate::registration::{Participant, RegistrationClient, RegistrationError};
use crate::{Cli, CliError, install_interrupt_handler, use_fancy_output, was_interrupted};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome line shown for one registration.
pub(crate) fn outcome_message(outcome: &Result<Participant, RegistrationError>) -> String {
    match outcome {
        Ok(p) => format!("Registration successful: {} {}", p.first_name, p.last_name),
        Err(e) => format!("Registration failed: {e}"),
    }
}

pub(crate) fn cmd_kiosk(
    cli: &Cli,
    config: &Config,
    store: &mut KeyStore,
    key_selector: Option<&str>,
) -> Result<()> {
    let selector = key_selector.or(config.kiosk.key.as_deref());
    let key = choose_key(store, selector, cli.non_interactive)?;
    let client = RegistrationClient::new(config.request_timeout())
        .context("Failed to build HTTP client")?;

    install_interrupt_handler()?;
    let scanner = Scanner::start(config.scanner_config(cli.port.as_deref()), Arc::new(NativeBackend))
        .context("Failed to start scanner service")?;
    ensure_connected(cli, &scanner)?;

    let busy = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel::<String>();
    {
        let busy = Arc::clone(&busy);
        scanner.on_scan(move |scan| {
            if busy.swap(true, Ordering::AcqRel) {
                debug!("Ignoring scan while a registration is in progress");
                return Ok(());
            }
            tx.send(scan.to_string()).map_err(Into::into)
        });
    }

    show_ready(cli, &key);
    while !was_interrupted() {
        let scan = match rx.recv_timeout(POLL_INTERVAL) {
            Ok(scan) => scan,
            Err(RecvTimeoutError::Timeout) => {
                if !scanner.connection_status() {
                    warn!("Scanner disconnected");
                    ensure_connected(cli, &scanner)?;
                    show_ready(cli, &key);
                }
                continue;
            },
            Err(RecvTimeoutError::Disconnected) => break,
        };

        info!("Scanned {scan:?}");
        let spinner = spinner(cli.quiet, "Registering...");
        let outcome = client.register(&scan, &key.value);
        spinner.finish_and_clear();

        let message = outcome_message(&outcome);
        match &outcome {
            Ok(_) => println!("{} {message}", style("✓").green().bold()),
            Err(e) => {
                warn!("Registration for {scan:?} failed: {e}");
                println!("{} {message}", style("✗").red().bold());
            },
        }

        hold(config.result_display());
        busy.store(false, Ordering::Release);
        show_ready(cli, &key);
    }

    info!("Kiosk stopped");
    scanner.remove_scan_listener();
    scanner.disconnect();
    Ok(())
}

/// Block until the scanner is connected, offering reconnects interactively.
fn ensure_connected(cli: &Cli, scanner: &Scanner) -> Result<()> {
    while !scanner.connection_status() {
        if cli.non_interactive {
            return Err(CliError::Usage(
                "Scanner not connected; check the device and --port".to_string(),
            )
            .into());
        }
        if !confirm_reconnect("Scanner not connected")? {
            return Err(CliError::Cancelled("Scanner not connected".to_string()).into());
        }

        let spinner = spinner(cli.quiet, "Reconnecting...");
        let report = scanner.reconnect();
        spinner.finish_and_clear();

        if report.success {
            eprintln!("{} Scanner reconnected", style("✓").green());
        } else {
            eprintln!(
                "{} Reconnect failed: {}",
                style("✗").red(),
                report.error.as_deref().unwrap_or("scanner not connected")
            );
        }
    }
    Ok(())
}

fn show_ready(cli: &Cli, key: &ApiKey) {
    if !cli.quiet {
        eprintln!(
            "{} Ready to scan {}",
            style("▶").cyan(),
            style(format!("(key: {}, Ctrl+C to stop)", key.name)).dim()
        );
    }
}

// Keep the result visible, but stay responsive to Ctrl+C.
fn hold(duration: Duration) {
    let until = Instant::now() + duration;
    while !was_interrupted() {
        let now = Instant::now();
        if now >= until {
            break;
        }
        thread::sleep((until - now).min(POLL_INTERVAL));
    }
}

fn spinner(quiet: bool, message: &'static str) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
