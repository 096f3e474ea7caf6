//! `list-ports`: enumerated serial ports and scanner candidate status.

use anyhow::{Context, Result};
use console::style;
use log::warn;
use scanlink::{
    CandidateStatus, DeviceSelection, NativeBackend, PortInfo, ScannerConfig, SelectionSource,
    SerialBackend, select_device, survey_candidates,
};
use serde::Serialize;

#[derive(Serialize)]
struct PortReport {
    ports: Vec<PortInfo>,
    candidates: Vec<CandidateStatus>,
    selected: DeviceSelection,
}

fn build_report(backend: &dyn SerialBackend, scanner: &ScannerConfig) -> PortReport {
    let ports = backend.list_ports().unwrap_or_else(|e| {
        warn!("Could not list serial ports: {e}");
        Vec::new()
    });
    PortReport {
        candidates: survey_candidates(backend, &scanner.candidates, &ports),
        selected: select_device(backend, scanner),
        ports,
    }
}

pub(crate) fn cmd_list_ports(scanner: &ScannerConfig, json: bool) -> Result<()> {
    let report = build_report(&NativeBackend, scanner);

    if json {
        let out = serde_json::to_string_pretty(&report).context("Failed to encode port list")?;
        println!("{out}");
        return Ok(());
    }

    eprintln!("{}", style("Serial ports").bold().underlined());
    if report.ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
    }
    for port in &report.ports {
        let vid_pid = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
            _ => String::new(),
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();
        eprintln!(
            "  {} {}{vid_pid}{product}",
            style("•").green(),
            style(&port.name).cyan()
        );
    }

    eprintln!();
    eprintln!("{}", style("Scanner candidates").bold().underlined());
    for candidate in &report.candidates {
        let mark = if candidate.enumerated || candidate.exists {
            style("✓").green()
        } else {
            style("✗").red()
        };
        let detail = match (candidate.enumerated, candidate.exists) {
            (true, _) => "enumerated",
            (false, true) => "present",
            (false, false) => "missing",
        };
        eprintln!("  {mark} {} {}", candidate.path, style(detail).dim());
    }

    let source = match report.selected.source {
        SelectionSource::Configured => "configured",
        SelectionSource::Enumerated => "enumerated",
        SelectionSource::Filesystem => "found on filesystem",
        SelectionSource::Fallback => "fallback, may not work",
    };
    eprintln!(
        "\n{} Scanner port: {} ({source})",
        style("→").green().bold(),
        style(&report.selected.path).cyan().bold()
    );
    Ok(())
}
