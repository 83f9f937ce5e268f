//! Output formatting utilities for the CLI
//!
//! Tables for check results and clients, JSON output, and colored status
//! lines.

use anyhow::Result;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};
use vw_core::{CheckResult, ClientInfo};

/// Format check results as a table
pub fn format_checks(checks: &[CheckResult]) -> String {
    #[derive(Tabled)]
    struct CheckRow {
        #[tabled(rename = "CHECK")]
        name: String,
        #[tabled(rename = "RESULT")]
        result: &'static str,
        #[tabled(rename = "DETAILS")]
        details: String,
    }

    let rows: Vec<CheckRow> = checks
        .iter()
        .map(|c| CheckRow {
            name: c.name.clone(),
            result: if c.ok { "ok" } else { "FAIL" },
            details: c.details.clone(),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format clients as a table
///
/// Returns "No clients configured" when the list is empty.
pub fn format_clients(clients: &[ClientInfo]) -> String {
    if clients.is_empty() {
        return "No clients configured".to_string();
    }

    #[derive(Tabled)]
    struct ClientRow {
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "ADDRESS")]
        address: String,
        #[tabled(rename = "INTERFACE")]
        interface: String,
        #[tabled(rename = "ENDPOINT")]
        endpoint: String,
        #[tabled(rename = "HANDSHAKE")]
        handshake: String,
        #[tabled(rename = "RX")]
        rx: String,
        #[tabled(rename = "TX")]
        tx: String,
    }

    let dash = || "-".to_string();
    let rows: Vec<ClientRow> = clients
        .iter()
        .map(|c| ClientRow {
            name: c.name.clone(),
            address: c.address.clone(),
            interface: c.interface.clone(),
            endpoint: c.endpoint.clone().unwrap_or_else(dash),
            handshake: c.latest_handshake.clone().unwrap_or_else(dash),
            rx: c.transfer_rx.clone().unwrap_or_else(dash),
            tx: c.transfer_tx.clone().unwrap_or_else(dash),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Print a value as pretty JSON on stdout
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr.
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow
///
/// Outputs to stderr.
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
