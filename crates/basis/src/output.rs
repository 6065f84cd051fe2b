//! Output formatting: table, JSON, plain.
//!
//! Table uses `tabled`, structured formats use serde, plain emits one
//! identifier per line.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use crate::cli::{ColorMode, OutputFormat};

// ── Color helpers ────────────────────────────────────────────────────

pub fn should_color(mode: &ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// Green "online" / red "offline".
pub fn connectivity(connected: bool, color: bool) -> String {
    match (connected, color) {
        (true, true) => "online".green().to_string(),
        (false, true) => "offline".red().to_string(),
        (true, false) => "online".into(),
        (false, false) => "offline".into(),
    }
}

/// "standby" in yellow, "live" plain; a trailing `*` while a command is
/// unresolved.
pub fn standby(standby: bool, pending: bool, color: bool) -> String {
    let label = if standby { "standby" } else { "live" };
    let label = if color && standby {
        label.yellow().to_string()
    } else {
        label.to_owned()
    };
    if pending { format!("{label}*") } else { label }
}

pub fn watts(value: Option<f64>) -> String {
    value.map(|w| format!("{w:.0} W")).unwrap_or_default()
}

pub fn amps(value: Option<f64>) -> String {
    value.map(|a| format!("{a:.1} A")).unwrap_or_default()
}

pub fn volts(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.0} V")).unwrap_or_default()
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a list of serde-serializable + tabled items in the chosen format.
pub fn render_list<T, R>(
    format: &OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    id_fn: impl Fn(&T) -> String,
) -> String
where
    T: serde::Serialize,
    R: Tabled,
{
    match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            render_table(&rows)
        }
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Plain => data.iter().map(&id_fn).collect::<Vec<_>>().join("\n"),
    }
}

/// Render a single item. Table mode uses `detail_fn` for a key/value view.
pub fn render_single<T>(
    format: &OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
    id_fn: impl Fn(&T) -> String,
) -> String
where
    T: serde::Serialize,
{
    match format {
        OutputFormat::Table => detail_fn(data),
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Plain => id_fn(data),
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

// ── Format-specific renderers ────────────────────────────────────────

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

fn render_json<T: serde::Serialize + ?Sized>(data: &T, compact: bool) -> String {
    let rendered = if compact {
        serde_json::to_string(data)
    } else {
        serde_json::to_string_pretty(data)
    };
    rendered.unwrap_or_else(|e| format!("{{\"error\":\"serialization failed: {e}\"}}"))
}
