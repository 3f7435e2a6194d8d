pub mod completions;
pub mod man_pages;
pub mod prepare;
pub mod verify;

use berth_core::{CoreError, ValidationReport};
use berth_schema::{load_application, load_environment, ApplicationDescription, EnvironmentDescription};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_DESCRIPTOR_ERROR: u8 = 2;
pub const EXIT_VALIDATION_FAILED: u8 = 3;

pub fn json_pretty(value: &impl Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finish(pb: &ProgressBar, msg: String) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(msg);
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✗ {msg}"));
}

pub fn colorize_status(status: &str) -> String {
    use console::Style;
    match status {
        "ok" | "valid" | "written" => Style::new().green().apply_to(status).to_string(),
        "invalid" | "failed" => Style::new().red().bold().apply_to(status).to_string(),
        other => other.to_owned(),
    }
}

pub fn load_app(dir: &Path) -> Result<ApplicationDescription, String> {
    load_application(dir).map_err(|e| format!("descriptor error: {e}"))
}

pub fn load_env(path: &Path) -> Result<EnvironmentDescription, String> {
    load_environment(path).map_err(|e| format!("descriptor error: {e}"))
}

#[derive(Debug, Serialize)]
pub struct ErrorEntry {
    pub kind: berth_core::ErrorKind,
    pub message: String,
}

pub fn error_entries(report: &ValidationReport) -> Vec<ErrorEntry> {
    report
        .iter()
        .map(|e| ErrorEntry {
            kind: e.kind(),
            message: e.to_string(),
        })
        .collect()
}

/// Print every violation of a failed deployment to stderr.
pub fn print_report(report: &ValidationReport) {
    eprintln!(
        "{} deployment '{}': {} error(s)",
        colorize_status("invalid"),
        report.deployment,
        report.len()
    );
    for err in report {
        eprintln!("  - {err}");
    }
}

/// Map a core error that is not a validation failure to a CLI message.
pub fn describe(err: &CoreError) -> String {
    match err {
        CoreError::Descriptor(e) => format!("descriptor error: {e}"),
        other => other.to_string(),
    }
}

/// Exit code for an error message produced by a command.
pub fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with("descriptor error:") {
        EXIT_DESCRIPTOR_ERROR
    } else {
        EXIT_FAILURE
    }
}
