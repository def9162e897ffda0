//! CLI subcommands. Each drives the service in-process and prints JSON lines.

pub mod cache;
pub mod install;
pub mod locks;
pub mod resolve;

use std::io::Write;

use anyhow::{Context, Result};
use lockstep_schema::{Diagnostic, Severity};
use serde::Serialize;

/// Write one value as a line of JSON on stdout.
pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let line = serde_json::to_string(value).context("Failed to encode output")?;
    let mut out = std::io::stdout().lock();
    writeln!(out, "{line}").context("Failed to write output")?;
    Ok(())
}

/// Print diagnostics to stderr, returning whether any were errors.
pub(crate) fn report_diagnostics(diags: &[Diagnostic]) -> bool {
    for diag in diags {
        let level = match diag.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        eprintln!("{level}: {}\n  {}", diag.summary, diag.detail);
    }
    diags.iter().any(Diagnostic::is_error)
}
