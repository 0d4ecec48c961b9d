//! JSON lines written to stdout

use std::io::{self, Write};

use scale_detect::{ConnectionReport, DetectError};
use serde::Serialize;

/// A successful result, with `body` flattened next to `"success": true`
#[derive(Debug, Serialize)]
pub struct Success<T> {
    success: bool,
    #[serde(flatten)]
    body: T,
}

impl<T: Serialize> Success<T> {
    pub fn new(body: T) -> Self {
        Self { success: true, body }
    }
}

/// A failed result
#[derive(Debug, Serialize)]
pub struct Failure {
    success: bool,
    error: String,
    kind: &'static str,
    requires_connection: bool,
}

impl Failure {
    /// Failure not tied to an engine error, such as a missing argument
    pub fn message(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            kind: "usage",
            requires_connection: false,
        }
    }
}

impl From<&DetectError> for Failure {
    fn from(e: &DetectError) -> Self {
        Self {
            success: false,
            error: e.to_string(),
            kind: e.kind(),
            requires_connection: e.requires_connection(),
        }
    }
}

/// Connection outcome of a probe
#[derive(Serialize)]
pub struct Connected<'a> {
    port: &'a str,
    params: String,
    detected_baud: u32,
    initial_weight: f64,
    has_initial_weight: bool,
}

impl<'a> From<&'a ConnectionReport> for Connected<'a> {
    fn from(report: &'a ConnectionReport) -> Self {
        Self {
            port: &report.port,
            params: report.params.to_string(),
            detected_baud: report.detected_baud(),
            initial_weight: report.initial_weight,
            has_initial_weight: report.has_initial_weight,
        }
    }
}

/// Write `line` as one JSON line and flush
pub fn emit<W: Write + ?Sized, T: Serialize>(out: &mut W, line: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *out, line)?;
    writeln!(out)?;
    out.flush()
}
