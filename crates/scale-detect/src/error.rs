//! Error types for scale detection and reading

use thiserror::Error;

/// Errors that can occur while probing or reading a scale
#[derive(Debug, Error)]
pub enum DetectError {
    /// Failed to enumerate serial ports
    #[error("failed to enumerate ports: {0}")]
    EnumerationFailed(String),

    /// A candidate configuration could not open the port
    #[error("failed to open port {port}: {reason}")]
    OpenFailed { port: String, reason: String },

    /// Every candidate configuration failed to open the port
    #[error("could not connect on {port}")]
    AllCandidatesExhausted { port: String },

    /// The device stopped responding on an established session
    #[error("device on {port} disconnected: {reason}")]
    DeviceLost { port: String, reason: String },

    /// Read attempted without a live connection
    #[error("no active connection")]
    NotConnected,

    /// A single-shot read found no weight with any configuration
    #[error("could not read a weight from {port}")]
    NoReading { port: String },

    /// No enumerated port could be opened
    #[error("no scale detected on any port")]
    NoScaleDetected,
}

impl DetectError {
    /// Whether the caller has to probe again before the next read
    pub fn requires_connection(&self) -> bool {
        matches!(
            self,
            DetectError::DeviceLost { .. } | DetectError::NotConnected
        )
    }

    /// Short machine-readable category name
    pub fn kind(&self) -> &'static str {
        match self {
            DetectError::EnumerationFailed(_) => "enumeration_failed",
            DetectError::OpenFailed { .. } => "port_open_failure",
            DetectError::AllCandidatesExhausted { .. } => "all_candidates_exhausted",
            DetectError::DeviceLost { .. } => "device_lost",
            DetectError::NotConnected => "not_connected",
            DetectError::NoReading { .. } => "no_reading",
            DetectError::NoScaleDetected => "no_scale_detected",
        }
    }
}
