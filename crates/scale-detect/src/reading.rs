//! Weight reading results

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use scale_format::{round_weight, FormatTag};
use serde::{Serialize, Serializer};

use crate::params::SerialParams;

/// Which strategy produced a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadMethod {
    /// Bytes already waiting in the input buffer
    BufferDirect,
    /// Reply to one of the request commands
    Command,
    /// Data that arrived during the final settle wait
    Automatic,
    /// Recent value served from the session cache
    Cache,
    /// Connected but nothing recent to report
    NoRecentData,
}

/// A successful reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightReading {
    /// Weight rounded to three decimals
    pub weight: f64,
    /// Trimmed text the weight was extracted from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    /// Rule that matched
    pub format: FormatTag,
    /// Strategy that produced the reading
    pub method: ReadMethod,
    /// When the underlying data was received
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: SystemTime,
    /// Age of a cached value at the time it was served
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_ms: Option<u64>,
}

impl WeightReading {
    /// Reading built from freshly received data
    pub(crate) fn fresh(weight: f64, raw: String, format: FormatTag, method: ReadMethod) -> Self {
        Self {
            weight: round_weight(weight),
            raw: Some(raw),
            format,
            method,
            timestamp: SystemTime::now(),
            age_ms: None,
        }
    }

    /// Placeholder for a connected device that has sent nothing usable
    pub(crate) fn no_recent_data() -> Self {
        Self {
            weight: 0.0,
            raw: None,
            format: FormatTag::Unknown,
            method: ReadMethod::NoRecentData,
            timestamp: SystemTime::now(),
            age_ms: None,
        }
    }

    /// Whether the reading carries an actual weight
    pub fn has_weight(&self) -> bool {
        self.method != ReadMethod::NoRecentData
    }
}

/// Outcome of a successful probe
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionReport {
    /// Port the session is bound to
    pub port: String,
    /// Adopted configuration
    pub params: SerialParams,
    /// Weight read while probing, or 0.0
    pub initial_weight: f64,
    /// Whether `initial_weight` came from the device
    pub has_initial_weight: bool,
}

impl ConnectionReport {
    /// Baud rate of the adopted configuration
    pub fn detected_baud(&self) -> u32 {
        self.params.baud_rate
    }
}

/// Result of an open-read-close cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OnceReading {
    /// Port that was read
    pub port: String,
    /// Configuration that produced the weight
    pub params: SerialParams,
    /// The reading itself
    #[serde(flatten)]
    pub reading: WeightReading,
}

pub(crate) fn unix_seconds<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    let secs = time
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64();
    serializer.serialize_f64(secs)
}
