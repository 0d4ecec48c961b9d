//! Scale Telemetry Format Library
//!
//! This crate recovers a numeric weight from the raw ASCII output of serial
//! weighing scales whose protocol is not known in advance. Several common
//! output styles are recognised:
//!
//! - **Torrey**: `ST,GS,001.500,kg` stable gross-weight frames
//! - **CAS**: a `N` (net) or `T` (tare) letter followed by the value
//! - **Signed**: a bare number with an optional `+`/`-` prefix
//! - **Simple**: any `digits.digits` token
//! - **Grams**: a large integer with no decimal point, rescaled to kilograms
//!
//! # Architecture
//!
//! The formats are an ordered table of [`FormatRule`]s. Extraction walks the
//! table and the first rule producing a value inside [`WEIGHT_BAND`] wins, so
//! the priority order lives in data and each rule can be exercised alone.
//!
//! # Example
//!
//! ```rust
//! use scale_format::{extract, FormatTag};
//!
//! let found = extract("ST,GS,001.500,kg\r\n").unwrap();
//! assert_eq!(found.tag, FormatTag::Torrey);
//! assert_eq!(found.weight, 1.5);
//!
//! assert!(extract("garbage\r\n").is_none());
//! ```

pub mod rules;

use std::fmt;
use std::ops::RangeInclusive;

pub use rules::{extract, Conversion, FormatRule, WeightMatch, RULES};

/// Accepted weight magnitudes, in the unit the device displays
///
/// Values outside the band are treated as spurious digit runs (framing bytes,
/// device IDs) rather than weights.
pub const WEIGHT_BAND: RangeInclusive<f64> = 0.001..=1000.0;

/// Identifies which parsing rule produced a weight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum FormatTag {
    /// `ST,GS` framed readings
    Torrey,
    /// `N`/`T` prefixed readings
    Cas,
    /// Numbers with an optional sign
    Signed,
    /// Plain decimal numbers
    Simple,
    /// Large integers interpreted as grams
    Grams,
    /// Value served from the session cache rather than fresh data
    Cache,
    /// No rule matched
    Unknown,
}

impl FormatTag {
    /// Returns the short lowercase tag used in output lines
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatTag::Torrey => "torrey",
            FormatTag::Cas => "cas",
            FormatTag::Signed => "signed",
            FormatTag::Simple => "simple",
            FormatTag::Grams => "grams",
            FormatTag::Cache => "cache",
            FormatTag::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns true if `weight` is a plausible reading
pub fn in_band(weight: f64) -> bool {
    WEIGHT_BAND.contains(&weight)
}

/// Decode raw serial bytes, silently dropping anything that is not ASCII
pub fn decode_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .filter(|b| b.is_ascii())
        .map(|&b| b as char)
        .collect()
}

/// Round a weight to three decimal places (gram resolution for kilograms)
pub fn round_weight(weight: f64) -> f64 {
    (weight * 1000.0).round() / 1000.0
}
