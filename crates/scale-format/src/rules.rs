//! Ordered weight extraction rules
//!
//! Each rule is a regular expression whose first capture group holds the
//! numeric value, plus an optional unit conversion. A rule only looks at the
//! leftmost match in the text: if that value falls outside the weight band
//! the rule is a non-match and the next rule gets its turn.

use std::sync::OnceLock;

use regex::Regex;
use tracing::trace;

use crate::{in_band, FormatTag};

/// Shortest input worth running the rules against
const MIN_INPUT_LEN: usize = 2;

/// Raw integers above this are assumed to be grams
const GRAMS_THRESHOLD: f64 = 1000.0;

/// Conversion applied to a captured value before the band check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Use the value as captured
    None,
    /// Only accept values above 1000 and divide them by 1000
    GramsToKilograms,
}

/// A single entry in the extraction table
#[derive(Debug)]
pub struct FormatRule {
    tag: FormatTag,
    pattern: &'static str,
    conversion: Conversion,
    regex: OnceLock<Regex>,
}

impl FormatRule {
    const fn new(tag: FormatTag, pattern: &'static str, conversion: Conversion) -> Self {
        Self {
            tag,
            pattern,
            conversion,
            regex: OnceLock::new(),
        }
    }

    /// Tag reported when this rule matches
    pub fn tag(&self) -> FormatTag {
        self.tag
    }

    /// Source pattern of the rule
    pub fn pattern(&self) -> &'static str {
        self.pattern
    }

    /// Conversion applied to captured values
    pub fn conversion(&self) -> Conversion {
        self.conversion
    }

    fn regex(&self) -> &Regex {
        self.regex
            .get_or_init(|| Regex::new(self.pattern).expect("format rule patterns are valid"))
    }

    /// Apply this rule alone, returning an in-band weight if it matches
    pub fn apply(&self, text: &str) -> Option<f64> {
        let captures = self.regex().captures(text)?;
        let raw: f64 = captures.get(1)?.as_str().parse().ok()?;

        let weight = match self.conversion {
            Conversion::None => raw,
            Conversion::GramsToKilograms if raw > GRAMS_THRESHOLD => raw / 1000.0,
            Conversion::GramsToKilograms => return None,
        };

        in_band(weight).then_some(weight)
    }
}

/// Extraction rules in priority order
pub static RULES: [FormatRule; 5] = [
    FormatRule::new(
        FormatTag::Torrey,
        r"ST,GS[, ]*[+-]?[ ]*([0-9]+\.[0-9]+)",
        Conversion::None,
    ),
    FormatRule::new(FormatTag::Cas, r"[NT]([0-9]+\.?[0-9]*)", Conversion::None),
    FormatRule::new(FormatTag::Signed, r"[+-]?([0-9]+\.?[0-9]*)", Conversion::None),
    FormatRule::new(FormatTag::Simple, r"([0-9]+\.[0-9]+)", Conversion::None),
    FormatRule::new(
        FormatTag::Grams,
        r"(?:^|[^0-9.])([0-9]{3,})(?:[^0-9.]|$)",
        Conversion::GramsToKilograms,
    ),
];

/// A weight recovered from telemetry text
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightMatch {
    /// Weight in the device's displayed unit
    pub weight: f64,
    /// Rule that produced it
    pub tag: FormatTag,
}

/// Extract a weight from a raw text chunk
///
/// Returns `None` when no rule yields an in-band value; callers report that
/// case as [`FormatTag::Unknown`].
pub fn extract(text: &str) -> Option<WeightMatch> {
    if text.len() < MIN_INPUT_LEN {
        return None;
    }

    let found = RULES.iter().find_map(|rule| {
        rule.apply(text).map(|weight| WeightMatch {
            weight,
            tag: rule.tag,
        })
    });

    match &found {
        Some(m) => trace!("Extracted {} via {} from {:?}", m.weight, m.tag, text),
        None => trace!("No weight rule matched {:?}", text),
    }

    found
}
