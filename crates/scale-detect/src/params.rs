//! Serial connection parameters and the candidate probing order

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Number of data bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataBits {
    Seven,
    Eight,
}

impl DataBits {
    fn digit(self) -> char {
        match self {
            DataBits::Seven => '7',
            DataBits::Eight => '8',
        }
    }
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

/// Parity checking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl Parity {
    fn letter(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Even => serialport::Parity::Even,
            Parity::Odd => serialport::Parity::Odd,
        }
    }
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StopBits {
    One,
    Two,
}

impl StopBits {
    fn digit(self) -> char {
        match self {
            StopBits::One => '1',
            StopBits::Two => '2',
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// Parameters a serial link is opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SerialParams {
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits per character
    pub data_bits: DataBits,
    /// Parity mode
    pub parity: Parity,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Per-call read timeout
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
}

/// Timeout used by the candidate table before the caller substitutes its own
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(50);

/// Configurations tried by the prober, in priority order
pub const CANDIDATES: [SerialParams; 5] = [
    SerialParams::new(9600, DataBits::Eight, Parity::None, StopBits::One),
    SerialParams::new(9600, DataBits::Seven, Parity::Even, StopBits::One),
    SerialParams::new(2400, DataBits::Seven, Parity::Even, StopBits::One),
    SerialParams::new(4800, DataBits::Eight, Parity::None, StopBits::One),
    SerialParams::new(19200, DataBits::Eight, Parity::None, StopBits::One),
];

impl SerialParams {
    /// Create parameters with the default timeout
    pub const fn new(baud_rate: u32, data_bits: DataBits, parity: Parity, stop_bits: StopBits) -> Self {
        Self {
            baud_rate,
            data_bits,
            parity,
            stop_bits,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// 8N1 at the given baud rate
    pub const fn eight_n_one(baud_rate: u32) -> Self {
        Self::new(baud_rate, DataBits::Eight, Parity::None, StopBits::One)
    }

    /// Copy of these parameters with a different read timeout
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Framing shorthand such as `8N1`
    pub fn framing(&self) -> String {
        [
            self.data_bits.digit(),
            self.parity.letter(),
            self.stop_bits.digit(),
        ]
        .iter()
        .collect()
    }
}

impl fmt::Display for SerialParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.baud_rate, self.framing())
    }
}

/// Candidate list with the caller's timeout substituted
///
/// A known baud rate, if given, is tried as 8N1 ahead of the fixed table.
pub fn candidates(timeout: Duration, preferred_baud: Option<u32>) -> Vec<SerialParams> {
    preferred_baud
        .map(SerialParams::eight_n_one)
        .into_iter()
        .chain(CANDIDATES)
        .map(|params| params.with_timeout(timeout))
        .collect()
}

/// (De)serialize a `Duration` as whole milliseconds
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
