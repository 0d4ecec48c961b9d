//! Scale Detection Library
//!
//! This crate discovers a working serial configuration for a weighing scale
//! of unknown make, keeps the adopted connection in a [`ScaleSession`], and
//! polls it for weights:
//!
//! - [`ScaleProber`] tries the candidate configurations in order and adopts
//!   the first one that opens the port
//! - [`ScaleReader`] escalates from buffered bytes to request commands to a
//!   timed wait, and falls back to a short-lived cache
//! - [`PortScanner`] enumerates the serial ports available on the host
//!
//! All operations are blocking and expect a single caller per session.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use scale_detect::{ScaleProber, ScaleReader};
//!
//! let prober = ScaleProber::new();
//! let mut slot = None;
//! let report = prober.connect(&mut slot, "/dev/ttyUSB0", Duration::from_millis(100)).unwrap();
//! println!("Connected at {}", report.params);
//!
//! let reader = ScaleReader::standard();
//! if let Some(session) = slot.as_mut() {
//!     match reader.read(session) {
//!         Ok(reading) => println!("{} ({})", reading.weight, reading.format),
//!         Err(e) if e.requires_connection() => println!("reconnect needed"),
//!         Err(e) => println!("error: {}", e),
//!     }
//! }
//! ```

pub mod error;
pub mod exchange;
pub mod link;
pub mod params;
pub mod probe;
pub mod reader;
pub mod reading;
pub mod scanner;
pub mod session;

#[cfg(test)]
mod testing;

pub use error::DetectError;
pub use exchange::{Drain, REQUEST_COMMANDS};
pub use link::{LinkOpener, ScaleLink, SerialLink, SerialPortOpener, TimeoutGuard};
pub use params::{candidates, DataBits, Parity, SerialParams, StopBits, CANDIDATES};
pub use probe::{ProbeConfig, ScaleProber};
pub use reader::{ReaderConfig, ScaleReader};
pub use reading::{ConnectionReport, OnceReading, ReadMethod, WeightReading};
pub use scanner::{PortScanner, ScannerConfig, SerialPortInfo};
pub use session::{CachedReading, ScaleSession};
