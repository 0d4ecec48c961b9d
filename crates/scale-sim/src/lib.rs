//! Scale Simulation Library
//!
//! This crate provides simulated weighing scales for testing the detection
//! engine without physical hardware. It includes:
//!
//! - **VirtualScale**: a scale that emits frames in one of the recognised
//!   output styles, either continuously or in reply to request commands
//! - **VirtualPortOpener**: a [`LinkOpener`](scale_detect::LinkOpener) that
//!   serves virtual scales by port name
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use scale_detect::{ProbeConfig, ScaleProber, ScaleReader};
//! use scale_sim::{ScaleFormat, VirtualPortOpener, VirtualScale};
//!
//! let scale = VirtualScale::streaming(ScaleFormat::Torrey, 1.5);
//! let opener = VirtualPortOpener::new().with_scale("SIM:1", scale.clone());
//! let config = ProbeConfig { open_settle: Duration::ZERO, command_wait_factor: 0.0 };
//! let prober = ScaleProber::with_config(opener, config);
//!
//! let (mut session, _report) = prober.probe("SIM:1", Duration::from_millis(10)).unwrap();
//! let reading = ScaleReader::standard().read(&mut session).unwrap();
//! assert_eq!(reading.weight, 1.5);
//! ```

pub mod opener;
pub mod scale;

pub use opener::VirtualPortOpener;
pub use scale::{ScaleFormat, TransmitMode, VirtualScale, VirtualScaleConfig, VirtualScaleLink};
