//! Port opening for the command line: real serial ports plus `SIM:` ports

use scale_detect::{DetectError, LinkOpener, ScaleLink, SerialParams, SerialPortOpener};
use scale_sim::VirtualPortOpener;

/// Prefix that selects a simulated scale
pub const SIM_PREFIX: &str = "SIM:";

/// Opens `SIM:<format>[:demand]` as a virtual scale and anything else as a
/// serial device
#[derive(Debug, Default)]
pub struct CliOpener {
    serial: SerialPortOpener,
    simulated: VirtualPortOpener,
}

impl CliOpener {
    pub fn new() -> Self {
        Self::default()
    }
}

pub fn is_simulated(port: &str) -> bool {
    port.starts_with(SIM_PREFIX)
}

impl LinkOpener for CliOpener {
    fn open(&self, port: &str, params: &SerialParams) -> Result<Box<dyn ScaleLink>, DetectError> {
        if is_simulated(port) {
            self.simulated.open(port, params)
        } else {
            self.serial.open(port, params)
        }
    }
}
