//! Opener that serves virtual scales by port name

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use scale_detect::{DetectError, LinkOpener, ScaleLink, SerialParams};
use tracing::debug;

use crate::scale::{VirtualScale, VirtualScaleConfig};

/// Maps port names to virtual scales
///
/// Ports registered with [`with_scale`](Self::with_scale) are served from
/// the given handle. Names of the form `SIM:<format>[:demand]` that were
/// never registered get a fresh scale on first open, so repeated opens of
/// the same name reach the same device.
#[derive(Debug, Default)]
pub struct VirtualPortOpener {
    scales: Mutex<HashMap<String, VirtualScale>>,
}

impl VirtualPortOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `port` from `scale`
    pub fn with_scale(self, port: impl Into<String>, scale: VirtualScale) -> Self {
        self.insert(port, scale);
        self
    }

    /// Register or replace the scale behind `port`
    pub fn insert(&self, port: impl Into<String>, scale: VirtualScale) {
        self.lock().insert(port.into(), scale);
    }

    /// Handle for the scale behind `port`, if one exists yet
    pub fn scale(&self, port: &str) -> Option<VirtualScale> {
        self.lock().get(port).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VirtualScale>> {
        self.scales.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, port: &str) -> Option<VirtualScale> {
        let mut scales = self.lock();
        if let Some(scale) = scales.get(port) {
            return Some(scale.clone());
        }
        let config = VirtualScaleConfig::from_port_name(port)?;
        debug!("Creating virtual {} scale for {}", config.format.name(), port);
        let scale = VirtualScale::from_config(config);
        scales.insert(port.to_string(), scale.clone());
        Some(scale)
    }
}

impl LinkOpener for VirtualPortOpener {
    fn open(&self, port: &str, params: &SerialParams) -> Result<Box<dyn ScaleLink>, DetectError> {
        let scale = self.resolve(port).ok_or_else(|| DetectError::OpenFailed {
            port: port.to_string(),
            reason: "no such virtual port".to_string(),
        })?;

        if !scale.accepts(params) {
            return Err(DetectError::OpenFailed {
                port: port.to_string(),
                reason: format!("virtual scale rejected {}", params),
            });
        }

        debug!("Opened virtual port {} at {}", port, params);
        Ok(Box::new(scale.link(*params)))
    }
}
