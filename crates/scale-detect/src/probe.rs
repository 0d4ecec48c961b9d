//! Connection parameter probing
//!
//! The prober walks the candidate configurations in order and adopts the
//! first one that opens the port. Whether the scale answers with a weight on
//! that configuration does not matter for adoption; the initial read is only
//! reported back to the caller.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::DetectError;
use crate::exchange::{self, Drain, Found, REQUEST_COMMANDS};
use crate::link::{LinkOpener, ScaleLink, SerialPortOpener};
use crate::params::{candidates, SerialParams};
use crate::reading::{ConnectionReport, OnceReading, ReadMethod, WeightReading};
use crate::session::ScaleSession;

/// Configuration for probing
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Pause after opening so auto-transmitting scales can fill the buffer
    pub open_settle: Duration,
    /// Wait after each request command, as a multiple of the read timeout
    pub command_wait_factor: f64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            open_settle: Duration::from_millis(100),
            command_wait_factor: 1.0,
        }
    }
}

/// Scale connection prober
pub struct ScaleProber<O = SerialPortOpener> {
    opener: O,
    config: ProbeConfig,
}

impl ScaleProber<SerialPortOpener> {
    /// Create a prober for native serial ports with default configuration
    pub fn new() -> Self {
        Self::with_opener(SerialPortOpener)
    }
}

impl Default for ScaleProber<SerialPortOpener> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: LinkOpener> ScaleProber<O> {
    /// Create a prober over a custom opener
    pub fn with_opener(opener: O) -> Self {
        Self::with_config(opener, ProbeConfig::default())
    }

    /// Create a prober with custom configuration
    pub fn with_config(opener: O, config: ProbeConfig) -> Self {
        Self { opener, config }
    }

    /// The opener links are created with
    pub fn opener(&self) -> &O {
        &self.opener
    }

    /// Probe `port` and return the adopted session
    pub fn probe(&self, port: &str, timeout: Duration) -> Result<(ScaleSession, ConnectionReport), DetectError> {
        info!("Connecting to {} with {:?} timeout", port, timeout);

        for params in candidates(timeout, None) {
            debug!("Trying {} on {}", params, port);

            let mut link = match self.open_candidate(port, &params) {
                Ok(link) => link,
                Err(e) => {
                    debug!("  {} failed: {}", params, e);
                    continue;
                }
            };

            let initial = self.initial_read(link.as_mut(), self.command_wait(&params));
            let mut session = ScaleSession::new(port, params, link);

            let report = ConnectionReport {
                port: port.to_string(),
                params,
                initial_weight: initial.as_ref().map(|r| r.weight).unwrap_or(0.0),
                has_initial_weight: initial.is_some(),
            };
            if let Some(reading) = &initial {
                session.remember(reading);
            }

            info!(
                "Connected on {} at {} (initial weight: {})",
                port,
                params,
                initial
                    .as_ref()
                    .map(|r| r.weight.to_string())
                    .unwrap_or_else(|| "none".to_string())
            );
            return Ok((session, report));
        }

        warn!("No configuration could open {}", port);
        Err(DetectError::AllCandidatesExhausted {
            port: port.to_string(),
        })
    }

    /// Probe `port`, replacing whatever session `slot` holds
    ///
    /// The previous session is closed before probing starts, so the slot is
    /// empty if the probe fails.
    pub fn connect(
        &self,
        slot: &mut Option<ScaleSession>,
        port: &str,
        timeout: Duration,
    ) -> Result<ConnectionReport, DetectError> {
        if let Some(mut previous) = slot.take() {
            debug!("Closing previous session on {}", previous.port());
            previous.close();
        }

        let (session, report) = self.probe(port, timeout)?;
        *slot = Some(session);
        Ok(report)
    }

    /// Probe each port in turn and keep the first that opens
    pub fn connect_any<S: AsRef<str>>(
        &self,
        slot: &mut Option<ScaleSession>,
        ports: &[S],
        timeout: Duration,
    ) -> Result<ConnectionReport, DetectError> {
        for port in ports {
            info!("Trying port {}", port.as_ref());
            match self.connect(slot, port.as_ref(), timeout) {
                Ok(report) => return Ok(report),
                Err(e) => debug!("  {}", e),
            }
        }
        Err(DetectError::NoScaleDetected)
    }

    /// Open, read one weight, and close again
    ///
    /// Unlike [`probe`](Self::probe), a configuration is only accepted if it
    /// actually yields a weight.
    pub fn read_once(
        &self,
        port: &str,
        baud_rate: Option<u32>,
        timeout: Duration,
    ) -> Result<OnceReading, DetectError> {
        info!("Single read from {} with {:?} timeout", port, timeout);

        for params in candidates(timeout, baud_rate) {
            let mut link = match self.open_candidate(port, &params) {
                Ok(link) => link,
                Err(e) => {
                    debug!("  {} failed: {}", params, e);
                    continue;
                }
            };

            // The link is dropped, and so closed, at the end of each pass
            if let Some(reading) = self.initial_read(link.as_mut(), self.command_wait(&params)) {
                info!("Read {} from {} at {}", reading.weight, port, params);
                return Ok(OnceReading {
                    port: port.to_string(),
                    params,
                    reading,
                });
            }
        }

        Err(DetectError::NoReading {
            port: port.to_string(),
        })
    }

    /// Zero for a negative or non-finite factor
    fn command_wait(&self, params: &SerialParams) -> Duration {
        Duration::try_from_secs_f64(params.timeout.as_secs_f64() * self.config.command_wait_factor)
            .unwrap_or(Duration::ZERO)
    }

    /// Open a candidate, let it settle, and flush both buffers
    fn open_candidate(&self, port: &str, params: &SerialParams) -> Result<Box<dyn ScaleLink>, DetectError> {
        let mut link = self.opener.open(port, params)?;

        if !self.config.open_settle.is_zero() {
            thread::sleep(self.config.open_settle);
        }

        link.clear_input()
            .and_then(|_| link.clear_output())
            .map_err(|e| DetectError::OpenFailed {
                port: port.to_string(),
                reason: e.to_string(),
            })?;

        Ok(link)
    }

    /// Buffer first, then each request command; failures only end the attempt
    fn initial_read(&self, link: &mut dyn ScaleLink, wait: Duration) -> Option<WeightReading> {
        let to_reading = |f: Found, method| WeightReading::fresh(f.matched.weight, f.raw, f.matched.tag, method);

        match exchange::drain_pending(link, Drain::Single) {
            Ok(Some(found)) => return Some(to_reading(found, ReadMethod::BufferDirect)),
            Ok(None) => {}
            Err(e) => {
                warn!("  Initial read failed: {}", e);
                return None;
            }
        }

        for command in REQUEST_COMMANDS {
            match exchange::request(link, command, wait, Drain::Single) {
                Ok(Some(found)) => return Some(to_reading(found, ReadMethod::Command)),
                Ok(None) => {}
                Err(e) => warn!("  Command {:?} failed: {}", String::from_utf8_lossy(command), e),
            }
        }

        None
    }
}
