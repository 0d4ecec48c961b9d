//! Reading weights from an established session
//!
//! Each poll escalates through the cheapest sources first: bytes already in
//! the input buffer, then replies to request commands, then one last settle
//! wait. When the device stays quiet, a recent cached value masks the gap.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::DetectError;
use crate::exchange::{self, Drain, Found, REQUEST_COMMANDS};
use crate::link::{ScaleLink, TimeoutGuard};
use crate::reading::{ReadMethod, WeightReading};
use crate::session::ScaleSession;

/// Reader tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Maximum age of a cached reading that may stand in for fresh data
    #[serde(rename = "freshness_ms", with = "crate::params::duration_ms")]
    pub freshness: Duration,
    /// Wait after each request command
    #[serde(rename = "command_settle_ms", with = "crate::params::duration_ms")]
    pub command_settle: Duration,
    /// Whether request commands are sent when the buffer is empty
    pub send_commands: bool,
    /// Final wait for unsolicited data, if any
    #[serde(default, rename = "automatic_wait_ms", with = "optional_ms")]
    pub automatic_wait: Option<Duration>,
    /// How buffered input is consumed
    pub drain: Drain,
    /// Read timeout applied for the duration of one poll
    #[serde(default, rename = "poll_timeout_ms", with = "optional_ms")]
    pub poll_timeout: Option<Duration>,
}

impl ReaderConfig {
    /// Profile for ordinary polling
    pub fn standard() -> Self {
        Self {
            freshness: Duration::from_secs(1),
            command_settle: Duration::from_millis(50),
            send_commands: true,
            automatic_wait: Some(Duration::from_millis(50)),
            drain: Drain::Single,
            poll_timeout: None,
        }
    }

    /// Profile for high-rate polling with minimal added latency
    pub fn low_latency() -> Self {
        Self {
            freshness: Duration::from_millis(100),
            command_settle: Duration::from_millis(2),
            send_commands: true,
            automatic_wait: None,
            drain: Drain::Exhaustive,
            poll_timeout: Some(Duration::from_millis(1)),
        }
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self::standard()
    }
}

/// Reads weights from a [`ScaleSession`]
#[derive(Debug, Clone, Default)]
pub struct ScaleReader {
    config: ReaderConfig,
}

impl ScaleReader {
    /// Reader with the given profile
    pub fn new(config: ReaderConfig) -> Self {
        Self { config }
    }

    /// Standard-profile reader
    pub fn standard() -> Self {
        Self::new(ReaderConfig::standard())
    }

    /// Low-latency reader
    pub fn low_latency() -> Self {
        Self::new(ReaderConfig::low_latency())
    }

    /// Active profile
    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Poll the session once
    ///
    /// Silence from a connected device is not an error: the result is either
    /// a cached value or a zero weight with [`ReadMethod::NoRecentData`]. Any
    /// link failure tears the session down and returns
    /// [`DetectError::DeviceLost`]; reads on a torn-down session return
    /// [`DetectError::NotConnected`].
    pub fn read(&self, session: &mut ScaleSession) -> Result<WeightReading, DetectError> {
        let polled = match session.link_mut() {
            Some(link) => self.poll(link),
            None => return Err(DetectError::NotConnected),
        };

        match polled {
            Ok(Some((found, method))) => {
                let reading = WeightReading::fresh(found.matched.weight, found.raw, found.matched.tag, method);
                session.remember(&reading);
                trace!("Fresh reading {} via {:?}", reading.weight, method);
                Ok(reading)
            }
            Ok(None) => Ok(self.fallback(session)),
            Err(e) => {
                let port = session.port().to_string();
                warn!("Lost connection on {}: {}", port, e);
                session.tear_down();
                Err(DetectError::DeviceLost {
                    port,
                    reason: e.to_string(),
                })
            }
        }
    }

    fn poll(&self, link: &mut dyn ScaleLink) -> std::io::Result<Option<(Found, ReadMethod)>> {
        match self.config.poll_timeout {
            Some(timeout) => {
                let mut guard = TimeoutGuard::acquire(link, timeout)?;
                self.escalate(&mut *guard)
            }
            None => self.escalate(link),
        }
    }

    fn escalate(&self, link: &mut dyn ScaleLink) -> std::io::Result<Option<(Found, ReadMethod)>> {
        let drain = self.config.drain;

        // The byte count doubles as the liveness check, so errors propagate
        if let Some(found) = exchange::drain_pending(link, drain)? {
            return Ok(Some((found, ReadMethod::BufferDirect)));
        }

        if self.config.send_commands {
            for command in REQUEST_COMMANDS {
                match exchange::request(link, command, self.config.command_settle, drain) {
                    Ok(Some(found)) => return Ok(Some((found, ReadMethod::Command))),
                    Ok(None) => {}
                    Err(e) if is_transient(&e) => {
                        debug!("Command {:?} failed: {}", String::from_utf8_lossy(command), e)
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if let Some(wait) = self.config.automatic_wait {
            thread::sleep(wait);
            if let Some(found) = exchange::drain_pending(link, drain)? {
                return Ok(Some((found, ReadMethod::Automatic)));
            }
        }

        Ok(None)
    }

    fn fallback(&self, session: &ScaleSession) -> WeightReading {
        if let Some(cached) = session.cached() {
            let age = cached.age();
            if age < self.config.freshness {
                return cached.to_reading(age);
            }
        }
        WeightReading::no_recent_data()
    }
}

/// Errors a single command may hit without the device being gone
fn is_transient(e: &std::io::Error) -> bool {
    matches!(e.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted)
}

mod optional_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
