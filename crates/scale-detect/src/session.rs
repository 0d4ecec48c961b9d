//! Connection session state
//!
//! A [`ScaleSession`] is the single owner of an open link and the cache of
//! the last good reading. It is created by the prober and handed to the
//! reader for every poll.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use scale_format::FormatTag;
use tracing::{info, warn};

use crate::link::ScaleLink;
use crate::params::SerialParams;
use crate::reading::{ReadMethod, WeightReading};

/// Pause between flushing buffers and closing the port
const CLOSE_SETTLE: Duration = Duration::from_millis(50);

/// Last good reading kept by a session
#[derive(Debug, Clone, PartialEq)]
pub struct CachedReading {
    /// Weight as reported
    pub weight: f64,
    /// Text the weight came from
    pub raw: Option<String>,
    /// Rule that matched originally
    pub format: FormatTag,
    /// Monotonic receive time, used for freshness
    pub received_at: Instant,
    /// Wall-clock receive time, used for output
    pub timestamp: SystemTime,
}

impl CachedReading {
    /// Time since the reading was received
    pub fn age(&self) -> Duration {
        self.received_at.elapsed()
    }

    /// Serve this value as a cache hit
    pub(crate) fn to_reading(&self, age: Duration) -> WeightReading {
        WeightReading {
            weight: self.weight,
            raw: self.raw.clone(),
            format: FormatTag::Cache,
            method: ReadMethod::Cache,
            timestamp: self.timestamp,
            age_ms: Some(age.as_millis() as u64),
        }
    }
}

/// An adopted connection to a scale
pub struct ScaleSession {
    port: String,
    params: SerialParams,
    link: Option<Box<dyn ScaleLink>>,
    cache: Option<CachedReading>,
}

impl ScaleSession {
    pub(crate) fn new(port: impl Into<String>, params: SerialParams, link: Box<dyn ScaleLink>) -> Self {
        Self {
            port: port.into(),
            params,
            link: Some(link),
            cache: None,
        }
    }

    /// Port this session was opened on
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Parameters adopted by the probe
    pub fn params(&self) -> &SerialParams {
        &self.params
    }

    /// Whether the session still holds an open link
    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Last good reading, if any
    pub fn cached(&self) -> Option<&CachedReading> {
        self.cache.as_ref()
    }

    pub(crate) fn link_mut(&mut self) -> Option<&mut (dyn ScaleLink + 'static)> {
        self.link.as_deref_mut()
    }

    pub(crate) fn remember(&mut self, reading: &WeightReading) {
        self.cache = Some(CachedReading {
            weight: reading.weight,
            raw: reading.raw.clone(),
            format: reading.format,
            received_at: Instant::now(),
            timestamp: reading.timestamp,
        });
    }

    /// Drop the link and cache without touching the device
    pub(crate) fn tear_down(&mut self) {
        self.link = None;
        self.cache = None;
    }

    /// Flush buffers and close the link
    ///
    /// Safe to call on an already closed session.
    pub fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Err(e) = link.clear_input().and_then(|_| link.clear_output()) {
                warn!("Error flushing {} before close: {}", self.port, e);
            }
            thread::sleep(CLOSE_SETTLE);
            info!("Connection on {} closed", self.port);
        }
        self.cache = None;
    }
}

impl fmt::Debug for ScaleSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScaleSession")
            .field("port", &self.port)
            .field("params", &self.params)
            .field("connected", &self.is_connected())
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::CANDIDATES;
    use crate::testing::ScriptedLink;

    fn session(link: &ScriptedLink) -> ScaleSession {
        ScaleSession::new("COM3", CANDIDATES[0], Box::new(link.clone()))
    }

    #[test]
    fn test_close_flushes_and_clears() {
        let link = ScriptedLink::new();
        link.push_input(b"stale");
        let mut s = session(&link);
        s.remember(&WeightReading::no_recent_data());

        s.close();

        assert!(!s.is_connected());
        assert!(s.cached().is_none());
        assert_eq!(link.pending(), 0);
        assert_eq!(link.output_clears(), 1);

        // Second close is a no-op
        s.close();
        assert_eq!(link.output_clears(), 1);
    }

    #[test]
    fn test_cached_reading_served_as_cache() {
        let link = ScriptedLink::new();
        let mut s = session(&link);
        let fresh = WeightReading::fresh(2.5, "N2.5".into(), FormatTag::Cas, ReadMethod::BufferDirect);
        s.remember(&fresh);

        let cached = s.cached().unwrap().to_reading(Duration::from_millis(42));
        assert_eq!(cached.weight, 2.5);
        assert_eq!(cached.format, FormatTag::Cache);
        assert_eq!(cached.method, ReadMethod::Cache);
        assert_eq!(cached.age_ms, Some(42));
        assert_eq!(cached.timestamp, fresh.timestamp);
    }
}
