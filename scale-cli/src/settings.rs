//! Persistent settings

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use scale_detect::{ProbeConfig, ScannerConfig};
use serde::{Deserialize, Serialize};

/// Tool settings, read from `settings.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Read timeout used when none is given on the command line
    pub timeout_ms: u64,
    /// Pause after opening a port before the first read
    pub open_settle_ms: u64,
    /// Wait after each probe command, as a multiple of the read timeout
    pub command_wait_factor: f64,
    /// Pause between continuous reads
    pub interval_ms: u64,
    /// Pause between continuous reads in fast mode
    pub fast_interval_ms: u64,
    /// Unchanged readings are still printed every this many iterations
    pub print_every: u64,
    /// Reads performed by the latency test
    pub latency_samples: usize,
    /// Pause between latency test reads
    pub latency_pause_ms: u64,
    /// Ports containing any of these strings are not listed
    pub skip_patterns: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_ms: 100,
            open_settle_ms: 100,
            command_wait_factor: 1.0,
            interval_ms: 10,
            fast_interval_ms: 2,
            print_every: 10,
            latency_samples: 50,
            latency_pause_ms: 20,
            skip_patterns: vec!["Bluetooth".to_string(), "debug".to_string()],
        }
    }
}

impl Settings {
    /// Get the XDG config directory for scaleprobe
    /// Uses $XDG_CONFIG_HOME/scaleprobe, falls back to ~/.config/scaleprobe
    fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("scaleprobe"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("scaleprobe"))
    }

    /// Get the default settings file path
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load settings
    ///
    /// An explicit path must exist and parse. The default location is
    /// optional; if it is missing the defaults apply.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => Self::load_from(path),
            None => match Self::settings_path() {
                Some(path) if path.exists() => Self::load_from(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn load_from(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid settings in {}", path.display()))
    }

    fn parse(text: &str) -> anyhow::Result<Self> {
        let settings: Self = serde_json::from_str(text)?;
        if !(settings.command_wait_factor >= 0.0 && settings.command_wait_factor.is_finite()) {
            anyhow::bail!(
                "command_wait_factor must be a non-negative number, got {}",
                settings.command_wait_factor
            );
        }
        Ok(settings)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self, fast: bool) -> Duration {
        Duration::from_millis(if fast { self.fast_interval_ms } else { self.interval_ms })
    }

    pub fn latency_pause(&self) -> Duration {
        Duration::from_millis(self.latency_pause_ms)
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            open_settle: Duration::from_millis(self.open_settle_ms),
            command_wait_factor: self.command_wait_factor,
        }
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            skip_patterns: self.skip_patterns.clone(),
        }
    }
}
