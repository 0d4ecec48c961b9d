//! Virtual scale simulation
//!
//! Provides a simulated scale that produces frames in one of the recognised
//! output styles. A [`VirtualScale`] is a cheap handle onto shared state; the
//! links it hands out read from and write to the same state, so a test can
//! change the weight or pull the plug while a session owns the link.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use scale_detect::{ScaleLink, SerialParams, REQUEST_COMMANDS};
use scale_format::WEIGHT_BAND;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Output style of a virtual scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleFormat {
    /// `ST,GS,001.500,kg`
    Torrey,
    /// `N012.34`
    Cas,
    /// `+007.89`
    Signed,
    /// `4.750 kg`
    Simple,
    /// `1500` (grams, no decimal point)
    Grams,
    /// Never contains a weight
    Garbage,
}

impl ScaleFormat {
    /// All formats, in extraction priority order
    pub const ALL: [ScaleFormat; 6] = [
        ScaleFormat::Torrey,
        ScaleFormat::Cas,
        ScaleFormat::Signed,
        ScaleFormat::Simple,
        ScaleFormat::Grams,
        ScaleFormat::Garbage,
    ];

    /// Parse a lowercase format name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(name))
    }

    /// Lowercase format name
    pub fn name(&self) -> &'static str {
        match self {
            ScaleFormat::Torrey => "torrey",
            ScaleFormat::Cas => "cas",
            ScaleFormat::Signed => "signed",
            ScaleFormat::Simple => "simple",
            ScaleFormat::Grams => "grams",
            ScaleFormat::Garbage => "garbage",
        }
    }

    /// Encode one output frame for `weight` kilograms
    ///
    /// Gram frames below 1.001 kg are indistinguishable from plain integers
    /// and will not be read back as grams.
    pub fn frame(&self, weight: f64) -> String {
        match self {
            ScaleFormat::Torrey => format!("ST,GS,{:07.3},kg\r\n", weight),
            ScaleFormat::Cas => format!("N{:06.2}\r\n", weight),
            ScaleFormat::Signed => format!("+{:06.2}\r\n", weight),
            ScaleFormat::Simple => format!("{:.3} kg\r\n", weight),
            ScaleFormat::Grams => format!("{}\r\n", (weight * 1000.0).round() as u64),
            ScaleFormat::Garbage => "garbage\r\n".to_string(),
        }
    }
}

/// When a virtual scale transmits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransmitMode {
    /// A new frame is available whenever the input buffer runs empty
    Streaming,
    /// A frame is sent only in reply to a request command
    OnDemand,
}

/// Configuration for creating a virtual scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualScaleConfig {
    /// Output style
    pub format: ScaleFormat,
    /// Transmission behaviour
    pub mode: TransmitMode,
    /// Weight reported by the first frame
    pub initial_weight: f64,
    /// Added to the weight after every frame, wrapping inside the band
    #[serde(default)]
    pub step: f64,
    /// Minimum spacing between streamed frames
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    /// Framing the device really uses; other framings produce line noise
    #[serde(default)]
    pub native_params: Option<SerialParams>,
    /// Baud rates the port accepts; empty accepts all
    #[serde(default)]
    pub accepted_bauds: Vec<u32>,
}

impl Default for VirtualScaleConfig {
    fn default() -> Self {
        Self {
            format: ScaleFormat::Torrey,
            mode: TransmitMode::Streaming,
            initial_weight: 1.5,
            step: 0.0,
            frame_interval_ms: default_frame_interval_ms(),
            native_params: None,
            accepted_bauds: Vec::new(),
        }
    }
}

fn default_frame_interval_ms() -> u64 {
    1
}

impl VirtualScaleConfig {
    /// Parse a simulated port name such as `SIM:torrey` or `SIM:cas:demand`
    pub fn from_port_name(port: &str) -> Option<Self> {
        let rest = port.strip_prefix("SIM:")?;
        let mut parts = rest.split(':');
        let format = ScaleFormat::from_name(parts.next()?)?;
        let mode = match parts.next() {
            None | Some("stream") => TransmitMode::Streaming,
            Some("demand") => TransmitMode::OnDemand,
            Some(_) => return None,
        };
        Some(Self {
            format,
            mode,
            step: 0.005,
            ..Default::default()
        })
    }
}

#[derive(Debug)]
struct ScaleState {
    config: VirtualScaleConfig,
    weight: f64,
    input: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    opened_with: Vec<SerialParams>,
    timeout_changes: Vec<Duration>,
    plugged_in: bool,
    last_frame: Option<Instant>,
}

impl ScaleState {
    fn frame_due(&self) -> bool {
        let interval = Duration::from_millis(self.config.frame_interval_ms);
        self.config.mode == TransmitMode::Streaming
            && self.input.is_empty()
            && self.last_frame.map_or(true, |t| t.elapsed() >= interval)
    }

    fn next_frame(&mut self, params: &SerialParams) {
        let native = self
            .config
            .native_params
            .map_or(true, |n| same_framing(&n, params));

        self.last_frame = Some(Instant::now());
        if native {
            let frame = self.config.format.frame(self.weight);
            trace!("Virtual scale sends {:?}", frame.trim_end());
            self.input.extend(frame.bytes());
        } else {
            // Wrong baud or framing decodes as high-bit noise
            self.input.extend([0xFF, 0xFE, 0xF0, 0x80, 0xFF, 0xE0]);
        }

        if self.config.step != 0.0 {
            self.weight += self.config.step;
            if !WEIGHT_BAND.contains(&self.weight) {
                self.weight = *WEIGHT_BAND.start();
            }
        }
    }
}

fn same_framing(a: &SerialParams, b: &SerialParams) -> bool {
    a.baud_rate == b.baud_rate
        && a.data_bits == b.data_bits
        && a.parity == b.parity
        && a.stop_bits == b.stop_bits
}

/// Handle onto a simulated scale
#[derive(Debug, Clone)]
pub struct VirtualScale {
    state: Arc<Mutex<ScaleState>>,
}

impl VirtualScale {
    /// Create a virtual scale from configuration
    pub fn from_config(config: VirtualScaleConfig) -> Self {
        let weight = config.initial_weight;
        Self {
            state: Arc::new(Mutex::new(ScaleState {
                config,
                weight,
                input: VecDeque::new(),
                writes: Vec::new(),
                opened_with: Vec::new(),
                timeout_changes: Vec::new(),
                plugged_in: true,
                last_frame: None,
            })),
        }
    }

    /// Continuously transmitting scale
    pub fn streaming(format: ScaleFormat, weight: f64) -> Self {
        Self::from_config(VirtualScaleConfig {
            format,
            mode: TransmitMode::Streaming,
            initial_weight: weight,
            ..Default::default()
        })
    }

    /// Scale that only answers request commands
    pub fn on_demand(format: ScaleFormat, weight: f64) -> Self {
        Self::from_config(VirtualScaleConfig {
            format,
            mode: TransmitMode::OnDemand,
            initial_weight: weight,
            ..Default::default()
        })
    }

    fn state(&self) -> MutexGuard<'_, ScaleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current weight
    pub fn weight(&self) -> f64 {
        self.state().weight
    }

    /// Change the weight reported by subsequent frames
    pub fn set_weight(&self, weight: f64) {
        self.state().weight = weight;
    }

    /// Switch the output style of subsequent frames
    pub fn set_format(&self, format: ScaleFormat) {
        self.state().config.format = format;
    }

    /// Inject raw bytes into the input buffer
    pub fn push_raw(&self, data: &[u8]) {
        self.state().input.extend(data.iter().copied());
    }

    /// Simulate the cable being pulled
    pub fn unplug(&self) {
        debug!("Virtual scale unplugged");
        self.state().plugged_in = false;
    }

    /// Simulate the cable being reconnected
    pub fn plug_in(&self) {
        let mut state = self.state();
        state.plugged_in = true;
        state.input.clear();
        state.last_frame = None;
    }

    /// Whether the scale is currently attached
    pub fn is_plugged_in(&self) -> bool {
        self.state().plugged_in
    }

    /// Whether the port would open with `params`
    pub fn accepts(&self, params: &SerialParams) -> bool {
        let state = self.state();
        state.plugged_in
            && (state.config.accepted_bauds.is_empty()
                || state.config.accepted_bauds.contains(&params.baud_rate))
    }

    /// Every command written so far
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state().writes.clone()
    }

    /// Parameters of every link opened so far
    pub fn opened_with(&self) -> Vec<SerialParams> {
        self.state().opened_with.clone()
    }

    /// Every timeout change made through a link
    pub fn timeout_changes(&self) -> Vec<Duration> {
        self.state().timeout_changes.clone()
    }

    /// Open a link with `params`
    pub fn link(&self, params: SerialParams) -> VirtualScaleLink {
        self.state().opened_with.push(params);
        VirtualScaleLink {
            scale: self.clone(),
            params,
            timeout: params.timeout,
        }
    }
}

/// An open connection to a [`VirtualScale`]
#[derive(Debug)]
pub struct VirtualScaleLink {
    scale: VirtualScale,
    params: SerialParams,
    timeout: Duration,
}

impl VirtualScaleLink {
    fn attached(&self) -> io::Result<MutexGuard<'_, ScaleState>> {
        let state = self.scale.state();
        if state.plugged_in {
            Ok(state)
        } else {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "virtual scale unplugged"))
        }
    }
}

impl ScaleLink for VirtualScaleLink {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        let params = self.params;
        let mut state = self.attached()?;
        if state.frame_due() {
            state.next_frame(&params);
        }
        Ok(state.input.len())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.attached()?;
        let n = buf.len().min(state.input.len());
        for (slot, byte) in buf.iter_mut().zip(state.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        let params = self.params;
        let mut state = self.attached()?;
        state.writes.push(data.to_vec());
        if state.config.mode == TransmitMode::OnDemand && REQUEST_COMMANDS.iter().any(|c| *c == data) {
            state.next_frame(&params);
        }
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.attached()?.input.clear();
        Ok(())
    }

    fn clear_output(&mut self) -> io::Result<()> {
        self.attached().map(|_| ())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.timeout = timeout;
        self.scale.state().timeout_changes.push(timeout);
        Ok(())
    }
}
