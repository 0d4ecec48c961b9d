//! Polling driver
//!
//! Owns the session for the lifetime of a loop, re-probes whenever a read
//! reports that the connection is gone, and closes the session on exit.
//! Results go out as JSON lines; the loop stops when the shared flag is set.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use scale_detect::{LinkOpener, ScaleProber, ScaleReader, ScaleSession, WeightReading};
use serde::Serialize;
use tracing::{debug, info};

use crate::output::{emit, Connected, Failure, Success};

/// Smallest weight change that is always printed
const MIN_CHANGE: f64 = 0.001;

/// Decides which readings of a continuous loop are printed
#[derive(Debug, Clone)]
pub struct PrintGate {
    last_printed: f64,
    every: u64,
}

impl PrintGate {
    /// Print on change, and unconditionally every `every` iterations
    pub fn new(every: u64) -> Self {
        Self {
            last_printed: 0.0,
            every,
        }
    }

    /// Print everything
    pub fn always() -> Self {
        Self::new(1)
    }

    /// Whether iteration `iteration` (1-based) with `weight` is printed
    pub fn admit(&mut self, weight: f64, iteration: u64) -> bool {
        let changed = (weight - self.last_printed).abs() > MIN_CHANGE;
        let periodic = self.every != 0 && iteration % self.every == 0;
        if changed || periodic {
            self.last_printed = weight;
            true
        } else {
            false
        }
    }
}

/// Options for [`PollDriver::run_continuous`]
#[derive(Debug, Clone)]
pub struct ContinuousOptions {
    /// Pause after each iteration
    pub interval: Duration,
    /// Which readings are printed
    pub gate: PrintGate,
    /// Stop after this many iterations
    pub limit: Option<u64>,
}

/// Counters reported when a loop ends
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub iterations: u64,
    pub printed: u64,
    pub connects: u64,
    pub failures: u64,
}

/// Latency figures in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyStats {
    pub samples: usize,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
}

impl LatencyStats {
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let min_ms = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max_ms = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean_ms = samples.iter().sum::<f64>() / samples.len() as f64;
        Some(Self {
            samples: samples.len(),
            min_ms,
            max_ms,
            mean_ms,
        })
    }
}

#[derive(Serialize)]
struct Sample<'a> {
    sample: usize,
    latency_ms: f64,
    #[serde(flatten)]
    reading: &'a WeightReading,
}

#[derive(Serialize)]
struct Latency {
    latency: LatencyStats,
}

/// Runs reads against one port until told to stop
pub struct PollDriver<O> {
    prober: ScaleProber<O>,
    reader: ScaleReader,
    port: String,
    timeout: Duration,
}

impl<O: LinkOpener> PollDriver<O> {
    pub fn new(prober: ScaleProber<O>, reader: ScaleReader, port: impl Into<String>, timeout: Duration) -> Self {
        Self {
            prober,
            reader,
            port: port.into(),
            timeout,
        }
    }

    /// Probe into `slot`, emitting the outcome
    fn reconnect<W: Write + ?Sized>(
        &self,
        slot: &mut Option<ScaleSession>,
        out: &mut W,
        summary: &mut PollSummary,
    ) -> std::io::Result<bool> {
        match self.prober.connect(slot, &self.port, self.timeout) {
            Ok(report) => {
                summary.connects += 1;
                emit(out, &Success::new(Connected::from(&report)))?;
                Ok(true)
            }
            Err(e) => {
                debug!("Reconnect to {} failed: {}", self.port, e);
                summary.failures += 1;
                emit(out, &Failure::from(&e))?;
                Ok(false)
            }
        }
    }

    /// Read continuously until `stop` is set or the limit is reached
    pub fn run_continuous<W: Write + ?Sized>(
        &self,
        options: &ContinuousOptions,
        stop: &AtomicBool,
        out: &mut W,
    ) -> std::io::Result<PollSummary> {
        let mut gate = options.gate.clone();
        let mut summary = PollSummary::default();
        let mut slot = None;

        info!("Polling {} every {:?}", self.port, options.interval);

        while !stop.load(Ordering::Relaxed) && options.limit.map_or(true, |n| summary.iterations < n) {
            summary.iterations += 1;

            if slot.is_none() && !self.reconnect(&mut slot, out, &mut summary)? {
                pause(options.interval);
                continue;
            }

            let Some(session) = slot.as_mut() else {
                continue;
            };

            match self.reader.read(session) {
                Ok(reading) => {
                    if gate.admit(reading.weight, summary.iterations) {
                        summary.printed += 1;
                        emit(out, &Success::new(&reading))?;
                    }
                }
                Err(e) => {
                    summary.failures += 1;
                    emit(out, &Failure::from(&e))?;
                    if e.requires_connection() {
                        slot = None;
                    }
                }
            }

            pause(options.interval);
        }

        if let Some(mut session) = slot.take() {
            session.close();
        }
        info!(
            "Polling stopped after {} iterations ({} printed, {} connects)",
            summary.iterations, summary.printed, summary.connects
        );
        Ok(summary)
    }

    /// Time `samples` reads and emit the statistics as the final line
    pub fn run_latency<W: Write + ?Sized>(
        &self,
        samples: usize,
        pause_between: Duration,
        stop: &AtomicBool,
        out: &mut W,
    ) -> std::io::Result<Option<LatencyStats>> {
        let mut summary = PollSummary::default();
        let mut slot = None;
        if !self.reconnect(&mut slot, out, &mut summary)? {
            return Ok(None);
        }

        let mut timings = Vec::with_capacity(samples);
        for sample in 1..=samples {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            let Some(session) = slot.as_mut() else {
                break;
            };

            let started = Instant::now();
            let result = self.reader.read(session);
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
            timings.push(latency_ms);

            match result {
                Ok(reading) => emit(
                    out,
                    &Success::new(Sample {
                        sample,
                        latency_ms,
                        reading: &reading,
                    }),
                )?,
                Err(e) => {
                    emit(out, &Failure::from(&e))?;
                    if e.requires_connection() {
                        break;
                    }
                }
            }

            pause(pause_between);
        }

        if let Some(mut session) = slot.take() {
            session.close();
        }

        let stats = LatencyStats::from_samples(&timings);
        if let Some(stats) = &stats {
            info!(
                "Latency over {} reads: min {:.2} ms, max {:.2} ms, mean {:.2} ms",
                stats.samples, stats.min_ms, stats.max_ms, stats.mean_ms
            );
            emit(out, &Success::new(Latency { latency: stats.clone() }))?;
        }
        Ok(stats)
    }
}

fn pause(interval: Duration) {
    if !interval.is_zero() {
        thread::sleep(interval);
    }
}
