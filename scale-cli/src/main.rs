//! Scale Probe
//!
//! Detects the serial configuration of an attached weighing scale and
//! reports its readings as JSON lines on stdout. Diagnostics go to stderr.

mod output;
mod poll;
mod ports;
mod settings;

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use scale_detect::{PortScanner, ScaleProber, ScaleReader};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use output::{emit, Connected, Failure, Success};
use poll::{ContinuousOptions, PollDriver, PrintGate};
use ports::CliOpener;
use settings::Settings;

const DEFAULT_FILTER: &str = "scaleprobe=info,scale_detect=info,scale_format=info,scale_sim=info";
const VERBOSE_FILTER: &str = "scaleprobe=debug,scale_detect=debug,scale_format=debug,scale_sim=debug";

#[derive(Parser, Debug)]
#[command(name = "scaleprobe", author, about, version)]
struct Options {
    /// Settings file to use instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports
    ListPorts,
    /// Probe a port, or every listed port, and report the adopted configuration
    Connect {
        /// Port to probe; `SIM:<format>` opens a simulated scale
        port: Option<String>,
        /// Read timeout in seconds
        #[arg(value_parser = parse_seconds)]
        timeout: Option<Duration>,
    },
    /// Open a port, read one weight, and close it again
    Read {
        port: Option<String>,
        /// Baud rate to try first
        baud: Option<u32>,
        /// Read timeout in seconds
        #[arg(value_parser = parse_seconds)]
        timeout: Option<Duration>,
    },
    /// Stream readings until interrupted
    ReadContinuous {
        port: String,
        /// Pause between reads in milliseconds
        #[arg(long, value_parser = parse_millis)]
        interval: Option<Duration>,
        /// Poll at the fast interval and print every reading
        #[arg(long)]
        fast: bool,
        /// Stop after this many reads
        #[arg(long)]
        count: Option<u64>,
    },
    /// Time a series of reads
    LatencyTest {
        port: String,
        /// Number of reads
        #[arg(long)]
        samples: Option<usize>,
    },
    /// Close the connection
    Close,
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|_| format!("invalid number of seconds: {}", s))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid timeout {}: {}", s, e))
}

fn parse_millis(s: &str) -> Result<Duration, String> {
    s.parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| format!("invalid number of milliseconds: {}", s))
}

#[derive(Serialize)]
struct PortList {
    ports: Vec<scale_detect::SerialPortInfo>,
}

#[derive(Serialize)]
struct Message {
    message: &'static str,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

/// Set `stop` on Ctrl-C
fn stop_on_interrupt() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping");
            flag.store(true, Ordering::Relaxed);
        }
    });
    stop
}

fn prober(settings: &Settings) -> ScaleProber<CliOpener> {
    ScaleProber::with_config(CliOpener::new(), settings.probe_config())
}

fn list_ports(settings: &Settings) -> io::Result<()> {
    let scanner = PortScanner::with_config(settings.scanner_config());
    let mut out = io::stdout().lock();
    match scanner.enumerate_ports() {
        Ok(ports) => emit(&mut out, &Success::new(PortList { ports })),
        Err(e) => emit(&mut out, &Failure::from(&e)),
    }
}

fn connect(settings: &Settings, port: Option<String>, timeout: Duration) -> io::Result<()> {
    let prober = prober(settings);
    let mut slot = None;

    let result = match port {
        Some(port) => prober.connect(&mut slot, &port, timeout),
        None => PortScanner::with_config(settings.scanner_config())
            .enumerate_ports()
            .and_then(|ports| {
                let devices: Vec<_> = ports.into_iter().map(|p| p.device).collect();
                prober.connect_any(&mut slot, devices.as_slice(), timeout)
            }),
    };

    let mut out = io::stdout().lock();
    match result {
        Ok(report) => emit(&mut out, &Success::new(Connected::from(&report)))?,
        Err(e) => emit(&mut out, &Failure::from(&e))?,
    }

    if let Some(mut session) = slot.take() {
        session.close();
    }
    Ok(())
}

fn read(settings: &Settings, port: Option<String>, baud: Option<u32>, timeout: Duration) -> io::Result<()> {
    let mut out = io::stdout().lock();
    let Some(port) = port else {
        return emit(&mut out, &Failure::message("a port is required for a single read"));
    };

    match prober(settings).read_once(&port, baud, timeout) {
        Ok(once) => emit(&mut out, &Success::new(&once)),
        Err(e) => emit(&mut out, &Failure::from(&e)),
    }
}

async fn run(command: Command, settings: Settings) -> anyhow::Result<()> {
    match command {
        Command::ListPorts => {
            tokio::task::spawn_blocking(move || list_ports(&settings)).await??;
        }
        Command::Connect { port, timeout } => {
            let timeout = timeout.unwrap_or(settings.timeout());
            tokio::task::spawn_blocking(move || connect(&settings, port, timeout)).await??;
        }
        Command::Read { port, baud, timeout } => {
            let timeout = timeout.unwrap_or(settings.timeout());
            tokio::task::spawn_blocking(move || read(&settings, port, baud, timeout)).await??;
        }
        Command::ReadContinuous {
            port,
            interval,
            fast,
            count,
        } => {
            let options = ContinuousOptions {
                interval: interval.unwrap_or(settings.interval(fast)),
                gate: if fast {
                    PrintGate::always()
                } else {
                    PrintGate::new(settings.print_every)
                },
                limit: count,
            };
            let driver = PollDriver::new(prober(&settings), ScaleReader::low_latency(), port, settings.timeout());
            let stop = stop_on_interrupt();

            info!("Reading continuously (Ctrl+C to stop)");
            let summary = tokio::task::spawn_blocking(move || {
                driver.run_continuous(&options, &stop, &mut io::stdout().lock())
            })
            .await?
            .context("Failed to write readings")?;
            info!("Total iterations: {}", summary.iterations);
        }
        Command::LatencyTest { port, samples } => {
            let samples = samples.unwrap_or(settings.latency_samples);
            let pause = settings.latency_pause();
            let driver = PollDriver::new(prober(&settings), ScaleReader::low_latency(), port, settings.timeout());
            let stop = stop_on_interrupt();

            tokio::task::spawn_blocking(move || driver.run_latency(samples, pause, &stop, &mut io::stdout().lock()))
                .await?
                .context("Failed to write latency results")?;
        }
        Command::Close => {
            // Sessions never outlive a single invocation
            emit(
                &mut io::stdout().lock(),
                &Success::new(Message {
                    message: "connection closed",
                }),
            )?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = Options::parse();
    init_tracing(options.verbose);

    let settings = Settings::load(options.config.as_deref())?;
    run(options.command, settings).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Options::command().debug_assert();
    }

    #[test]
    fn test_parse_read_arguments() {
        let options = Options::try_parse_from(["scaleprobe", "read", "COM3", "2400", "0.25"]).unwrap();
        match options.command {
            Command::Read { port, baud, timeout } => {
                assert_eq!(port.as_deref(), Some("COM3"));
                assert_eq!(baud, Some(2400));
                assert_eq!(timeout, Some(Duration::from_millis(250)));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_continuous_flags() {
        let options =
            Options::try_parse_from(["scaleprobe", "read-continuous", "SIM:cas", "--fast", "--interval", "5"]).unwrap();
        match options.command {
            Command::ReadContinuous { port, interval, fast, count } => {
                assert_eq!(port, "SIM:cas");
                assert_eq!(interval, Some(Duration::from_millis(5)));
                assert!(fast);
                assert_eq!(count, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_bad_timeout_rejected() {
        assert!(Options::try_parse_from(["scaleprobe", "connect", "COM3", "-1"]).is_err());
        assert!(parse_seconds("abc").is_err());
        assert_eq!(parse_seconds("0.1").unwrap(), Duration::from_millis(100));
    }
}
