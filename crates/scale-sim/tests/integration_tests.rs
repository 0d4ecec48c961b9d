//! Integration tests for scale detection against virtual scales
//!
//! These tests drive the prober and reader end to end:
//! - Every recognised output style, streamed and on request
//! - Candidate ordering and adoption on first open
//! - Cache fallback when the scale goes quiet
//! - Device loss and reconnection
//! - Timeout handling of the low-latency profile

use std::time::Duration;

use proptest::prelude::*;
use scale_detect::{
    DetectError, ProbeConfig, ReadMethod, ReaderConfig, ScaleProber, ScaleReader, ScaleSession, CANDIDATES,
};
use scale_format::FormatTag;
use scale_sim::{ScaleFormat, VirtualPortOpener, VirtualScale, VirtualScaleConfig};

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    pub const TIMEOUT: Duration = Duration::from_millis(100);

    /// Prober that never sleeps between steps
    pub fn prober(opener: VirtualPortOpener) -> ScaleProber<VirtualPortOpener> {
        let config = ProbeConfig {
            open_settle: Duration::ZERO,
            command_wait_factor: 0.0,
        };
        ScaleProber::with_config(opener, config)
    }

    /// Prober serving a single scale on `port`
    pub fn prober_for(port: &str, scale: &VirtualScale) -> ScaleProber<VirtualPortOpener> {
        prober(VirtualPortOpener::new().with_scale(port, scale.clone()))
    }

    /// Standard profile with the waits taken out
    pub fn quick_reader() -> ScaleReader {
        ScaleReader::new(ReaderConfig {
            command_settle: Duration::ZERO,
            automatic_wait: None,
            ..ReaderConfig::standard()
        })
    }

    /// Probe `port` and unwrap the session
    pub fn session_on(prober: &ScaleProber<VirtualPortOpener>, port: &str) -> ScaleSession {
        let (session, _) = prober.probe(port, TIMEOUT).unwrap();
        session
    }
}

use helpers::*;

// ============================================================================
// End-to-End Formats
// ============================================================================

#[test]
fn test_streaming_torrey_end_to_end() {
    let scale = VirtualScale::streaming(ScaleFormat::Torrey, 1.5);
    let prober = prober_for("bench", &scale);

    let (mut session, report) = prober.probe("bench", TIMEOUT).unwrap();
    assert!(report.has_initial_weight);
    assert_eq!(report.initial_weight, 1.5);
    assert_eq!(report.params, CANDIDATES[0].with_timeout(TIMEOUT));
    assert_eq!(report.detected_baud(), 9600);

    let reading = ScaleReader::standard().read(&mut session).unwrap();
    assert_eq!(reading.weight, 1.5);
    assert!(reading.has_weight());
}

#[test]
fn test_on_demand_formats_end_to_end() {
    let cases = [
        (ScaleFormat::Torrey, 25.125, FormatTag::Torrey),
        (ScaleFormat::Cas, 12.34, FormatTag::Cas),
        (ScaleFormat::Signed, 7.89, FormatTag::Signed),
        (ScaleFormat::Simple, 4.75, FormatTag::Signed),
        (ScaleFormat::Grams, 2.5, FormatTag::Grams),
    ];

    for (format, weight, tag) in cases {
        let scale = VirtualScale::on_demand(format, weight);
        let prober = prober_for("bench", &scale);
        let mut session = session_on(&prober, "bench");

        let reading = quick_reader().read(&mut session).unwrap();
        assert_eq!(reading.method, ReadMethod::Command, "{:?}", format);
        assert_eq!(reading.format, tag, "{:?}", format);
        assert!((reading.weight - weight).abs() < 1e-9, "{:?}", format);
        assert_eq!(scale.writes().last().unwrap().as_slice(), b"P\r\n");
    }
}

#[test]
fn test_garbage_scale_reports_no_recent_data() {
    let scale = VirtualScale::streaming(ScaleFormat::Garbage, 0.0);
    let prober = prober_for("bench", &scale);

    let (mut session, report) = prober.probe("bench", TIMEOUT).unwrap();
    assert!(!report.has_initial_weight);
    assert_eq!(report.initial_weight, 0.0);

    let reading = quick_reader().read(&mut session).unwrap();
    assert_eq!(reading.method, ReadMethod::NoRecentData);
    assert_eq!(reading.weight, 0.0);
    assert_eq!(reading.format, FormatTag::Unknown);
}

#[test]
fn test_low_latency_garbage_stream_terminates() {
    let scale = VirtualScale::streaming(ScaleFormat::Garbage, 0.0);
    let prober = prober_for("bench", &scale);
    let mut session = session_on(&prober, "bench");

    let reading = ScaleReader::low_latency().read(&mut session).unwrap();
    assert_eq!(reading.method, ReadMethod::NoRecentData);
}

// ============================================================================
// Candidate Ordering
// ============================================================================

#[test]
fn test_first_open_wins_over_later_weight() {
    // 9600 opens but speaks noise; only 2400/7E1 would produce a weight
    let scale = VirtualScale::from_config(VirtualScaleConfig {
        format: ScaleFormat::Torrey,
        mode: scale_sim::TransmitMode::OnDemand,
        initial_weight: 3.0,
        native_params: Some(CANDIDATES[2]),
        accepted_bauds: vec![9600, 2400],
        ..Default::default()
    });
    let prober = prober_for("bench", &scale);

    let (session, report) = prober.probe("bench", TIMEOUT).unwrap();
    assert!(!report.has_initial_weight);
    assert_eq!(report.params.to_string(), "9600/8N1");
    assert_eq!(session.params().to_string(), "9600/8N1");
    assert_eq!(scale.opened_with().len(), 1);
}

#[test]
fn test_rejected_bauds_are_skipped() {
    let scale = VirtualScale::from_config(VirtualScaleConfig {
        accepted_bauds: vec![4800],
        ..Default::default()
    });
    let prober = prober_for("bench", &scale);

    let (_, report) = prober.probe("bench", TIMEOUT).unwrap();
    assert_eq!(report.params.to_string(), "4800/8N1");
    assert!(report.has_initial_weight);
}

#[test]
fn test_probe_fails_when_nothing_opens() {
    let scale = VirtualScale::from_config(VirtualScaleConfig {
        accepted_bauds: vec![110],
        ..Default::default()
    });
    let prober = prober_for("bench", &scale);

    let err = prober.probe("bench", TIMEOUT).unwrap_err();
    assert!(matches!(err, DetectError::AllCandidatesExhausted { ref port } if port == "bench"));
    assert!(!err.requires_connection());
}

#[test]
fn test_read_once_requires_a_weight() {
    let scale = VirtualScale::from_config(VirtualScaleConfig {
        mode: scale_sim::TransmitMode::OnDemand,
        initial_weight: 8.25,
        native_params: Some(CANDIDATES[2]),
        ..Default::default()
    });
    let prober = prober_for("bench", &scale);

    let once = prober.read_once("bench", None, TIMEOUT).unwrap();
    assert_eq!(once.params.to_string(), "2400/7E1");
    assert_eq!(once.reading.weight, 8.25);

    let opened: Vec<_> = scale.opened_with().iter().map(|p| p.to_string()).collect();
    assert_eq!(opened, vec!["9600/8N1", "9600/7E1", "2400/7E1"]);
}

#[test]
fn test_read_once_tries_preferred_baud_first() {
    let scale = VirtualScale::from_config(VirtualScaleConfig {
        native_params: Some(scale_detect::SerialParams::eight_n_one(1200)),
        ..Default::default()
    });
    let prober = prober_for("bench", &scale);

    let once = prober.read_once("bench", Some(1200), TIMEOUT).unwrap();
    assert_eq!(once.params.baud_rate, 1200);
    assert_eq!(scale.opened_with().len(), 1);
}

#[test]
fn test_read_once_without_weight() {
    let scale = VirtualScale::on_demand(ScaleFormat::Garbage, 0.0);
    let prober = prober_for("bench", &scale);

    let err = prober.read_once("bench", None, TIMEOUT).unwrap_err();
    assert!(matches!(err, DetectError::NoReading { .. }));
    assert_eq!(scale.opened_with().len(), CANDIDATES.len());
}

#[test]
fn test_connect_any_skips_missing_ports() {
    let prober = prober(VirtualPortOpener::new());
    let mut slot = None;

    let report = prober
        .connect_any(&mut slot, &["/dev/missing", "SIM:cas"][..], TIMEOUT)
        .unwrap();
    assert_eq!(report.port, "SIM:cas");
    assert_eq!(slot.as_ref().map(|s| s.port()), Some("SIM:cas"));

    let err = prober
        .connect_any(&mut slot, &["/dev/missing"][..], TIMEOUT)
        .unwrap_err();
    assert!(matches!(err, DetectError::NoScaleDetected));
    assert!(slot.is_none());
}

// ============================================================================
// Cache Fallback
// ============================================================================

#[test]
fn test_quiet_scale_served_from_cache() {
    let scale = VirtualScale::on_demand(ScaleFormat::Cas, 5.5);
    let prober = prober_for("bench", &scale);
    let mut session = session_on(&prober, "bench");
    let reader = quick_reader();

    assert_eq!(reader.read(&mut session).unwrap().method, ReadMethod::Command);

    scale.set_format(ScaleFormat::Garbage);
    let first = reader.read(&mut session).unwrap();
    let second = reader.read(&mut session).unwrap();

    for reading in [&first, &second] {
        assert_eq!(reading.method, ReadMethod::Cache);
        assert_eq!(reading.format, FormatTag::Cache);
        assert_eq!(reading.weight, 5.5);
    }
    assert!(second.age_ms.unwrap() >= first.age_ms.unwrap());

    // Cache hits do not refresh the cache
    let cached_at = session.cached().unwrap().received_at;
    reader.read(&mut session).unwrap();
    assert_eq!(session.cached().unwrap().received_at, cached_at);
}

#[test]
fn test_stale_cache_expires() {
    let scale = VirtualScale::on_demand(ScaleFormat::Signed, 9.0);
    let prober = prober_for("bench", &scale);
    let mut session = session_on(&prober, "bench");

    let reader = ScaleReader::new(ReaderConfig {
        freshness: Duration::from_millis(20),
        ..quick_reader().config().clone()
    });

    scale.set_format(ScaleFormat::Garbage);
    std::thread::sleep(Duration::from_millis(30));

    let reading = reader.read(&mut session).unwrap();
    assert_eq!(reading.method, ReadMethod::NoRecentData);
    assert_eq!(reading.weight, 0.0);
}

// ============================================================================
// Device Loss
// ============================================================================

#[test]
fn test_unplugged_scale_requires_reconnect() {
    let scale = VirtualScale::streaming(ScaleFormat::Torrey, 2.0);
    let prober = prober_for("bench", &scale);
    let mut slot = None;
    prober.connect(&mut slot, "bench", TIMEOUT).unwrap();

    scale.unplug();
    let reader = quick_reader();
    let session = slot.as_mut().unwrap();

    let err = reader.read(session).unwrap_err();
    assert!(matches!(err, DetectError::DeviceLost { .. }));
    assert!(err.requires_connection());
    assert!(!session.is_connected());

    let err = reader.read(session).unwrap_err();
    assert!(matches!(err, DetectError::NotConnected));
    assert!(err.requires_connection());

    scale.plug_in();
    prober.connect(&mut slot, "bench", TIMEOUT).unwrap();
    let reading = reader.read(slot.as_mut().unwrap()).unwrap();
    assert_eq!(reading.weight, 2.0);
}

#[test]
fn test_closed_session_is_not_connected() {
    let scale = VirtualScale::streaming(ScaleFormat::Cas, 1.25);
    let prober = prober_for("bench", &scale);
    let mut session = session_on(&prober, "bench");

    session.close();
    session.close();
    assert!(!session.is_connected());
    assert!(session.cached().is_none());
    assert!(matches!(
        quick_reader().read(&mut session),
        Err(DetectError::NotConnected)
    ));
}

// ============================================================================
// Low-Latency Profile
// ============================================================================

#[test]
fn test_low_latency_restores_timeout() {
    let scale = VirtualScale::on_demand(ScaleFormat::Torrey, 6.0);
    let prober = prober_for("bench", &scale);
    let mut session = session_on(&prober, "bench");

    let reading = ScaleReader::low_latency().read(&mut session).unwrap();
    assert_eq!(reading.weight, 6.0);
    assert_eq!(
        scale.timeout_changes(),
        vec![Duration::from_millis(1), TIMEOUT]
    );
}

#[test]
fn test_low_latency_restores_timeout_on_loss() {
    let scale = VirtualScale::streaming(ScaleFormat::Torrey, 6.0);
    let prober = prober_for("bench", &scale);
    let mut session = session_on(&prober, "bench");

    scale.unplug();
    assert!(ScaleReader::low_latency().read(&mut session).is_err());
    assert_eq!(
        scale.timeout_changes(),
        vec![Duration::from_millis(1), TIMEOUT]
    );
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #[test]
    fn prop_initial_weight_matches_frame(
        centi in 101u32..99_900,
        format in prop::sample::select(vec![
            ScaleFormat::Torrey,
            ScaleFormat::Cas,
            ScaleFormat::Signed,
            ScaleFormat::Simple,
            ScaleFormat::Grams,
        ]),
    ) {
        let weight = centi as f64 / 100.0;
        let scale = VirtualScale::on_demand(format, weight);
        let prober = prober_for("bench", &scale);

        let (_, report) = prober.probe("bench", TIMEOUT).unwrap();
        prop_assert!(report.has_initial_weight);
        prop_assert!((report.initial_weight - weight).abs() < 1e-9);
    }
}
