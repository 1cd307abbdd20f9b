//! Acquisition session behaviour against the simulated DAQ.

use std::time::Duration;

use power_acquisition::*;
use power_core::cancel::CancellationFlag;
use power_core::channel::{ChannelConfig, TerminalMode};
use power_core::error::{DriverErrorKind, PowerError};
use power_driver_mock::{ErrorConfig, ErrorScenario, MockChannel, MockDaq, MockMode};

fn settings() -> AcquisitionSettings {
    AcquisitionSettings {
        sample_rate: 1000.0,
        chunk_size: 250,
        compression_ratio: 50,
        max_chunk_retries: 2,
        read_timeout: Duration::from_millis(500),
        ..AcquisitionSettings::default()
    }
}

fn request(channels: Vec<ChannelConfig>, duration: Duration) -> AcquisitionRequest {
    AcquisitionRequest::builder(&settings())
        .channels(channels)
        .duration(duration)
        .build()
        .unwrap()
}

async fn run(daq: &MockDaq, request: AcquisitionRequest) -> Result<AcquisitionOutcome, PowerError> {
    let mut session = AcquisitionSession::new(request, AcquisitionGate::new())?;
    session.open(daq).await?;
    session.start().await?;
    session.stream(&CancellationFlag::new(), |_| {}).await?;
    session.finish().await
}

#[tokio::test]
async fn test_two_channel_capture() {
    let daq = MockDaq::builder()
        .channel("ai0", MockChannel::shunt_drop(0.0005))
        .channel("ai1", MockChannel::shunt_drop(0.0010))
        .build();
    let outcome = run(
        &daq,
        request(
            vec![
                ChannelConfig::new("ai0", "A", 0.01),
                ChannelConfig::new("ai1", "B", 0.01).with_scale_compensation(2.0),
            ],
            Duration::from_secs(5),
        ),
    )
    .await
    .unwrap();

    assert_eq!(outcome.samples_per_channel, 5000);
    assert_eq!(outcome.series.len(), 2);
    for series in &outcome.series {
        assert_eq!(series.len(), 100);
        assert_eq!(series.raw_len, 5000);
        assert_eq!(series.terminal_mode, TerminalMode::Differential);
        assert!(series.is_plausible_shunt_drop);
    }
    assert!((outcome.series[0].amps[0] - 0.05).abs() < 1e-9);
    assert!((outcome.series[1].amps[0] - 0.2).abs() < 1e-9);

    let rows = outcome.rows(2);
    assert_eq!(rows.len(), 100);
    for pair in rows.windows(2) {
        assert!((pair[1].time_elapsed - pair[0].time_elapsed - 0.05).abs() < 1e-9);
    }
    assert!(daq.all_handles_closed());
}

#[tokio::test]
async fn test_series_length_is_floor() {
    let daq = MockDaq::new();
    // 1234 raw samples at ratio 50 -> 24 complete blocks
    let outcome = run(
        &daq,
        request(vec![ChannelConfig::new("ai0", "A", 0.01)], Duration::from_millis(1234)),
    )
    .await
    .unwrap();
    assert_eq!(outcome.series[0].raw_len, 1234);
    assert_eq!(outcome.series[0].len(), 24);
}

#[tokio::test]
async fn test_negotiation_falls_back_in_order() {
    let daq = MockDaq::builder()
        .channel(
            "ai0",
            MockChannel::shunt_drop(0.001).accepting(&[
                TerminalMode::NonReferencedSingleEnded,
                TerminalMode::ReferencedSingleEnded,
            ]),
        )
        .build();
    let mut session = AcquisitionSession::new(
        request(vec![ChannelConfig::new("ai0", "A", 0.01)], Duration::from_secs(1)),
        AcquisitionGate::new(),
    )
    .unwrap();
    session.open(&daq).await.unwrap();

    let negotiated = &session.negotiated()[0];
    assert_eq!(negotiated.mode, TerminalMode::NonReferencedSingleEnded);
    let tried: Vec<_> = negotiated.rejected.iter().map(|(m, _)| *m).collect();
    assert_eq!(tried, vec![TerminalMode::Differential, TerminalMode::DeviceDefault]);
    session.abort().await;
    assert!(daq.all_handles_closed());
}

#[tokio::test]
async fn test_ground_fallback_flagged_implausible() {
    let daq = MockDaq::builder()
        .channel("ai0", MockChannel::shunt_drop(0.0005).rse_only(3.8))
        .build();
    let outcome = run(
        &daq,
        request(vec![ChannelConfig::new("ai0", "VBAT", 0.01)], Duration::from_secs(1)),
    )
    .await
    .unwrap();
    let series = &outcome.series[0];
    assert_eq!(series.terminal_mode, TerminalMode::ReferencedSingleEnded);
    assert!(!series.is_plausible_shunt_drop);
    // flagged, never corrected
    assert!((series.volts[0] - 3.8005).abs() < 1e-9);
    assert!(outcome
        .rows(0)
        .iter()
        .all(|row| !row.readings["ai0"].plausible_shunt_drop));
}

#[tokio::test]
async fn test_small_ground_reading_stays_plausible() {
    let daq = MockDaq::builder()
        .channel("ai0", MockChannel::shunt_drop(0.002).rse_only(0.0))
        .build();
    let outcome = run(
        &daq,
        request(vec![ChannelConfig::new("ai0", "VBAT", 0.01)], Duration::from_secs(1)),
    )
    .await
    .unwrap();
    assert!(outcome.series[0].is_plausible_shunt_drop);
}

#[tokio::test]
async fn test_no_mode_accepted() {
    let daq = MockDaq::builder()
        .channel("ai0", MockChannel::default())
        .channel("ai3", MockChannel::shunt_drop(0.001).accepting(&[]))
        .build();
    let mut session = AcquisitionSession::new(
        request(
            vec![
                ChannelConfig::new("ai0", "A", 0.01),
                ChannelConfig::new("ai3", "D", 0.01),
            ],
            Duration::from_secs(1),
        ),
        AcquisitionGate::new(),
    )
    .unwrap();

    let err = session.open(&daq).await.unwrap_err();
    match err {
        PowerError::ChannelConfiguration { channel, attempts } => {
            assert_eq!(channel, "ai3");
            assert_eq!(attempts.len(), 4);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(session.state(), SessionState::Failed);
    assert!(daq.all_handles_closed());
}

#[tokio::test]
async fn test_open_failure_not_retried() {
    let daq = MockDaq::builder()
        .fail_open(DriverErrorKind::Initialization)
        .build();
    let mut session = AcquisitionSession::new(
        request(vec![ChannelConfig::new("ai0", "A", 0.01)], Duration::from_secs(1)),
        AcquisitionGate::new(),
    )
    .unwrap();
    let err = session.open(&daq).await.unwrap_err();
    assert!(matches!(err, PowerError::Driver(ref e) if e.kind == DriverErrorKind::Initialization));
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(daq.open_count(), 0);
}

#[tokio::test]
async fn test_transient_read_failures_retried() {
    let daq = MockDaq::builder()
        .error_config(ErrorConfig::scenario(ErrorScenario::FailFirst {
            operation: "read",
            count: 2,
        }))
        .build();
    let outcome = run(
        &daq,
        request(vec![ChannelConfig::new("ai0", "A", 0.01)], Duration::from_secs(1)),
    )
    .await
    .unwrap();
    assert_eq!(outcome.samples_per_channel, 1000);
}

#[tokio::test]
async fn test_read_retry_bound_exhausted() {
    let daq = MockDaq::builder()
        .error_config(ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "read",
            count: 1,
        }))
        .build();
    let mut session = AcquisitionSession::new(
        request(vec![ChannelConfig::new("ai0", "A", 0.01)], Duration::from_secs(1)),
        AcquisitionGate::new(),
    )
    .unwrap();
    session.open(&daq).await.unwrap();
    session.start().await.unwrap();
    let err = session
        .stream(&CancellationFlag::new(), |_| {})
        .await
        .unwrap_err();

    match err {
        PowerError::AcquisitionTimeout { chunk, attempts, .. } => {
            assert_eq!(chunk, 1);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(session.state(), SessionState::Failed);
    assert!(!session.holds_handle());
    assert!(daq.all_handles_closed());
}

#[tokio::test(start_paused = true)]
async fn test_slow_reads_time_out() {
    // 250 samples at 100 Hz need 2.5 s, beyond the 500 ms deadline
    let daq = MockDaq::builder().mode(MockMode::Realistic).build();
    let request = AcquisitionRequest::builder(&settings())
        .channels(vec![ChannelConfig::new("ai0", "A", 0.01)])
        .sample_rate(100.0)
        .duration(Duration::from_secs(5))
        .build()
        .unwrap();
    let err = run(&daq, request).await.unwrap_err();
    assert!(matches!(err, PowerError::AcquisitionTimeout { chunk: 0, .. }));
    assert!(daq.all_handles_closed());
}

#[tokio::test]
async fn test_cancel_keeps_collected_chunks() {
    let daq = MockDaq::new();
    let mut session = AcquisitionSession::new(
        request(vec![ChannelConfig::new("ai0", "A", 0.01)], Duration::from_secs(5)),
        AcquisitionGate::new(),
    )
    .unwrap();
    session.open(&daq).await.unwrap();
    session.start().await.unwrap();

    let cancel = CancellationFlag::new();
    let observer = cancel.clone();
    session
        .stream(&cancel, |p| {
            if p.chunks == 3 {
                observer.cancel();
            }
        })
        .await
        .unwrap();
    let outcome = session.finish().await.unwrap();
    assert!(outcome.cancelled);
    assert_eq!(outcome.samples_per_channel, 750);
    assert_eq!(outcome.series[0].len(), 15);
    assert!(daq.all_handles_closed());
}

#[tokio::test(start_paused = true)]
async fn test_open_ended_capture_reads_what_is_due() {
    let daq = MockDaq::new();
    let request = AcquisitionRequest::builder(&settings())
        .channels(vec![ChannelConfig::new("ai0", "A", 0.01)])
        .build()
        .unwrap();
    let mut session = AcquisitionSession::new(request, AcquisitionGate::new()).unwrap();
    session.open(&daq).await.unwrap();
    session.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    session.stream(&CancellationFlag::new(), |_| {}).await.unwrap();
    assert_eq!(session.samples_read(), 600);

    let outcome = session.finish().await.unwrap();
    assert_eq!(outcome.series[0].len(), 12);
}

#[tokio::test]
async fn test_dropped_session_closes_handle() {
    let daq = MockDaq::new();
    {
        let mut session = AcquisitionSession::new(
            request(vec![ChannelConfig::new("ai0", "A", 0.01)], Duration::from_secs(1)),
            AcquisitionGate::new(),
        )
        .unwrap();
        session.open(&daq).await.unwrap();
    }
    tokio::task::yield_now().await;
    assert!(daq.all_handles_closed());
}
