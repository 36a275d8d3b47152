//! Tests for the AccessEngine module

use super::*;
use crate::domain::booking::BookingRecord;
use crate::domain::types::PlateCandidate;
use crate::io::egress_channel::{create_egress_channel, EgressMessage};
use crate::io::ledger::MemoryLedger;
use chrono::TimeZone;

/// Test harness that keeps channel receivers alive so `try_send` succeeds
struct TestEngine {
    engine: AccessEngine,
    gate_rx: mpsc::Receiver<ActuationSignal>,
    egress_rx: mpsc::Receiver<EgressMessage>,
    ledger: Arc<MemoryLedger>,
    dir: tempfile::TempDir,
}

impl std::ops::Deref for TestEngine {
    type Target = AccessEngine;
    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

impl std::ops::DerefMut for TestEngine {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.engine
    }
}

impl TestEngine {
    fn signals(&mut self) -> Vec<ActuationSignal> {
        let mut out = Vec::new();
        while let Ok(signal) = self.gate_rx.try_recv() {
            out.push(signal);
        }
        out
    }

    fn access_log_lines(&self) -> Vec<serde_json::Value> {
        let path = self.dir.path().join("access.jsonl");
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }
}

fn create_test_engine() -> TestEngine {
    create_test_engine_with_config(Config::default())
}

fn create_test_engine_with_config(config: Config) -> TestEngine {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("access.jsonl");
    let config = config.with_access_log_file(log_path.to_str().unwrap());

    let metrics = Arc::new(Metrics::new());
    let ledger = Arc::new(MemoryLedger::default());
    let resolver = BookingResolver::new(ledger.clone(), metrics.clone());
    let (gate_tx, gate_rx) = mpsc::channel(16);
    let (egress_sender, egress_rx) = create_egress_channel(64, "test-site".to_string());
    let engine = AccessEngine::new(config, resolver, gate_tx, metrics, Some(egress_sender));
    TestEngine { engine, gate_rx, egress_rx, ledger, dir }
}

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, h, m, 0).unwrap()
}

fn book(ledger: &MemoryLedger, plate_no: &str, entry: DateTime<Utc>, exit: DateTime<Utc>) {
    ledger.insert(BookingRecord { plate_no: plate_no.to_string(), entry_time: entry, exit_time: exit });
}

fn frame(seq: u64, readings: &[(i64, &str)]) -> PlateFrame {
    PlateFrame::new(
        seq,
        readings
            .iter()
            .map(|(region, text)| PlateCandidate {
                region_id: RegionId(*region),
                raw_text: text.to_string(),
            })
            .collect(),
    )
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

#[tokio::test]
async fn test_noisy_readings_confirm_exactly_once() {
    let mut t = create_test_engine();
    book(&t.ledger, "ab12cd3456", at(9, 0), at(10, 0));
    let now = Instant::now();

    let first = t.process_frame_at(PlateFrame::single(1, "ab-12 cd 3456"), now, at(9, 15)).await;
    assert!(first.is_empty());

    let second =
        t.process_frame_at(PlateFrame::single(2, "AB12CD3456"), now + millis(40), at(9, 15)).await;
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].plate().as_str(), "AB12CD3456");
    assert_eq!(second[0].decision(), Some(&Decision::Authorize));
    assert_eq!(t.metrics.confirmations_total(), 1);

    let signals = t.signals();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].plate.as_str(), "AB12CD3456");
}

#[tokio::test]
async fn test_authorize_sets_gate_open_and_cooldown() {
    let mut t = create_test_engine();
    book(&t.ledger, "ab12cd3456", at(9, 0), at(10, 0));
    let now = Instant::now();
    let gate_rx = t.subscribe_gate();

    t.process_frame_at(PlateFrame::single(1, "AB12CD3456"), now, at(9, 15)).await;
    t.process_frame_at(PlateFrame::single(2, "AB12CD3456"), now, at(9, 15)).await;

    assert!(gate_rx.borrow().is_open);
    assert_eq!(gate_rx.borrow().cooldown_until, Some(now + millis(3000)));

    t.tick(now + millis(3000));
    assert!(!gate_rx.borrow().is_open);
    assert_eq!(t.gate().phase(), crate::services::gate::GatePhase::Idle);
}

#[tokio::test]
async fn test_lingering_vehicle_is_throttled_during_cooldown() {
    let mut t = create_test_engine();
    book(&t.ledger, "ab12cd3456", at(9, 0), at(10, 0));
    let now = Instant::now();

    for seq in 0..6 {
        t.process_frame_at(PlateFrame::single(seq, "AB12CD3456"), now + millis(seq * 100), at(9, 15))
            .await;
    }

    // Three confirmations: one decided, two throttled
    assert_eq!(t.metrics.confirmations_total(), 3);
    assert_eq!(t.metrics.report().confirmations_throttled, 2);
    assert_eq!(t.signals().len(), 1);

    // After the cooldown the same plate actuates again
    t.process_frame_at(PlateFrame::single(10, "AB12CD3456"), now + millis(3100), at(9, 16)).await;
    let out =
        t.process_frame_at(PlateFrame::single(11, "AB12CD3456"), now + millis(3200), at(9, 16)).await;
    assert_eq!(out[0].decision(), Some(&Decision::Authorize));
    assert_eq!(t.signals().len(), 1);
}

#[tokio::test]
async fn test_unknown_plate_denies_and_throttles() {
    let mut t = create_test_engine();
    let now = Instant::now();

    t.process_frame_at(PlateFrame::single(1, "XY99ZZ0001"), now, at(9, 15)).await;
    let out = t.process_frame_at(PlateFrame::single(2, "XY99ZZ0001"), now, at(9, 15)).await;
    assert_eq!(out[0].decision(), Some(&Decision::Deny));
    assert!(t.signals().is_empty());
    assert_eq!(t.gate().phase(), crate::services::gate::GatePhase::Cooldown);

    // A different plate inside the throttle window does not query the ledger
    book(&t.ledger, "ab12cd3456", at(9, 0), at(10, 0));
    t.process_frame_at(PlateFrame::single(3, "AB12CD3456"), now + millis(500), at(9, 15)).await;
    let out =
        t.process_frame_at(PlateFrame::single(4, "AB12CD3456"), now + millis(600), at(9, 15)).await;
    assert!(matches!(out[0], CycleOutcome::Throttled { .. }));
    assert!(t.signals().is_empty());
}

#[tokio::test]
async fn test_early_arrival_reports_start_time() {
    let mut t = create_test_engine();
    book(&t.ledger, "ab12cd3456", at(10, 0), at(10, 30));
    let now = Instant::now();

    t.process_frame_at(PlateFrame::single(1, "AB12CD3456"), now, at(9, 45)).await;
    let out = t.process_frame_at(PlateFrame::single(2, "AB12CD3456"), now, at(9, 45)).await;
    assert_eq!(out[0].decision(), Some(&Decision::AuthorizeLater(at(10, 0))));
    assert!(t.signals().is_empty());

    let lines = t.access_log_lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["decision"], "authorize_later");
    assert_eq!(lines[0]["starts_at"], "2026-10-19T10:00:00+00:00");
    assert_eq!(lines[0]["actuated"], false);
}

#[tokio::test]
async fn test_expired_then_future_booking_is_authorize_later() {
    let mut t = create_test_engine();
    // Inserted out of order; the resolver sorts by entry time
    book(&t.ledger, "ab12cd3456", at(10, 0), at(10, 30));
    book(&t.ledger, "ab12cd3456", at(9, 0), at(9, 30));
    let now = Instant::now();

    t.process_frame_at(PlateFrame::single(1, "AB12CD3456"), now, at(9, 45)).await;
    let out = t.process_frame_at(PlateFrame::single(2, "AB12CD3456"), now, at(9, 45)).await;
    assert_eq!(out[0].decision(), Some(&Decision::AuthorizeLater(at(10, 0))));
}

#[tokio::test]
async fn test_ledger_outage_denies_without_crashing() {
    let mut t = create_test_engine();
    book(&t.ledger, "ab12cd3456", at(9, 0), at(10, 0));
    t.ledger.set_offline(true);
    let now = Instant::now();

    t.process_frame_at(PlateFrame::single(1, "AB12CD3456"), now, at(9, 15)).await;
    let out = t.process_frame_at(PlateFrame::single(2, "AB12CD3456"), now, at(9, 15)).await;
    match &out[0] {
        CycleOutcome::Decided { decision, ledger_error, actuated, .. } => {
            assert_eq!(*decision, Decision::Deny);
            assert!(*ledger_error);
            assert!(!*actuated);
        }
        other => panic!("expected Decided, got {other:?}"),
    }
    assert_eq!(t.metrics.ledger_errors_total(), 1);

    // Ledger back: the next confirmation after the throttle retries it
    t.ledger.set_offline(false);
    let later = now + millis(3000);
    t.process_frame_at(PlateFrame::single(3, "AB12CD3456"), later, at(9, 16)).await;
    let out = t.process_frame_at(PlateFrame::single(4, "AB12CD3456"), later, at(9, 16)).await;
    assert_eq!(out[0].decision(), Some(&Decision::Authorize));
}

#[tokio::test]
async fn test_alternating_misreads_never_confirm() {
    let mut t = create_test_engine();
    book(&t.ledger, "ab12cd3456", at(9, 0), at(10, 0));
    let now = Instant::now();

    for (seq, text) in ["AB12CD3456", "AB12CD3458", "AB12CD3456", "A812CD3456"].iter().enumerate() {
        let out = t.process_frame_at(PlateFrame::single(seq as u64, text), now, at(9, 15)).await;
        assert!(out.is_empty());
    }
    assert_eq!(t.metrics.confirmations_total(), 0);
}

#[tokio::test]
async fn test_empty_and_garbage_readings_are_not_votes() {
    let mut t = create_test_engine();
    book(&t.ledger, "ab12cd3456", at(9, 0), at(10, 0));
    let now = Instant::now();

    t.process_frame_at(PlateFrame::single(1, "AB12CD3456"), now, at(9, 15)).await;
    t.process_frame_at(PlateFrame::single(2, "   "), now, at(9, 15)).await;
    t.process_frame_at(PlateFrame::single(3, "-- .."), now, at(9, 15)).await;
    let out = t.process_frame_at(PlateFrame::single(4, "AB12CD3456"), now, at(9, 15)).await;

    // Empty readings left the window untouched
    assert_eq!(out.len(), 1);
    assert_eq!(t.metrics.report().readings_discarded, 2);
}

#[tokio::test]
async fn test_per_region_windows_do_not_cross_contaminate() {
    let mut t = create_test_engine();
    book(&t.ledger, "ab12cd3456", at(9, 0), at(10, 0));
    let now = Instant::now();

    // Two vehicles in frame, each read consistently in its own region
    t.process_frame_at(frame(1, &[(1, "AB12CD3456"), (2, "XY99ZZ0001")]), now, at(9, 15)).await;
    let out =
        t.process_frame_at(frame(2, &[(1, "AB12CD3456"), (2, "XY99ZZ0001")]), now, at(9, 15)).await;

    assert_eq!(out.len(), 2);
    assert_eq!(out[0].decision(), Some(&Decision::Authorize));
    // Second confirmation lands inside the first one's cooldown
    assert!(matches!(&out[1], CycleOutcome::Throttled { region_id, .. } if *region_id == RegionId(2)));
    assert_eq!(t.active_regions(), 2);
}

#[tokio::test]
async fn test_shared_stabilizer_when_per_region_disabled() {
    let mut t = create_test_engine_with_config(Config::default().with_recognition(false, false));
    book(&t.ledger, "ab12cd3456", at(9, 0), at(10, 0));
    let now = Instant::now();

    // Interleaved regions bump each other out of the shared window
    t.process_frame_at(frame(1, &[(1, "AB12CD3456"), (2, "XY99ZZ0001")]), now, at(9, 15)).await;
    let out =
        t.process_frame_at(frame(2, &[(1, "AB12CD3456"), (2, "XY99ZZ0001")]), now, at(9, 15)).await;
    assert!(out.is_empty());
    assert_eq!(t.active_regions(), 1);
}

#[tokio::test]
async fn test_strict_format_gates_when_required() {
    let mut t = create_test_engine_with_config(Config::default().with_recognition(true, true));
    book(&t.ledger, "tmp1", at(9, 0), at(10, 0));
    let now = Instant::now();

    t.process_frame_at(PlateFrame::single(1, "tmp-1"), now, at(9, 15)).await;
    let out = t.process_frame_at(PlateFrame::single(2, "TMP1"), now, at(9, 15)).await;
    assert!(out.is_empty());
    assert_eq!(t.metrics.report().readings_discarded, 2);
}

#[tokio::test]
async fn test_non_strict_plate_matches_ledger_by_default() {
    let mut t = create_test_engine();
    book(&t.ledger, "tmp1", at(9, 0), at(10, 0));
    let now = Instant::now();

    t.process_frame_at(PlateFrame::single(1, "tmp-1"), now, at(9, 15)).await;
    let out = t.process_frame_at(PlateFrame::single(2, "TMP1"), now, at(9, 15)).await;
    assert_eq!(out[0].decision(), Some(&Decision::Authorize));
}

#[tokio::test]
async fn test_idle_regions_are_evicted() {
    let mut t = create_test_engine();
    let now = Instant::now();

    t.process_frame_at(frame(1, &[(1, "AB12CD3456"), (2, "XY99ZZ0001")]), now, at(9, 15)).await;
    assert_eq!(t.active_regions(), 2);

    t.process_frame_at(frame(2, &[(1, "AB12CD3456")]), now + Duration::from_secs(8), at(9, 15))
        .await;
    t.tick(now + Duration::from_secs(11));
    assert_eq!(t.active_regions(), 1);
}

#[tokio::test]
async fn test_zero_idle_setting_still_confirms_across_tick() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("idle.toml");
    std::fs::write(
        &path,
        r#"
[mqtt]
host = "h"
port = 1

[ledger]
mode = "memory"

[gate]
mode = "log"

[recognition]
region_idle_secs = 0
"#,
    )
    .unwrap();
    let config = Config::from_file(&path).unwrap();

    let mut t = create_test_engine_with_config(config);
    book(&t.ledger, "ab12cd3456", at(9, 0), at(10, 0));
    let now = Instant::now();

    let first = t.process_frame_at(PlateFrame::single(1, "AB12CD3456"), now, at(9, 15)).await;
    assert!(first.is_empty());
    t.tick(now + millis(50));
    assert_eq!(t.active_regions(), 1);

    let second =
        t.process_frame_at(PlateFrame::single(2, "AB12CD3456"), now + millis(100), at(9, 15)).await;
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].decision(), Some(&Decision::Authorize));
}

#[tokio::test]
async fn test_decision_published_to_egress() {
    let mut t = create_test_engine();
    book(&t.ledger, "ab12cd3456", at(9, 0), at(10, 0));
    let now = Instant::now();

    t.process_frame_at(PlateFrame::single(1, "AB12CD3456"), now, at(9, 15)).await;
    t.process_frame_at(PlateFrame::single(2, "AB12CD3456"), now, at(9, 15)).await;

    let mut decisions = Vec::new();
    let mut gate_states = Vec::new();
    while let Ok(msg) = t.egress_rx.try_recv() {
        match msg {
            EgressMessage::Decision(p) => decisions.push(p),
            EgressMessage::GateState(p) => gate_states.push(p),
            EgressMessage::Metrics(_) => {}
        }
    }
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].site.as_deref(), Some("test-site"));
    assert_eq!(decisions[0].decision, "authorize");
    assert!(decisions[0].actuated);
    assert_eq!(decisions[0].bookings, 1);
    assert_eq!(gate_states.last().map(|g| g.phase.as_str()), Some("cooldown"));
}

#[tokio::test]
async fn test_full_signal_channel_counts_drop() {
    let mut t = create_test_engine();
    book(&t.ledger, "ab12cd3456", at(9, 0), at(10, 0));
    let (gate_tx, _gate_rx) = mpsc::channel(1);
    gate_tx
        .try_send(ActuationSignal {
            cycle_id: "filler".to_string(),
            plate: crate::domain::plate::normalize("FILLER"),
            issued_at: Instant::now(),
        })
        .unwrap();
    t.gate_tx = gate_tx;
    let now = Instant::now();

    t.process_frame_at(PlateFrame::single(1, "AB12CD3456"), now, at(9, 15)).await;
    let out = t.process_frame_at(PlateFrame::single(2, "AB12CD3456"), now, at(9, 15)).await;
    assert!(matches!(out[0], CycleOutcome::Decided { actuated: false, .. }));
    assert_eq!(t.metrics.report().signals_dropped, 1);
}

#[tokio::test]
async fn test_run_returns_source_exhausted_when_channel_closes() {
    let mut t = create_test_engine();
    let (frame_tx, frame_rx) = mpsc::channel(8);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    frame_tx.send(PlateFrame::single(1, "AB12CD3456")).await.unwrap();
    frame_tx.send(PlateFrame::single(2, "AB12CD3456")).await.unwrap();
    drop(frame_tx);

    let result = t.run(frame_rx, shutdown_rx).await;
    assert!(matches!(result, Err(EngineError::SourceExhausted { frames: 2 })));
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let mut t = create_test_engine();
    let (_frame_tx, frame_rx) = mpsc::channel::<PlateFrame>(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move { t.engine.run(frame_rx, shutdown_rx).await });
    shutdown_tx.send(true).unwrap();
    let result = handle.await.unwrap();
    assert!(result.is_ok());
}
