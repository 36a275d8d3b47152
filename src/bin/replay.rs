//! Plate gate replay - dry run against recorded frames
//!
//! Feeds a JSONL file of frame messages (the MQTT payload format) through the
//! engine with a JSON bookings file as the ledger and the log actuator as the
//! gate. Frames are spaced on a virtual clock, so cooldowns behave as they
//! would live without the replay having to sleep.
//!
//! Usage:
//!   cargo run --bin plate-replay -- --frames frames.jsonl --bookings bookings.json \
//!       --at 2026-10-19T09:15:00Z

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use plate_gate::infra::{ActuatorMode, Config, Metrics};
use plate_gate::io::replay::replay_file;
use plate_gate::io::{build_actuator, build_ledger};
use plate_gate::services::{create_gate_worker, AccessEngine, BookingResolver, CycleOutcome};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "plate-replay", version, about = "Replay recorded plate frames")]
struct Args {
    /// JSONL file with one frame message per line
    #[arg(short, long)]
    frames: String,

    /// JSON array of booking records
    #[arg(short, long, default_value = "bookings.json")]
    bookings: String,

    /// TOML configuration (recognition and gate settings)
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,

    /// Wall-clock time of the first frame (RFC 3339); defaults to now
    #[arg(long)]
    at: Option<DateTime<Utc>>,

    /// Virtual time between consecutive frames
    #[arg(long, default_value_t = 100)]
    frame_interval_ms: u64,

    /// Append decisions to this JSONL file
    #[arg(long, default_value = "")]
    access_log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load_from_path(&args.config)
        .with_ledger_file(&args.bookings)
        .with_gate_mode(ActuatorMode::Log)
        .with_access_log_file(&args.access_log);

    let metrics = Arc::new(Metrics::new());
    let ledger = build_ledger(&config).context("failed to initialize booking ledger")?;
    let actuator = build_actuator(&config).context("failed to initialize gate actuator")?;
    let (gate_tx, gate_worker) = create_gate_worker(actuator, metrics.clone(), 16);
    let worker_handle = tokio::spawn(gate_worker.run());

    let (frame_tx, mut frame_rx) = mpsc::channel(64);
    let replay_metrics = metrics.clone();
    let frames_path = args.frames.clone();
    let reader = tokio::spawn(async move {
        replay_file(frames_path, frame_tx, replay_metrics, Duration::ZERO).await
    });

    let resolver = BookingResolver::new(ledger, metrics.clone());
    let mut engine = AccessEngine::new(config, resolver, gate_tx, metrics.clone(), None);

    let start = Instant::now();
    let wall_start = args.at.unwrap_or_else(Utc::now);
    let step = Duration::from_millis(args.frame_interval_ms);
    let mut index: u32 = 0;

    while let Some(frame) = frame_rx.recv().await {
        let offset = step * index;
        let wall = wall_start + chrono::Duration::from_std(offset).unwrap_or_else(|_| chrono::Duration::zero());
        let seq = frame.seq;

        for outcome in engine.process_frame_at(frame, start + offset, wall).await {
            println!("{}", outcome_line(seq, wall, &outcome));
        }
        index = index.saturating_add(1);
    }

    let sent = reader.await.context("replay task panicked")??;

    // Closing the signal channel lets the worker finish queued opens
    drop(engine);
    worker_handle.await.context("gate worker panicked")?;

    let summary = metrics.report();
    info!(
        frames = %sent,
        confirmations = %summary.confirmations_total,
        authorize = %summary.decisions_authorize,
        authorize_later = %summary.decisions_authorize_later,
        deny = %summary.decisions_deny,
        actuations = %summary.actuations_sent,
        "replay_complete"
    );
    Ok(())
}

fn outcome_line(seq: u64, wall: DateTime<Utc>, outcome: &CycleOutcome) -> serde_json::Value {
    match outcome {
        CycleOutcome::Decided { plate, region_id, decision, actuated, ledger_error } => {
            serde_json::json!({
                "seq": seq,
                "at": wall.to_rfc3339(),
                "region_id": region_id.0,
                "plate": plate.as_str(),
                "decision": decision.as_str(),
                "starts_at": decision.starts_at().map(|t| t.to_rfc3339()),
                "actuated": actuated,
                "ledger_error": ledger_error,
            })
        }
        CycleOutcome::Throttled { plate, region_id } => serde_json::json!({
            "seq": seq,
            "at": wall.to_rfc3339(),
            "region_id": region_id.0,
            "plate": plate.as_str(),
            "decision": "throttled",
        }),
    }
}
