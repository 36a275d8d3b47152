//! JSONL replay source
//!
//! Reads frame messages (same shape as the MQTT payload) from a file, one per
//! line, and forwards them to the engine. The channel is closed at end of
//! file, so the engine sees a finite source.

use crate::infra::metrics::Metrics;
use crate::io::mqtt::{FrameForwarder, Forwarded};
use crate::domain::types::PlateFrame;
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Replay `path` into `frame_tx`, pausing `frame_interval` between frames.
///
/// Unlike the live client, a full channel waits instead of dropping so every
/// recorded frame reaches the engine. Returns the number of frames sent.
pub async fn replay_file(
    path: impl AsRef<Path>,
    frame_tx: mpsc::Sender<PlateFrame>,
    metrics: Arc<Metrics>,
    frame_interval: Duration,
) -> anyhow::Result<u64> {
    let path = path.as_ref();
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open replay file {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();

    // Capacity 1 forwarder in front of the real channel keeps back-pressure
    let (stage_tx, mut stage_rx) = mpsc::channel(1);
    let mut forwarder = FrameForwarder::new(stage_tx, metrics);
    let mut sent = 0u64;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if forwarder.forward(line.as_bytes()) != Forwarded::Sent {
            continue;
        }
        let Some(frame) = stage_rx.recv().await else { break };
        if frame_tx.send(frame).await.is_err() {
            debug!("replay_consumer_gone");
            break;
        }
        sent += 1;

        if !frame_interval.is_zero() {
            tokio::time::sleep(frame_interval).await;
        }
    }

    info!(path = %path.display(), frames = %sent, "replay_finished");
    Ok(sent)
}
