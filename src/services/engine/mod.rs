//! Access decision engine
//!
//! The AccessEngine is the pipeline context object. It owns every piece of
//! mutable state (per-region stabilizers, the gate controller) and drives:
//! - Normalization and stabilization of raw OCR readings
//! - Booking resolution and window decision on confirmation
//! - Gate cooldown and actuation signal hand-off to the gate worker
//! - Decision egress (MQTT and access log)
//!
//! Frames are processed one at a time, regions in detection order.

mod handlers;
#[cfg(test)]
mod tests;

use crate::domain::booking::Decision;
use crate::domain::plate::NormalizedPlate;
use crate::domain::types::{PlateFrame, RegionId};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::access_log::AccessLog;
use crate::io::EgressSender;
use crate::services::booking_resolver::BookingResolver;
use crate::services::gate::{ActuationSignal, GateController, GateState};
use crate::services::stabilizer::Stabilizer;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The frame source closed; the pipeline cannot continue without input
    #[error("frame source exhausted after {frames} frames")]
    SourceExhausted { frames: u64 },
}

/// Outcome of one confirmation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Ledger consulted and a decision applied
    Decided {
        plate: NormalizedPlate,
        region_id: RegionId,
        decision: Decision,
        actuated: bool,
        ledger_error: bool,
    },
    /// Confirmed during an active cooldown; no ledger query
    Throttled { plate: NormalizedPlate, region_id: RegionId },
}

impl CycleOutcome {
    pub fn plate(&self) -> &NormalizedPlate {
        match self {
            CycleOutcome::Decided { plate, .. } | CycleOutcome::Throttled { plate, .. } => plate,
        }
    }

    pub fn decision(&self) -> Option<&Decision> {
        match self {
            CycleOutcome::Decided { decision, .. } => Some(decision),
            CycleOutcome::Throttled { .. } => None,
        }
    }
}

/// Stabilizer plus the last time its region produced a reading
pub(crate) struct RegionSlot {
    pub(crate) stabilizer: Stabilizer,
    pub(crate) last_seen: Instant,
}

pub struct AccessEngine {
    /// Debounce state by region id
    pub(crate) regions: FxHashMap<RegionId, RegionSlot>,
    pub(crate) resolver: BookingResolver,
    pub(crate) gate: GateController,
    /// Actuation signals to the gate worker
    pub(crate) gate_tx: mpsc::Sender<ActuationSignal>,
    pub(crate) config: Config,
    pub(crate) metrics: Arc<Metrics>,
    /// MQTT egress sender (optional)
    pub(crate) egress_sender: Option<EgressSender>,
    pub(crate) access_log: Option<AccessLog>,
    pub(crate) frames_seen: u64,
}

impl AccessEngine {
    pub fn new(
        config: Config,
        resolver: BookingResolver,
        gate_tx: mpsc::Sender<ActuationSignal>,
        metrics: Arc<Metrics>,
        egress_sender: Option<EgressSender>,
    ) -> Self {
        let gate = GateController::new(Duration::from_millis(config.cooldown_ms()), metrics.clone());
        let access_log = AccessLog::from_path(config.access_log_file());
        Self {
            regions: FxHashMap::default(),
            resolver,
            gate,
            gate_tx,
            config,
            metrics,
            egress_sender,
            access_log,
            frames_seen: 0,
        }
    }

    /// Observe gate state changes without mutating them
    pub fn subscribe_gate(&self) -> watch::Receiver<GateState> {
        self.gate.subscribe()
    }

    pub fn gate(&self) -> &GateController {
        &self.gate
    }

    pub fn active_regions(&self) -> usize {
        self.regions.len()
    }

    /// Consume frames until the source closes or shutdown is signalled.
    ///
    /// A closed frame channel is fatal and returns `SourceExhausted`.
    /// Shutdown returns `Ok`.
    pub async fn run(
        &mut self,
        mut frame_rx: mpsc::Receiver<PlateFrame>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), EngineError> {
        let mut tick_interval = interval(Duration::from_secs(1));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            cooldown_ms = %self.gate.cooldown().as_millis(),
            per_region = %self.config.per_region(),
            window = %self.config.window(),
            "engine_started"
        );

        loop {
            tokio::select! {
                frame = frame_rx.recv() => {
                    match frame {
                        Some(f) => {
                            self.process_frame(f).await;
                        }
                        None => {
                            warn!(frames = %self.frames_seen, "frame_source_exhausted");
                            return Err(EngineError::SourceExhausted { frames: self.frames_seen });
                        }
                    }
                }
                _ = tick_interval.tick() => {
                    self.tick(Instant::now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(frames = %self.frames_seen, "engine_shutdown");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Periodic housekeeping: cooldown expiry and idle region eviction
    pub fn tick(&mut self, now: Instant) {
        if self.gate.poll(now) {
            self.publish_gate_state(now);
        }
        self.evict_idle_regions(now);
    }

    /// Process one frame against the current wall clock
    pub async fn process_frame(&mut self, frame: PlateFrame) -> Vec<CycleOutcome> {
        self.process_frame_at(frame, Instant::now(), Utc::now()).await
    }

    /// Process one frame with explicit clocks.
    ///
    /// `now` drives cooldown and region bookkeeping; `wall` is compared
    /// against booking windows.
    pub async fn process_frame_at(
        &mut self,
        frame: PlateFrame,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Vec<CycleOutcome> {
        let process_start = Instant::now();
        self.frames_seen += 1;

        if self.gate.poll(now) {
            self.publish_gate_state(now);
        }

        let mut outcomes = Vec::new();
        for candidate in &frame.candidates {
            if let Some(outcome) = self.handle_reading(candidate, frame.seq, now, wall).await {
                outcomes.push(outcome);
            }
        }

        let latency_us = process_start.elapsed().as_micros() as u64;
        self.metrics.record_frame_processed(latency_us);
        self.metrics.set_active_regions(self.regions.len());
        outcomes
    }

    fn evict_idle_regions(&mut self, now: Instant) {
        let idle = Duration::from_secs(self.config.region_idle_secs());
        let before = self.regions.len();
        self.regions.retain(|_, slot| now.saturating_duration_since(slot.last_seen) < idle);
        let evicted = before - self.regions.len();
        if evicted > 0 {
            debug!(evicted = %evicted, active = %self.regions.len(), "regions_evicted");
            self.metrics.set_active_regions(self.regions.len());
        }
    }
}
