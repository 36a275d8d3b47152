//! Reading and confirmation handlers for the AccessEngine
//!
//! A reading flows: normalize -> format check -> stabilizer. A confirmation
//! flows: throttle check -> ledger -> window decision -> gate -> egress.

use super::{AccessEngine, CycleOutcome, RegionSlot};
use crate::domain::booking::{Booking, Decision};
use crate::domain::plate::{normalize, NormalizedPlate};
use crate::domain::types::{epoch_ms, PlateCandidate, RegionId};
use crate::io::egress_channel::{DecisionPayload, GateStatePayload};
use crate::io::ledger::LedgerError;
use crate::services::stabilizer::{Observation, Stabilizer};
use crate::services::gate::ActuationSignal;
use crate::services::window_decision::decide;
use chrono::{DateTime, Utc};
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

impl AccessEngine {
    /// Feed one raw OCR candidate through normalization and debounce
    pub(crate) async fn handle_reading(
        &mut self,
        candidate: &PlateCandidate,
        seq: u64,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Option<CycleOutcome> {
        self.metrics.record_reading();

        let plate = normalize(&candidate.raw_text);
        if plate.is_empty() {
            self.metrics.record_reading_discarded();
            debug!(seq = %seq, region_id = %candidate.region_id, "reading_empty");
            return None;
        }

        let format_valid = plate.matches_strict_format();
        debug!(
            seq = %seq,
            region_id = %candidate.region_id,
            plate = %plate,
            valid = %format_valid,
            "plate_format_valid"
        );
        if !format_valid && self.config.require_strict_format() {
            self.metrics.record_reading_discarded();
            return None;
        }

        let region_id = self.region_key(candidate.region_id);
        let window = self.config.window();
        let slot = self.regions.entry(region_id).or_insert_with(|| RegionSlot {
            stabilizer: Stabilizer::with_window(window),
            last_seen: now,
        });
        slot.last_seen = now;

        match slot.stabilizer.observe(&plate) {
            Observation::Confirmed(confirmed) => {
                Some(self.handle_confirmation(confirmed, region_id, now, wall).await)
            }
            Observation::Pending => None,
        }
    }

    /// Readings share region 0 unless per-region debounce is enabled
    fn region_key(&self, region_id: RegionId) -> RegionId {
        if self.config.per_region() {
            region_id
        } else {
            RegionId::default()
        }
    }

    /// Run one decision cycle for a confirmed plate
    pub(crate) async fn handle_confirmation(
        &mut self,
        plate: NormalizedPlate,
        region_id: RegionId,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> CycleOutcome {
        self.metrics.record_confirmation();

        if !self.gate.begin_cycle(now) {
            self.metrics.record_confirmation_throttled();
            debug!(
                plate = %plate,
                region_id = %region_id,
                remaining_ms = %self.gate.remaining(now).unwrap_or_default().as_millis(),
                "confirmation_throttled"
            );
            return CycleOutcome::Throttled { plate, region_id };
        }

        let cycle_id = uuid::Uuid::now_v7().to_string();
        info!(cycle_id = %cycle_id, plate = %plate, region_id = %region_id, "plate_confirmed");

        let (bookings, ledger_error) = match self.resolver.resolve(&plate).await {
            Ok(bookings) => (bookings, false),
            Err(e) => {
                self.log_ledger_error(&cycle_id, &plate, &e);
                (Vec::new(), true)
            }
        };

        if bookings.is_empty() && !ledger_error {
            info!(cycle_id = %cycle_id, plate = %plate, "no_booking_found");
        }

        let decision = decide(&bookings, wall);
        self.log_decision(&cycle_id, &plate, &decision, &bookings);
        self.metrics.record_decision(&decision);

        let signal = self.gate.apply(&decision, &plate, &cycle_id, now);
        let actuated = match signal {
            Some(signal) => self.enqueue_signal(signal),
            None => false,
        };
        self.publish_gate_state(now);

        let mut record = DecisionPayload::new(&cycle_id, plate.as_str(), region_id.0, &decision);
        record.bookings = bookings.len();
        record.ledger_error = ledger_error;
        record.actuated = actuated;
        self.emit_decision(record);

        CycleOutcome::Decided { plate, region_id, decision, actuated, ledger_error }
    }

    fn log_ledger_error(&self, cycle_id: &str, plate: &NormalizedPlate, error: &LedgerError) {
        self.metrics.record_ledger_error();
        warn!(
            cycle_id = %cycle_id,
            plate = %plate,
            ledger = %self.config.ledger_mode().as_str(),
            error = %error,
            "ledger_unavailable"
        );
    }

    fn log_decision(
        &self,
        cycle_id: &str,
        plate: &NormalizedPlate,
        decision: &Decision,
        bookings: &[Booking],
    ) {
        match decision {
            Decision::Authorize => {
                info!(cycle_id = %cycle_id, plate = %plate, bookings = %bookings.len(), "access_authorized");
            }
            Decision::AuthorizeLater(starts_at) => {
                info!(
                    cycle_id = %cycle_id,
                    plate = %plate,
                    starts_at = %starts_at.to_rfc3339(),
                    "booking_not_started"
                );
            }
            Decision::Deny => {
                info!(cycle_id = %cycle_id, plate = %plate, bookings = %bookings.len(), "access_denied");
            }
        }
    }

    /// Hand a signal to the gate worker without waiting.
    /// Returns false if the signal was dropped.
    fn enqueue_signal(&self, signal: ActuationSignal) -> bool {
        let cycle_id = signal.cycle_id.clone();
        match self.gate_tx.try_send(signal) {
            Ok(()) => {
                debug!(cycle_id = %cycle_id, "gate_signal_queued");
                true
            }
            Err(TrySendError::Full(_)) => {
                self.metrics.record_signal_dropped();
                warn!(cycle_id = %cycle_id, "gate_signal_dropped_full");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics.record_signal_dropped();
                warn!(cycle_id = %cycle_id, "gate_signal_dropped_closed");
                false
            }
        }
    }

    pub(crate) fn publish_gate_state(&self, now: Instant) {
        if let Some(ref sender) = self.egress_sender {
            let state = self.gate.state();
            sender.send_gate_state(GateStatePayload {
                site: None,
                phase: self.gate.phase().as_str().to_string(),
                open: state.is_open,
                cooldown_ms: self.gate.remaining(now).map(|d| d.as_millis() as u64),
                ts: epoch_ms(),
            });
        }
    }

    fn emit_decision(&self, record: DecisionPayload) {
        if let Some(ref log) = self.access_log {
            log.write_decision(&record);
        }
        if let Some(ref sender) = self.egress_sender {
            sender.send_decision(record);
        }
    }
}
