//! Gate controller state machine
//!
//! Owns `GateState` and the cooldown deadline. Phases:
//! `Idle -> Deciding -> Cooldown -> Idle`. Every decision, not only an
//! authorization, starts a cooldown so a vehicle parked in frame does not
//! re-query the ledger or re-trigger the gate.
//!
//! The deadline is checked on each frame and tick instead of sleeping, so
//! the frame loop stays responsive to shutdown.

use crate::domain::booking::Decision;
use crate::domain::plate::NormalizedPlate;
use crate::infra::metrics::{Metrics, GATE_STATE_COOLDOWN, GATE_STATE_IDLE, GATE_STATE_OPEN};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info};

/// Gate state visible to the actuation boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GateState {
    /// Informational; the controller cannot read back the physical gate
    pub is_open: bool,
    pub cooldown_until: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePhase {
    Idle,
    Deciding,
    Cooldown,
}

impl GatePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatePhase::Idle => "idle",
            GatePhase::Deciding => "deciding",
            GatePhase::Cooldown => "cooldown",
        }
    }
}

/// Open command for the actuator
#[derive(Debug, Clone)]
pub struct ActuationSignal {
    pub cycle_id: String,
    pub plate: NormalizedPlate,
    /// When the signal was issued (for queue delay measurement)
    pub issued_at: Instant,
}

pub struct GateController {
    state: GateState,
    phase: GatePhase,
    cooldown: Duration,
    state_tx: watch::Sender<GateState>,
    metrics: Arc<Metrics>,
}

impl GateController {
    pub fn new(cooldown: Duration, metrics: Arc<Metrics>) -> Self {
        let (state_tx, _) = watch::channel(GateState::default());
        metrics.set_gate_state(GATE_STATE_IDLE);
        Self { state: GateState::default(), phase: GatePhase::Idle, cooldown, state_tx, metrics }
    }

    /// Read-only view of state changes
    pub fn subscribe(&self) -> watch::Receiver<GateState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn phase(&self) -> GatePhase {
        self.phase
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Expire the cooldown if its deadline has passed.
    /// Returns true when the gate went back to `Idle`.
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.phase != GatePhase::Cooldown {
            return false;
        }
        match self.state.cooldown_until {
            Some(deadline) if deadline > now => false,
            _ => {
                self.phase = GatePhase::Idle;
                self.state = GateState::default();
                self.publish();
                self.metrics.set_gate_state(GATE_STATE_IDLE);
                info!("gate_ready");
                true
            }
        }
    }

    /// Whether a new confirmation cycle may start at `now`
    pub fn is_ready(&mut self, now: Instant) -> bool {
        self.poll(now);
        self.phase != GatePhase::Cooldown
    }

    /// Time left in the current cooldown
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        match (self.phase, self.state.cooldown_until) {
            (GatePhase::Cooldown, Some(deadline)) => Some(deadline.saturating_duration_since(now)),
            _ => None,
        }
    }

    /// Enter `Deciding` for a confirmation. False while cooling down.
    pub fn begin_cycle(&mut self, now: Instant) -> bool {
        if !self.is_ready(now) {
            return false;
        }
        self.phase = GatePhase::Deciding;
        true
    }

    /// Apply a decision and start the cooldown.
    ///
    /// Returns the open signal for `Authorize`. Decisions arriving during an
    /// active cooldown are suppressed and leave the deadline untouched.
    pub fn apply(
        &mut self,
        decision: &Decision,
        plate: &NormalizedPlate,
        cycle_id: &str,
        now: Instant,
    ) -> Option<ActuationSignal> {
        if !self.is_ready(now) {
            debug!(
                plate = %plate,
                decision = %decision.as_str(),
                remaining_ms = %self.remaining(now).unwrap_or_default().as_millis(),
                "gate_actuation_suppressed"
            );
            return None;
        }

        self.phase = GatePhase::Cooldown;
        self.state.cooldown_until = Some(now + self.cooldown);

        let signal = match decision {
            Decision::Authorize => {
                self.state.is_open = true;
                self.metrics.set_gate_state(GATE_STATE_OPEN);
                Some(ActuationSignal {
                    cycle_id: cycle_id.to_string(),
                    plate: plate.clone(),
                    issued_at: now,
                })
            }
            Decision::AuthorizeLater(_) | Decision::Deny => {
                self.metrics.set_gate_state(GATE_STATE_COOLDOWN);
                None
            }
        };

        self.publish();
        debug!(
            plate = %plate,
            decision = %decision.as_str(),
            cooldown_ms = %self.cooldown.as_millis(),
            "gate_cooldown_started"
        );
        signal
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state);
    }
}
