//! Typed channel for MQTT egress messages
//!
//! Provides a non-blocking way to send events to the MQTT publisher.
//! Uses bounded mpsc channels to prevent unbounded memory growth.

use crate::domain::booking::Decision;
use crate::domain::types::epoch_ms;
use crate::infra::metrics::MetricsSummary;
use serde::Serialize;
use tokio::sync::mpsc;

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum EgressMessage {
    /// Outcome of a confirmation cycle
    Decision(DecisionPayload),
    /// Gate state change
    GateState(GateStatePayload),
    /// Periodic metrics snapshot
    Metrics(MetricsPayload),
}

/// Payload for decision events, also used as the access log line
#[derive(Debug, Clone, Serialize)]
pub struct DecisionPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub cycle_id: String,
    pub plate: String,
    pub region_id: i64,
    /// authorize, authorize_later, deny
    pub decision: String,
    /// Booking start for authorize_later (RFC 3339)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<String>,
    /// Bookings found for the plate
    pub bookings: usize,
    /// Ledger query failed; decision is the conservative deny
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ledger_error: bool,
    /// Whether an open signal was issued
    pub actuated: bool,
    /// Timestamp (epoch ms)
    pub ts: u64,
}

impl DecisionPayload {
    pub fn new(cycle_id: &str, plate: &str, region_id: i64, decision: &Decision) -> Self {
        Self {
            site: None,
            cycle_id: cycle_id.to_string(),
            plate: plate.to_string(),
            region_id,
            decision: decision.as_str().to_string(),
            starts_at: decision.starts_at().map(|t| t.to_rfc3339()),
            bookings: 0,
            ledger_error: false,
            actuated: false,
            ts: epoch_ms(),
        }
    }
}

/// Payload for gate state changes
#[derive(Debug, Clone, Serialize)]
pub struct GateStatePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// idle, deciding, cooldown
    pub phase: String,
    pub open: bool,
    /// Remaining cooldown in ms
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_ms: Option<u64>,
    pub ts: u64,
}

/// Payload for metrics snapshot
#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    pub site: String,
    pub ts: u64,
    pub frames_total: u64,
    pub frames_per_sec: f64,
    pub avg_frame_latency_us: u64,
    pub readings_total: u64,
    pub readings_discarded: u64,
    pub confirmations: u64,
    pub throttled: u64,
    pub authorize: u64,
    pub authorize_later: u64,
    pub deny: u64,
    pub ledger_errors: u64,
    pub ledger_p99_us: u64,
    pub actuations: u64,
    pub actuations_failed: u64,
    pub frames_dropped: u64,
}

impl MetricsPayload {
    pub fn from_summary(summary: &MetricsSummary, site: String) -> Self {
        Self {
            site,
            ts: epoch_ms(),
            frames_total: summary.frames_total,
            frames_per_sec: summary.frames_per_sec,
            avg_frame_latency_us: summary.avg_frame_latency_us,
            readings_total: summary.readings_total,
            readings_discarded: summary.readings_discarded,
            confirmations: summary.confirmations_total,
            throttled: summary.confirmations_throttled,
            authorize: summary.decisions_authorize,
            authorize_later: summary.decisions_authorize_later,
            deny: summary.decisions_deny,
            ledger_errors: summary.ledger_errors_total,
            ledger_p99_us: summary.ledger_lat_p99_us,
            actuations: summary.actuations_sent,
            actuations_failed: summary.actuations_failed,
            frames_dropped: summary.frames_dropped,
        }
    }
}

/// Cloneable handle for sending egress messages
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    site_id: String,
}

impl EgressSender {
    pub fn new(tx: mpsc::Sender<EgressMessage>, site_id: String) -> Self {
        Self { tx, site_id }
    }

    /// Send a decision event; dropped if the channel is full
    pub fn send_decision(&self, mut payload: DecisionPayload) {
        payload.site = Some(self.site_id.clone());
        let _ = self.tx.try_send(EgressMessage::Decision(payload));
    }

    /// Send a gate state change
    pub fn send_gate_state(&self, mut payload: GateStatePayload) {
        payload.site = Some(self.site_id.clone());
        let _ = self.tx.try_send(EgressMessage::GateState(payload));
    }

    /// Send a metrics snapshot
    pub fn send_metrics(&self, summary: &MetricsSummary) {
        let payload = MetricsPayload::from_summary(summary, self.site_id.clone());
        let _ = self.tx.try_send(EgressMessage::Metrics(payload));
    }
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
pub fn create_egress_channel(
    buffer_size: usize,
    site_id: String,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, site_id), rx)
}
