//! MQTT client for receiving plate readings from the vision process
//!
//! One message per processed frame. Frames are forwarded to the engine with
//! `try_send` so the MQTT eventloop never blocks on a slow consumer.

use crate::domain::types::{parse_frame_message, PlateFrame};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Parses frame payloads and forwards them to the engine channel
pub struct FrameForwarder {
    frame_tx: mpsc::Sender<PlateFrame>,
    metrics: Arc<Metrics>,
    next_seq: u64,
    last_drop_warn: Instant,
}

/// Result of forwarding one payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarded {
    Sent,
    Malformed,
    Dropped,
    /// The engine is gone; the caller should stop
    Closed,
}

impl FrameForwarder {
    pub fn new(frame_tx: mpsc::Sender<PlateFrame>, metrics: Arc<Metrics>) -> Self {
        Self {
            frame_tx,
            metrics,
            next_seq: 0,
            // Allow an immediate first warning
            last_drop_warn: Instant::now() - Duration::from_secs(2),
        }
    }

    pub fn forward(&mut self, payload: &[u8]) -> Forwarded {
        self.next_seq += 1;

        let Ok(json_str) = std::str::from_utf8(payload) else {
            self.metrics.record_frame_malformed();
            debug!(seq = %self.next_seq, "frame_invalid_utf8");
            return Forwarded::Malformed;
        };

        let Some(frame) = parse_frame_message(json_str, self.next_seq) else {
            self.metrics.record_frame_malformed();
            debug!(seq = %self.next_seq, bytes = %payload.len(), "frame_malformed");
            return Forwarded::Malformed;
        };

        match self.frame_tx.try_send(frame) {
            Ok(()) => Forwarded::Sent,
            Err(TrySendError::Full(_)) => {
                self.metrics.record_frame_dropped();
                if self.last_drop_warn.elapsed() > Duration::from_secs(1) {
                    warn!("frame_dropped: channel full");
                    self.last_drop_warn = Instant::now();
                }
                Forwarded::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                warn!("frame channel closed");
                Forwarded::Closed
            }
        }
    }
}

/// Start the readings client and forward frames until shutdown.
///
/// Transient errors are retried every second. After
/// `mqtt.max_consecutive_errors` failures in a row the client gives up and
/// returns an error; dropping `frame_tx` then ends the engine's input.
pub async fn start_mqtt_client(
    config: &Config,
    frame_tx: mpsc::Sender<PlateFrame>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("plate-gate-{}", config.site_id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.mqtt_readings_topic(), QoS::AtMostOnce).await?;

    info!(
        topic = %config.mqtt_readings_topic(),
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        "mqtt_client_subscribed"
    );

    let max_errors = config.mqtt_max_consecutive_errors();
    let mut consecutive_errors: u32 = 0;
    let mut forwarder = FrameForwarder::new(frame_tx, metrics);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        consecutive_errors = 0;
                        if forwarder.forward(&publish.payload) == Forwarded::Closed {
                            return Ok(());
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        consecutive_errors = 0;
                        info!("mqtt_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        consecutive_errors += 1;
                        error!(error = %e, consecutive = %consecutive_errors, "mqtt_error");
                        if consecutive_errors >= max_errors {
                            error!(max = %max_errors, "mqtt_source_giving_up");
                            return Err(Box::new(e));
                        }
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forward_valid_frame() {
        let (tx, mut rx) = mpsc::channel(4);
        let metrics = Arc::new(Metrics::new());
        let mut forwarder = FrameForwarder::new(tx, metrics);

        let payload = br#"{"camera":"lane-1","regions":[{"region_id":2,"text":"AB12CD3456"}]}"#;
        assert_eq!(forwarder.forward(payload), Forwarded::Sent);

        let frame = rx.recv().await.unwrap();
        // No seq in the message: the forwarder numbers frames itself
        assert_eq!(frame.seq, 1);
        assert_eq!(frame.candidates[0].raw_text, "AB12CD3456");
    }

    #[test]
    fn test_forward_malformed_is_counted_not_fatal() {
        let (tx, _rx) = mpsc::channel(4);
        let metrics = Arc::new(Metrics::new());
        let mut forwarder = FrameForwarder::new(tx, metrics.clone());

        assert_eq!(forwarder.forward(b"not json"), Forwarded::Malformed);
        assert_eq!(forwarder.forward(&[0xff, 0xfe]), Forwarded::Malformed);
        assert_eq!(forwarder.forward(br#"{"regions":[]}"#), Forwarded::Sent);
        assert_eq!(metrics.report().frames_malformed, 2);
    }

    #[test]
    fn test_forward_full_channel_drops() {
        let (tx, _rx) = mpsc::channel(1);
        let metrics = Arc::new(Metrics::new());
        let mut forwarder = FrameForwarder::new(tx, metrics.clone());

        assert_eq!(forwarder.forward(b"{}"), Forwarded::Sent);
        assert_eq!(forwarder.forward(b"{}"), Forwarded::Dropped);
        assert_eq!(metrics.report().frames_dropped, 1);
    }

    #[test]
    fn test_forward_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut forwarder = FrameForwarder::new(tx, Arc::new(Metrics::new()));
        assert_eq!(forwarder.forward(b"{}"), Forwarded::Closed);
    }
}
