//! MQTT publisher for egress events
//!
//! Publishes controller events to MQTT topics for downstream consumers:
//! - parking/decisions - One record per decision cycle (QoS 1)
//! - parking/gate - Gate state changes (QoS 0)
//! - parking/metrics - Periodic metrics snapshots (QoS 0)

use crate::infra::config::Config;
use crate::io::egress_channel::EgressMessage;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// MQTT publisher actor
///
/// Receives messages from the egress channel and publishes to MQTT topics.
pub struct MqttPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<EgressMessage>,
    decisions_topic: String,
    gate_topic: String,
    metrics_topic: String,
}

impl MqttPublisher {
    /// Create a new MQTT publisher
    ///
    /// Connects to the broker at the configured MQTT host/port.
    pub fn new(config: &Config, rx: mpsc::Receiver<EgressMessage>) -> Self {
        let client_id = format!("plate-gate-egress-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_egress_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_egress_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            rx,
            decisions_topic: config.mqtt_egress_decisions_topic().to_string(),
            gate_topic: config.mqtt_egress_gate_topic().to_string(),
            metrics_topic: config.mqtt_egress_metrics_topic().to_string(),
        }
    }

    /// Run the publisher loop until shutdown, draining queued messages on exit
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            decisions = %self.decisions_topic,
            gate = %self.gate_topic,
            metrics = %self.metrics_topic,
            "mqtt_egress_started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mqtt_egress_shutdown");
                        while let Ok(msg) = self.rx.try_recv() {
                            self.publish_message(msg).await;
                        }
                        return;
                    }
                }
                msg = self.rx.recv() => {
                    match msg {
                        Some(msg) => self.publish_message(msg).await,
                        None => return,
                    }
                }
            }
        }
    }

    async fn publish_message(&self, msg: EgressMessage) {
        match msg {
            // Decisions are the audit trail: at-least-once
            EgressMessage::Decision(payload) => {
                self.publish_json(&self.decisions_topic, QoS::AtLeastOnce, &payload, "decision").await;
            }
            EgressMessage::GateState(payload) => {
                self.publish_json(&self.gate_topic, QoS::AtMostOnce, &payload, "gate").await;
            }
            EgressMessage::Metrics(payload) => {
                self.publish_json(&self.metrics_topic, QoS::AtMostOnce, &payload, "metrics").await;
            }
        }
    }

    async fn publish_json<T: Serialize>(&self, topic: &str, qos: QoS, payload: &T, kind: &str) {
        let json = match serde_json::to_vec(payload) {
            Ok(json) => json,
            Err(e) => {
                error!(kind = %kind, error = %e, "mqtt_egress_encode_failed");
                return;
            }
        };
        if let Err(e) = self.client.publish(topic, qos, false, json).await {
            match qos {
                QoS::AtMostOnce => debug!(kind = %kind, error = %e, "mqtt_egress_publish_failed"),
                _ => error!(kind = %kind, error = %e, "mqtt_egress_publish_failed"),
            }
        }
    }
}
