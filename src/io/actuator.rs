//! Gate actuators
//!
//! The controller only ever sends "open". Delivery is fire-and-forget from
//! the engine's point of view; the gate worker logs failures.
//! - `HttpActuator` - GET a relay URL (basic auth taken from the URL)
//! - `MqttActuator` - publish `{"gate":true,...}` to a command topic
//! - `LogActuator` - log only, for dry runs

use crate::domain::types::epoch_ms;
use crate::infra::config::{ActuatorMode, Config};
use crate::io::http_auth::AuthUrl;
use crate::services::gate::ActuationSignal;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("gate request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gate returned HTTP {0}")]
    Status(u16),
    #[error("gate publish failed: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
    #[error("gate command encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait Actuator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn open(&self, signal: &ActuationSignal) -> Result<(), ActuatorError>;
}

pub struct HttpActuator {
    target: AuthUrl,
    client: reqwest::Client,
}

impl HttpActuator {
    pub fn new(url: &str, timeout_ms: u64) -> Result<Self, ActuatorError> {
        // Relay boards only speak HTTP/1.x
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .http1_only()
            .build()?;
        Ok(Self { target: AuthUrl::parse(url), client })
    }
}

#[async_trait]
impl Actuator for HttpActuator {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn open(&self, signal: &ActuationSignal) -> Result<(), ActuatorError> {
        let start = Instant::now();
        let request = self.client.get(&self.target.url).header("Accept", "*/*");
        let response = self.target.apply(request).send().await?;
        let status = response.status();

        info!(
            cycle_id = %signal.cycle_id,
            plate = %signal.plate,
            status = %status.as_u16(),
            latency_us = %start.elapsed().as_micros(),
            mode = "http",
            "gate_open_command"
        );

        if !status.is_success() {
            return Err(ActuatorError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// Payload for the MQTT gate command
#[derive(Debug, Serialize)]
pub struct GateCommandPayload<'a> {
    pub gate: bool,
    pub plate: &'a str,
    pub cycle_id: &'a str,
    pub ts: u64,
}

pub struct MqttActuator {
    client: AsyncClient,
    topic: String,
}

impl MqttActuator {
    /// Connect to the broker; must be called inside a tokio runtime
    pub fn new(config: &Config) -> Self {
        let client_id = format!("plate-gate-actuator-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 16);

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_actuator_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_actuator_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_actuator_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self { client, topic: config.gate_mqtt_topic().to_string() }
    }
}

#[async_trait]
impl Actuator for MqttActuator {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn open(&self, signal: &ActuationSignal) -> Result<(), ActuatorError> {
        let payload = GateCommandPayload {
            gate: true,
            plate: signal.plate.as_str(),
            cycle_id: &signal.cycle_id,
            ts: epoch_ms(),
        };
        let json = serde_json::to_vec(&payload)?;
        self.client.publish(&self.topic, QoS::AtLeastOnce, false, json).await?;

        info!(
            cycle_id = %signal.cycle_id,
            plate = %signal.plate,
            topic = %self.topic,
            mode = "mqtt",
            "gate_open_command"
        );
        Ok(())
    }
}

pub struct LogActuator;

#[async_trait]
impl Actuator for LogActuator {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn open(&self, signal: &ActuationSignal) -> Result<(), ActuatorError> {
        info!(cycle_id = %signal.cycle_id, plate = %signal.plate, mode = "log", "gate_open_command");
        Ok(())
    }
}

/// Build the actuator selected by config
pub fn build_actuator(config: &Config) -> Result<Arc<dyn Actuator>, ActuatorError> {
    let actuator: Arc<dyn Actuator> = match config.gate_mode() {
        ActuatorMode::Http => Arc::new(HttpActuator::new(config.gate_url(), config.gate_timeout_ms())?),
        ActuatorMode::Mqtt => Arc::new(MqttActuator::new(config)),
        ActuatorMode::Log => Arc::new(LogActuator),
    };
    info!(mode = %config.gate_mode().as_str(), "actuator_initialized");
    Ok(actuator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plate::normalize;

    fn signal() -> ActuationSignal {
        ActuationSignal {
            cycle_id: "0190c3a4-0000-7000-8000-000000000000".to_string(),
            plate: normalize("AB12CD3456"),
            issued_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn test_log_actuator_always_succeeds() {
        let actuator = LogActuator;
        assert!(actuator.open(&signal()).await.is_ok());
        assert_eq!(actuator.name(), "log");
    }

    #[test]
    fn test_gate_command_payload() {
        let sig = signal();
        let payload = GateCommandPayload {
            gate: true,
            plate: sig.plate.as_str(),
            cycle_id: &sig.cycle_id,
            ts: 1767617600000,
        };
        let json: serde_json::Value = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["gate"], true);
        assert_eq!(json["plate"], "AB12CD3456");
        assert_eq!(json["ts"], 1767617600000u64);
    }

    #[tokio::test]
    async fn test_http_actuator_unreachable_is_error() {
        // Port 9 on localhost (discard) is expected to refuse connections
        let actuator = HttpActuator::new("http://127.0.0.1:9/open", 200).unwrap();
        assert!(actuator.open(&signal()).await.is_err());
    }

    #[tokio::test]
    async fn test_build_actuator_default_is_log() {
        let actuator = build_actuator(&Config::default()).unwrap();
        assert_eq!(actuator.name(), "log");
    }
}
