//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `mqtt` - MQTT client for receiving plate readings
//! - `replay` - JSONL frame replay source
//! - `ledger` - Booking ledgers (HTTP, JSON file, in-memory)
//! - `actuator` - Gate actuators (HTTP relay, MQTT command, log)
//! - `http_auth` - Basic auth credentials embedded in URLs
//! - `mqtt_egress` - MQTT publisher for egress events
//! - `egress_channel` - Typed channel for MQTT egress messages
//! - `access_log` - Decision records to file (JSONL format)
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod access_log;
pub mod actuator;
pub mod egress_channel;
pub mod http_auth;
pub mod ledger;
pub mod mqtt;
pub mod mqtt_egress;
pub mod prometheus;
pub mod replay;

// Re-export commonly used types
pub use access_log::AccessLog;
pub use actuator::{build_actuator, Actuator, ActuatorError};
pub use egress_channel::{
    create_egress_channel, DecisionPayload, EgressMessage, EgressSender, GateStatePayload,
};
pub use ledger::{build_ledger, BookingLedger, LedgerError, MemoryLedger};
pub use mqtt_egress::MqttPublisher;
