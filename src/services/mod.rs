//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `engine` - Access decision engine, owns all pipeline state
//! - `stabilizer` - Debounces per-frame plate readings
//! - `booking_resolver` - Fetches and orders a plate's bookings
//! - `window_decision` - Authorize / authorize later / deny
//! - `gate` - Gate controller and cooldown state machine
//! - `gate_worker` - Async gate command worker

pub mod booking_resolver;
pub mod engine;
pub mod gate;
pub mod gate_worker;
pub mod stabilizer;
pub mod window_decision;

// Re-export commonly used types
pub use booking_resolver::BookingResolver;
pub use engine::{AccessEngine, CycleOutcome, EngineError};
pub use gate::{ActuationSignal, GateController, GatePhase, GateState};
pub use gate_worker::{create_gate_worker, GateCmdWorker};
pub use stabilizer::{Observation, Stabilizer};
