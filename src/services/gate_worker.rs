//! Gate command worker - delivers actuation signals off the frame loop
//!
//! The engine enqueues signals via an mpsc channel and never waits on the
//! actuator. The worker handles the network I/O and logs failures; a failed
//! open does not stop the worker.

use crate::infra::metrics::Metrics;
use crate::io::actuator::Actuator;
use crate::services::gate::ActuationSignal;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Worker that processes actuation signals asynchronously
pub struct GateCmdWorker {
    actuator: Arc<dyn Actuator>,
    cmd_rx: mpsc::Receiver<ActuationSignal>,
    metrics: Arc<Metrics>,
}

impl GateCmdWorker {
    pub fn new(
        actuator: Arc<dyn Actuator>,
        cmd_rx: mpsc::Receiver<ActuationSignal>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { actuator, cmd_rx, metrics }
    }

    /// Run the worker, processing signals until the channel closes
    pub async fn run(mut self) {
        info!(actuator = %self.actuator.name(), "gate_cmd_worker_started");

        while let Some(signal) = self.cmd_rx.recv().await {
            let queue_delay_us = signal.issued_at.elapsed().as_micros() as u64;

            let send_start = Instant::now();
            let result = self.actuator.open(&signal).await;
            let send_us = send_start.elapsed().as_micros() as u64;

            match result {
                Ok(()) => {
                    self.metrics.record_actuation();
                    info!(
                        cycle_id = %signal.cycle_id,
                        plate = %signal.plate,
                        queue_delay_us = %queue_delay_us,
                        send_us = %send_us,
                        "gate_cmd_processed"
                    );
                }
                Err(e) => {
                    self.metrics.record_actuation_failed();
                    error!(
                        cycle_id = %signal.cycle_id,
                        plate = %signal.plate,
                        send_us = %send_us,
                        error = %e,
                        "gate_cmd_failed"
                    );
                }
            }

            // Above 1ms the worker is falling behind
            if queue_delay_us > 1000 {
                warn!(
                    cycle_id = %signal.cycle_id,
                    queue_delay_us = %queue_delay_us,
                    "gate_cmd_queue_delay_high"
                );
            }
        }

        info!("gate_cmd_worker_stopped");
    }
}

/// Create a gate command channel and worker
///
/// Returns the sender (for the engine) and the worker (to be spawned)
pub fn create_gate_worker(
    actuator: Arc<dyn Actuator>,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (mpsc::Sender<ActuationSignal>, GateCmdWorker) {
    let (cmd_tx, cmd_rx) = mpsc::channel(buffer_size);
    let worker = GateCmdWorker::new(actuator, cmd_rx, metrics);
    (cmd_tx, worker)
}
