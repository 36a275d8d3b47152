//! Booking resolution for confirmed plates
//!
//! Fetches a plate's reservations from the ledger and orders them earliest
//! `entry_time` first, which is the order window decision relies on.

use crate::domain::booking::Booking;
use crate::domain::plate::NormalizedPlate;
use crate::infra::metrics::Metrics;
use crate::io::ledger::{BookingLedger, LedgerError};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub struct BookingResolver {
    ledger: Arc<dyn BookingLedger>,
    metrics: Arc<Metrics>,
}

impl BookingResolver {
    pub fn new(ledger: Arc<dyn BookingLedger>, metrics: Arc<Metrics>) -> Self {
        Self { ledger, metrics }
    }

    /// Bookings for `plate`, ascending by entry time.
    ///
    /// An empty result is not an error: it means the plate is unknown. Logging
    /// and throttling for that case belong to the caller.
    pub async fn resolve(&self, plate: &NormalizedPlate) -> Result<Vec<Booking>, LedgerError> {
        let plate_key = plate.ledger_key();
        let start = Instant::now();

        let result = self.ledger.bookings_for(&plate_key).await;
        self.metrics.record_ledger_latency(start.elapsed().as_micros() as u64);

        let mut bookings: Vec<Booking> = result?
            .into_iter()
            .filter(|r| r.plate_no.eq_ignore_ascii_case(&plate_key))
            .map(Booking::from)
            .collect();

        // Stable: equal entry times keep ledger order
        bookings.sort_by_key(|b| b.entry_time);

        debug!(
            plate = %plate,
            ledger = %self.ledger.name(),
            bookings = %bookings.len(),
            "bookings_resolved"
        );
        Ok(bookings)
    }
}
