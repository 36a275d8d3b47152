//! Booking window decision
//!
//! Walks bookings in resolver order (earliest entry first) and stops at the
//! first one that is either active now or not yet started. Expired bookings
//! are skipped. Nothing matching means deny.

use crate::domain::booking::{Booking, Decision};
use chrono::{DateTime, Utc};

/// Decide access for `now` given bookings sorted ascending by `entry_time`
pub fn decide(bookings: &[Booking], now: DateTime<Utc>) -> Decision {
    for booking in bookings {
        if booking.is_active_at(now) {
            return Decision::Authorize;
        }
        if booking.entry_time > now {
            return Decision::AuthorizeLater(booking.entry_time);
        }
        // exit_time < now: expired, keep looking
    }
    Decision::Deny
}
