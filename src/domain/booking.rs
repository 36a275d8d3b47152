//! Reservations and access decisions

use crate::domain::plate::{normalize, NormalizedPlate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reservation as stored in the ledger
///
/// `plate_no` is kept lowercase by the booking clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub plate_no: String,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
}

/// Reservation for one plate, valid over `[entry_time, exit_time]`.
///
/// `entry_time <= exit_time` is assumed, not checked.
#[derive(Debug, Clone, PartialEq)]
pub struct Booking {
    pub plate_id: NormalizedPlate,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
}

impl Booking {
    pub fn new(plate_id: NormalizedPlate, entry_time: DateTime<Utc>, exit_time: DateTime<Utc>) -> Self {
        Self { plate_id, entry_time, exit_time }
    }

    /// Inclusive on both ends
    #[inline]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.entry_time <= now && now <= self.exit_time
    }
}

impl From<BookingRecord> for Booking {
    fn from(record: BookingRecord) -> Self {
        Self {
            plate_id: normalize(&record.plate_no),
            entry_time: record.entry_time,
            exit_time: record.exit_time,
        }
    }
}

/// Outcome of one confirmation cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// A booking covers the current instant
    Authorize,
    /// A booking exists but starts at the given instant
    AuthorizeLater(DateTime<Utc>),
    Deny,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Authorize => "authorize",
            Decision::AuthorizeLater(_) => "authorize_later",
            Decision::Deny => "deny",
        }
    }

    pub fn starts_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Decision::AuthorizeLater(t) => Some(*t),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_deserialize() {
        let json = r#"{"plate_no":"ab12cd3456","entry_time":"2026-10-19T09:00:00Z","exit_time":"2026-10-19T09:30:00Z"}"#;
        let record: BookingRecord = serde_json::from_str(json).unwrap();
        let booking = Booking::from(record);
        assert_eq!(booking.plate_id.as_str(), "AB12CD3456");
        assert_eq!(booking.entry_time, Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_is_active_inclusive() {
        let entry = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        let exit = Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap();
        let booking = Booking::new(normalize("AB12CD3456"), entry, exit);
        assert!(booking.is_active_at(entry));
        assert!(booking.is_active_at(exit));
        assert!(!booking.is_active_at(exit + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_decision_as_str() {
        let t = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        assert_eq!(Decision::Authorize.as_str(), "authorize");
        assert_eq!(Decision::AuthorizeLater(t).as_str(), "authorize_later");
        assert_eq!(Decision::AuthorizeLater(t).starts_at(), Some(t));
        assert_eq!(Decision::Deny.starts_at(), None);
    }
}
