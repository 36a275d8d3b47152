//! Domain models - core business types
//!
//! This module contains the canonical data types used throughout the system:
//! - `NormalizedPlate` - canonical plate identifier and `normalize`
//! - `Booking` / `BookingRecord` - reservations and their ledger form
//! - `Decision` - outcome of a confirmation cycle
//! - `PlateFrame` - one frame's worth of raw OCR candidates

pub mod booking;
pub mod plate;
pub mod types;

// Re-export commonly used types at module level
pub use booking::{Booking, BookingRecord, Decision};
pub use plate::{normalize, NormalizedPlate};
pub use types::{PlateCandidate, PlateFrame, RegionId};
