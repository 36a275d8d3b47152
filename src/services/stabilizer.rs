//! Plate reading stabilizer (debouncer)
//!
//! A single OCR pass is unreliable. A reading becomes ground truth only after
//! the same non-empty plate fills the recognition window on consecutive
//! observations. A differing reading simply evicts the oldest entry, so a
//! misread costs one extra frame instead of a reset.

use crate::domain::plate::NormalizedPlate;
use crate::infra::config::MIN_WINDOW;
use smallvec::SmallVec;
use tracing::debug;

/// Default number of identical consecutive readings needed to confirm
pub const DEFAULT_WINDOW: usize = MIN_WINDOW;

/// Result of feeding one reading to the stabilizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Confirmed(NormalizedPlate),
    Pending,
}

/// Bounded FIFO of the most recent non-empty readings
#[derive(Debug, Clone)]
pub struct RecognitionWindow {
    entries: SmallVec<[NormalizedPlate; 4]>,
    capacity: usize,
}

impl RecognitionWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_WINDOW);
        Self { entries: SmallVec::with_capacity(capacity), capacity }
    }

    /// Append a reading, evicting the oldest once past capacity
    pub fn push(&mut self, plate: NormalizedPlate) {
        self.entries.push(plate);
        if self.entries.len() > self.capacity {
            self.entries.remove(0);
        }
    }

    /// Full window, no empty entry, every entry identical
    pub fn is_unanimous(&self) -> bool {
        match self.entries.first() {
            Some(first) if self.entries.len() == self.capacity && !first.is_empty() => {
                self.entries.iter().all(|p| p == first)
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&NormalizedPlate> {
        self.entries.last()
    }
}

/// Debounces a stream of normalized plate readings for one region
#[derive(Debug, Clone)]
pub struct Stabilizer {
    window: RecognitionWindow,
}

impl Stabilizer {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    pub fn with_window(capacity: usize) -> Self {
        Self { window: RecognitionWindow::new(capacity) }
    }

    /// Feed one reading.
    ///
    /// Empty plates are ignored without touching the window. On confirmation
    /// the window is cleared so the next confirmation needs fresh reads.
    pub fn observe(&mut self, plate: &NormalizedPlate) -> Observation {
        if plate.is_empty() {
            return Observation::Pending;
        }

        self.window.push(plate.clone());

        if self.window.is_unanimous() {
            self.window.clear();
            debug!(plate = %plate, "plate_confirmed");
            return Observation::Confirmed(plate.clone());
        }

        Observation::Pending
    }

    pub fn window(&self) -> &RecognitionWindow {
        &self.window
    }
}

impl Default for Stabilizer {
    fn default() -> Self {
        Self::new()
    }
}
