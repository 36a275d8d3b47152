//! Booking ledger backends
//!
//! The ledger is queried by exact `plate_no` equality using the lowercase
//! form the booking clients store. Backends:
//! - `HttpLedger` - REST endpoint returning a JSON array of records
//! - `FileLedger` - JSON array on disk, re-read on every query
//! - `MemoryLedger` - in-process records for dry runs and tests

use crate::domain::booking::BookingRecord;
use crate::infra::config::{Config, LedgerMode};
use crate::io::http_auth::AuthUrl;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("ledger returned HTTP {0}")]
    Status(u16),
    #[error("ledger request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("ledger read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger payload invalid: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Queryable store of reservations
#[async_trait]
pub trait BookingLedger: Send + Sync {
    fn name(&self) -> &'static str;

    /// All records whose `plate_no` equals `plate_key` (lowercase)
    async fn bookings_for(&self, plate_key: &str) -> Result<Vec<BookingRecord>, LedgerError>;
}

fn matching(records: impl IntoIterator<Item = BookingRecord>, plate_key: &str) -> Vec<BookingRecord> {
    records.into_iter().filter(|r| r.plate_no.eq_ignore_ascii_case(plate_key)).collect()
}

/// REST ledger: `GET {url}?plate_no={key}`
pub struct HttpLedger {
    target: AuthUrl,
    client: reqwest::Client,
}

impl HttpLedger {
    pub fn new(url: &str, timeout_ms: u64) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self { target: AuthUrl::parse(url), client })
    }
}

#[async_trait]
impl BookingLedger for HttpLedger {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn bookings_for(&self, plate_key: &str) -> Result<Vec<BookingRecord>, LedgerError> {
        let request = self
            .client
            .get(&self.target.url)
            .query(&[("plate_no", plate_key)])
            .header("Accept", "application/json");

        let response = self.target.apply(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::Status(status.as_u16()));
        }

        let records: Vec<BookingRecord> = response.json().await?;
        debug!(plate_key = %plate_key, records = %records.len(), "ledger_http_response");
        Ok(matching(records, plate_key))
    }
}

/// JSON file ledger; edits to the file apply on the next query
pub struct FileLedger {
    path: PathBuf,
}

impl FileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl BookingLedger for FileLedger {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn bookings_for(&self, plate_key: &str) -> Result<Vec<BookingRecord>, LedgerError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let records: Vec<BookingRecord> = serde_json::from_str(&content)?;
        Ok(matching(records, plate_key))
    }
}

/// In-process ledger
#[derive(Default)]
pub struct MemoryLedger {
    records: RwLock<Vec<BookingRecord>>,
    offline: AtomicBool,
}

impl MemoryLedger {
    pub fn new(records: Vec<BookingRecord>) -> Self {
        Self { records: RwLock::new(records), offline: AtomicBool::new(false) }
    }

    pub fn insert(&self, record: BookingRecord) {
        self.records.write().push(record);
    }

    /// Simulate an outage: every query fails with `Unavailable`
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }
}

#[async_trait]
impl BookingLedger for MemoryLedger {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn bookings_for(&self, plate_key: &str) -> Result<Vec<BookingRecord>, LedgerError> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(LedgerError::Unavailable("memory ledger offline".to_string()));
        }
        Ok(matching(self.records.read().iter().cloned(), plate_key))
    }
}

/// Build the ledger selected by config
pub fn build_ledger(config: &Config) -> Result<Arc<dyn BookingLedger>, LedgerError> {
    let ledger: Arc<dyn BookingLedger> = match config.ledger_mode() {
        LedgerMode::Http => Arc::new(HttpLedger::new(config.ledger_url(), config.ledger_timeout_ms())?),
        LedgerMode::File => Arc::new(FileLedger::new(config.ledger_file())),
        LedgerMode::Memory => Arc::new(MemoryLedger::default()),
    };
    info!(mode = %config.ledger_mode().as_str(), "ledger_initialized");
    Ok(ledger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(plate_no: &str, entry_hour: u32) -> BookingRecord {
        BookingRecord {
            plate_no: plate_no.to_string(),
            entry_time: Utc.with_ymd_and_hms(2026, 10, 19, entry_hour, 0, 0).unwrap(),
            exit_time: Utc.with_ymd_and_hms(2026, 10, 19, entry_hour, 30, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_memory_ledger_exact_match() {
        let ledger = MemoryLedger::new(vec![
            record("ab12cd3456", 9),
            record("xy99zz0001", 10),
            record("ab12cd3456", 11),
        ]);
        let found = ledger.bookings_for("ab12cd3456").await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(ledger.bookings_for("ab12cd345").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_ledger_offline() {
        let ledger = MemoryLedger::new(vec![record("ab12cd3456", 9)]);
        ledger.set_offline(true);
        assert!(matches!(
            ledger.bookings_for("ab12cd3456").await,
            Err(LedgerError::Unavailable(_))
        ));
        ledger.set_offline(false);
        assert_eq!(ledger.bookings_for("ab12cd3456").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_file_ledger_reads_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bookings.json");
        let records = vec![record("ab12cd3456", 9), record("mh12ab1234", 10)];
        std::fs::write(&path, serde_json::to_string(&records).unwrap()).unwrap();

        let ledger = FileLedger::new(&path);
        let found = ledger.bookings_for("mh12ab1234").await.unwrap();
        assert_eq!(found, vec![record("mh12ab1234", 10)]);

        // Edits apply without a restart
        let records = vec![record("mh12ab1234", 10), record("mh12ab1234", 12)];
        std::fs::write(&path, serde_json::to_string(&records).unwrap()).unwrap();
        assert_eq!(ledger.bookings_for("mh12ab1234").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_file_ledger_missing_file() {
        let ledger = FileLedger::new("/nonexistent/bookings.json");
        assert!(matches!(ledger.bookings_for("ab12cd3456").await, Err(LedgerError::Io(_))));
    }

    #[tokio::test]
    async fn test_file_ledger_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bookings.json");
        std::fs::write(&path, "{not a list").unwrap();
        let ledger = FileLedger::new(&path);
        assert!(matches!(ledger.bookings_for("ab12cd3456").await, Err(LedgerError::Parse(_))));
    }
}
