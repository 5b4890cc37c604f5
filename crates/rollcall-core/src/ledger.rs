//! Attendance ledger: cooldown-guarded marking, per-day records, CSV export.

use crate::clock::Clock;
use crate::storage::{self, Storage, StorageError, LOG_KEY};
use crate::types::MatchResult;
use crate::validate::escape_html;
use chrono::{DateTime, Duration, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_COOLDOWN_MINUTES: i64 = 5;
const CSV_HEADER: &str = "Name,ID,Time";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("no attendance records for {0}")]
    NoRecords(String),
    #[error(transparent)]
    Persistence(#[from] StorageError),
}

/// One successful attendance mark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub name: String,
    /// Empty when the identity has no external ID.
    pub id: String,
    /// Local wall-clock time, `HH:MM:SS`.
    pub time: String,
    /// Epoch milliseconds. Authoritative for ordering and cooldown.
    pub timestamp: i64,
    #[serde(default)]
    pub confidence: f32,
}

/// Attendance records grouped by `YYYY-MM-DD`.
pub type AttendanceLog = BTreeMap<String, Vec<AttendanceRecord>>;

/// Who is being marked present.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub name: String,
    pub id: Option<String>,
    pub confidence: f32,
}

impl From<&MatchResult> for Identity {
    fn from(m: &MatchResult) -> Self {
        Self {
            name: m.profile.name.clone(),
            id: m.profile.id.clone(),
            confidence: m.confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkOutcome {
    Recorded(AttendanceRecord),
    /// Same identity was marked within the cooldown window. Nothing was written.
    Suppressed { name: String },
}

/// UTC calendar date of `at`, formatted `YYYY-MM-DD`.
pub fn date_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// File name used when exporting one day's records.
pub fn export_file_name(date: &str) -> String {
    format!("attendance_{date}.csv")
}

/// Sole owner of the date-keyed attendance log.
pub struct AttendanceLedger {
    log: AttendanceLog,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    cooldown: Duration,
}

impl AttendanceLedger {
    pub fn load(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Result<Self, LedgerError> {
        let log: AttendanceLog = storage::load_json(storage.as_ref(), LOG_KEY)?;
        tracing::debug!(days = log.len(), "loaded attendance log");
        Ok(Self {
            log,
            storage,
            clock,
            cooldown: Duration::minutes(DEFAULT_COOLDOWN_MINUTES),
        })
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Replace the in-memory log with the persisted one.
    pub fn reload(&mut self) -> Result<(), LedgerError> {
        self.log = storage::load_json(self.storage.as_ref(), LOG_KEY)?;
        Ok(())
    }

    pub fn today(&self) -> String {
        date_key(self.clock.now())
    }

    /// Record attendance for `identity` unless it was marked within the cooldown.
    ///
    /// A record matches the identity when its name is equal or, for identities
    /// with an external ID, its ID is equal. If persisting fails the record
    /// stays in memory and the error is returned.
    pub fn mark(&mut self, identity: &Identity) -> Result<MarkOutcome, LedgerError> {
        let now = self.clock.now();
        let now_ms = now.timestamp_millis();
        let cutoff = now_ms - self.cooldown.num_milliseconds();

        let name = escape_html(&identity.name);
        let id = identity
            .id
            .as_deref()
            .map(escape_html)
            .unwrap_or_default();

        let day = self.log.entry(date_key(now)).or_default();
        let recent = day.iter().any(|r| {
            let same = r.name == name || (!id.is_empty() && r.id == id);
            same && r.timestamp > cutoff
        });
        if recent {
            tracing::info!(name = %identity.name, "attendance already marked recently");
            return Ok(MarkOutcome::Suppressed {
                name: identity.name.clone(),
            });
        }

        let record = AttendanceRecord {
            name,
            id,
            time: now.with_timezone(&Local).format("%H:%M:%S").to_string(),
            timestamp: now_ms,
            confidence: identity.confidence,
        };
        day.push(record.clone());
        tracing::info!(
            name = %record.name,
            id = %record.id,
            confidence = record.confidence,
            "attendance recorded"
        );

        self.persist()?;
        Ok(MarkOutcome::Recorded(record))
    }

    /// Records for `date` in insertion order; empty when the day has none.
    pub fn records(&self, date: &str) -> &[AttendanceRecord] {
        self.log.get(date).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn today_records(&self) -> &[AttendanceRecord] {
        self.records(&self.today())
    }

    pub fn log(&self) -> &AttendanceLog {
        &self.log
    }

    /// Render one day's records as CSV: `Name,ID,Time` header, quoted fields,
    /// `\n` line separators, no trailing newline.
    pub fn export_csv(&self, date: &str) -> Result<String, LedgerError> {
        let records = self.records(date);
        if records.is_empty() {
            return Err(LedgerError::NoRecords(date.to_string()));
        }
        let mut lines = Vec::with_capacity(records.len() + 1);
        lines.push(CSV_HEADER.to_string());
        lines.extend(
            records
                .iter()
                .map(|r| format!("\"{}\",\"{}\",\"{}\"", r.name, r.id, r.time)),
        );
        Ok(lines.join("\n"))
    }

    fn persist(&self) -> Result<(), LedgerError> {
        storage::save_json(self.storage.as_ref(), LOG_KEY, &self.log).map_err(|e| {
            tracing::error!(error = %e, "failed to persist attendance log");
            LedgerError::Persistence(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStorage;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn ledger() -> (AttendanceLedger, Arc<ManualClock>, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(start()));
        let ledger = AttendanceLedger::load(storage.clone(), clock.clone()).unwrap();
        (ledger, clock, storage)
    }

    fn who(name: &str, id: Option<&str>) -> Identity {
        Identity {
            name: name.into(),
            id: id.map(String::from),
            confidence: 0.7,
        }
    }

    #[test]
    fn test_mark_records_under_today() {
        let (mut ledger, _, _) = ledger();
        let outcome = ledger.mark(&who("Ann", Some("1"))).unwrap();
        let MarkOutcome::Recorded(record) = outcome else {
            panic!("expected a recorded mark");
        };
        assert_eq!(record.name, "Ann");
        assert_eq!(record.id, "1");
        assert_eq!(record.timestamp, start().timestamp_millis());
        assert_eq!(record.time.len(), 8);
        assert_eq!(ledger.today(), "2026-03-02");
        assert_eq!(ledger.records("2026-03-02").len(), 1);
    }

    #[test]
    fn test_second_mark_within_cooldown_suppressed() {
        let (mut ledger, clock, _) = ledger();
        ledger.mark(&who("Ann", Some("1"))).unwrap();
        clock.advance(Duration::minutes(4));
        let outcome = ledger.mark(&who("Ann", Some("1"))).unwrap();
        assert!(matches!(outcome, MarkOutcome::Suppressed { .. }));
        assert_eq!(ledger.today_records().len(), 1);
    }

    #[test]
    fn test_mark_after_cooldown_succeeds() {
        let (mut ledger, clock, _) = ledger();
        ledger.mark(&who("Ann", Some("1"))).unwrap();
        clock.advance(Duration::minutes(4));
        ledger.mark(&who("Ann", Some("1"))).unwrap();
        clock.advance(Duration::minutes(1));
        let outcome = ledger.mark(&who("Ann", Some("1"))).unwrap();
        assert!(matches!(outcome, MarkOutcome::Recorded(_)));
        assert_eq!(ledger.today_records().len(), 2);
    }

    #[test]
    fn test_suppression_matches_on_name_or_id() {
        let (mut ledger, _, _) = ledger();
        ledger.mark(&who("Ann", Some("1"))).unwrap();
        // Same id, different name.
        assert!(matches!(
            ledger.mark(&who("Annie", Some("1"))).unwrap(),
            MarkOutcome::Suppressed { .. }
        ));
        // Same name, different id.
        assert!(matches!(
            ledger.mark(&who("Ann", Some("2"))).unwrap(),
            MarkOutcome::Suppressed { .. }
        ));
        assert_eq!(ledger.today_records().len(), 1);
    }

    #[test]
    fn test_missing_ids_do_not_collide() {
        let (mut ledger, _, _) = ledger();
        ledger.mark(&who("Ann", None)).unwrap();
        let outcome = ledger.mark(&who("Bob", None)).unwrap();
        assert!(matches!(outcome, MarkOutcome::Recorded(_)));
        assert_eq!(ledger.today_records().len(), 2);
    }

    #[test]
    fn test_suppressed_mark_does_not_write() {
        let (mut ledger, _, storage) = ledger();
        ledger.mark(&who("Ann", None)).unwrap();
        let before = storage.raw(LOG_KEY).unwrap();
        storage.fail_writes(true);
        let outcome = ledger.mark(&who("Ann", None)).unwrap();
        assert!(matches!(outcome, MarkOutcome::Suppressed { .. }));
        assert_eq!(storage.raw(LOG_KEY).unwrap(), before);
    }

    #[test]
    fn test_new_day_resets_cooldown_bucket() {
        let (mut ledger, clock, _) = ledger();
        clock.set(Utc.with_ymd_and_hms(2026, 3, 2, 23, 58, 0).unwrap());
        ledger.mark(&who("Ann", None)).unwrap();
        clock.advance(Duration::minutes(3));
        let outcome = ledger.mark(&who("Ann", None)).unwrap();
        assert!(matches!(outcome, MarkOutcome::Recorded(_)));
        assert_eq!(ledger.records("2026-03-02").len(), 1);
        assert_eq!(ledger.records("2026-03-03").len(), 1);
    }

    #[test]
    fn test_markup_is_escaped_and_still_suppressed() {
        let (mut ledger, _, _) = ledger();
        let MarkOutcome::Recorded(record) = ledger.mark(&who("O'Neil", Some("<1>"))).unwrap()
        else {
            panic!("expected a recorded mark");
        };
        assert_eq!(record.name, "O&#39;Neil");
        assert_eq!(record.id, "&lt;1&gt;");
        assert!(matches!(
            ledger.mark(&who("O'Neil", None)).unwrap(),
            MarkOutcome::Suppressed { .. }
        ));
    }

    #[test]
    fn test_failed_write_keeps_record_in_memory() {
        let (mut ledger, _, storage) = ledger();
        storage.fail_writes(true);
        let err = ledger.mark(&who("Ann", None)).unwrap_err();
        assert!(matches!(err, LedgerError::Persistence(_)));
        assert_eq!(ledger.today_records().len(), 1);
    }

    #[test]
    fn test_reload_and_byte_identical_round_trip() {
        let (mut ledger, clock, storage) = ledger();
        ledger.mark(&who("Ann", Some("1"))).unwrap();
        clock.advance(Duration::seconds(30));
        ledger.mark(&who("Bob", None)).unwrap();
        let first = storage.raw(LOG_KEY).unwrap();

        let mut other = AttendanceLedger::load(storage.clone(), clock.clone()).unwrap();
        other.reload().unwrap();
        assert_eq!(other.log(), ledger.log());
        other.persist().unwrap();
        assert_eq!(storage.raw(LOG_KEY).unwrap(), first);
    }

    #[test]
    fn test_export_csv_exact_format() {
        let (mut ledger, _, _) = ledger();
        ledger.log.insert(
            "2026-03-02".into(),
            vec![AttendanceRecord {
                name: "Ann".into(),
                id: "1".into(),
                time: "10:00:00".into(),
                timestamp: 0,
                confidence: 0.0,
            }],
        );
        assert_eq!(
            ledger.export_csv("2026-03-02").unwrap(),
            "Name,ID,Time\n\"Ann\",\"1\",\"10:00:00\""
        );
    }

    #[test]
    fn test_export_csv_preserves_insertion_order() {
        let (mut ledger, clock, _) = ledger();
        ledger.mark(&who("Zed", None)).unwrap();
        clock.advance(Duration::seconds(1));
        ledger.mark(&who("Amy", Some("7"))).unwrap();
        let csv = ledger.export_csv("2026-03-02").unwrap();
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("\"Zed\",\"\","));
        assert!(lines[2].starts_with("\"Amy\",\"7\","));
    }

    #[test]
    fn test_export_csv_no_records() {
        let (ledger, _, _) = ledger();
        assert!(matches!(
            ledger.export_csv("2026-03-02"),
            Err(LedgerError::NoRecords(ref d)) if d == "2026-03-02"
        ));
    }

    #[test]
    fn test_export_file_name() {
        assert_eq!(export_file_name("2026-03-02"), "attendance_2026-03-02.csv");
    }

    #[test]
    fn test_custom_cooldown() {
        let (ledger, clock, _) = ledger();
        let mut ledger = ledger.with_cooldown(Duration::seconds(10));
        ledger.mark(&who("Ann", None)).unwrap();
        clock.advance(Duration::seconds(11));
        assert!(matches!(
            ledger.mark(&who("Ann", None)).unwrap(),
            MarkOutcome::Recorded(_)
        ));
    }
}
