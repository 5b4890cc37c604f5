//! Daemon-side operations shared by the D-Bus interface and startup code.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use rollcall_core::{
    register, AttendanceLedger, AttendanceRecord, CyclePolicy, Detection, Embedding,
    EmbeddingStore, EuclideanMatcher, FaceProfile, Identity, LedgerError, MarkOutcome,
    ProfileSelector, RegistrationError, RegistrationRequest, StoreError,
};
use serde::Serialize;
use thiserror::Error;

use crate::config::Config;
use crate::engine::{self, lock, EngineError, LoopHandle, LoopSettings, Shared, Stats};
use crate::feed::DetectionFeed;

const MODEL_LOAD_BACKOFF: Duration = Duration::from_millis(1000);

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("invalid date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("invalid profile selector {0:?}, expected an ID or #<position>")]
    InvalidSelector(String),
}

/// Outcome of a manual mark request.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ManualMark {
    NoMatch,
    Suppressed { name: String, distance: f32 },
    Recorded { record: AttendanceRecord, distance: f32 },
}

pub struct AttendanceService {
    shared: Shared,
    stats: Arc<Stats>,
    config: Config,
    detection: Mutex<Option<LoopHandle>>,
}

impl AttendanceService {
    pub fn new(store: EmbeddingStore, ledger: AttendanceLedger, config: Config) -> Self {
        Self {
            shared: Shared {
                store: Arc::new(Mutex::new(store)),
                ledger: Arc::new(Mutex::new(ledger)),
            },
            stats: Arc::new(Stats::default()),
            config,
            detection: Mutex::new(None),
        }
    }

    pub fn register(
        &self,
        name: &str,
        id: &str,
        detections: Vec<Detection>,
    ) -> Result<FaceProfile, ServiceError> {
        let request = RegistrationRequest {
            name: name.to_string(),
            id: id.to_string(),
            detections,
        };
        let mut store = lock(&self.shared.store);
        Ok(register(
            &mut store,
            request,
            self.config.min_registration_area,
            Utc::now(),
        )?)
    }

    pub fn profiles(&self) -> Vec<FaceProfile> {
        lock(&self.shared.store).list().to_vec()
    }

    pub fn remove_profile(&self, selector: &str) -> Result<FaceProfile, ServiceError> {
        let selector: ProfileSelector = selector
            .parse()
            .map_err(|_| ServiceError::InvalidSelector(selector.to_string()))?;
        Ok(lock(&self.shared.store).remove(&selector)?)
    }

    /// Match one probe embedding and mark attendance, bypassing the detection loop.
    pub fn mark(&self, probe: &Embedding) -> Result<ManualMark, ServiceError> {
        let store = lock(&self.shared.store);
        let Some(found) = store.find_best_match(&EuclideanMatcher, probe, self.config.match_threshold)
        else {
            return Ok(ManualMark::NoMatch);
        };
        let mut ledger = lock(&self.shared.ledger);
        Ok(match ledger.mark(&Identity::from(&found))? {
            MarkOutcome::Recorded(record) => ManualMark::Recorded {
                record,
                distance: found.distance,
            },
            MarkOutcome::Suppressed { name } => ManualMark::Suppressed {
                name,
                distance: found.distance,
            },
        })
    }

    /// Records for `date`, or today when `date` is blank.
    pub fn records(&self, date: &str) -> Result<(String, Vec<AttendanceRecord>), ServiceError> {
        let ledger = lock(&self.shared.ledger);
        let date = resolve_date(date, &ledger)?;
        let records = ledger.records(&date).to_vec();
        Ok((date, records))
    }

    pub fn export_csv(&self, date: &str) -> Result<(String, String), ServiceError> {
        let ledger = lock(&self.shared.ledger);
        let date = resolve_date(date, &ledger)?;
        let csv = ledger.export_csv(&date)?;
        Ok((date, csv))
    }

    pub fn reload(&self) -> Result<(), ServiceError> {
        lock(&self.shared.store).reload()?;
        lock(&self.shared.ledger).reload()?;
        tracing::info!("stores reloaded from storage");
        Ok(())
    }

    /// Load the detector (with retries) and start the detection loop.
    ///
    /// Blocks for the duration of the retries; call from a blocking context.
    /// The loop slot is only locked to check it and to install the handle,
    /// so status queries stay responsive while the detector loads.
    pub fn start_detection(&self) -> Result<(), ServiceError> {
        if self.is_detecting() {
            return Err(EngineError::AlreadyRunning.into());
        }

        let feed_path = self.config.feed_path.clone();
        let detector = engine::load_with_retry(
            || DetectionFeed::open(&feed_path),
            self.config.model_load_retries,
            MODEL_LOAD_BACKOFF,
        )?;

        let mut slot = lock(&self.detection);
        // Another start may have won while the detector was loading.
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(EngineError::AlreadyRunning.into());
        }
        if let Some(finished) = slot.take() {
            finished.stop();
        }

        let settings = LoopSettings {
            interval: self.config.detection_interval(),
            frame_skip: self.config.frame_skip,
            policy: CyclePolicy {
                match_threshold: self.config.match_threshold,
                min_face_area: self.config.min_attendance_area,
            },
        };
        let handle = engine::spawn_detection_loop(
            detector,
            self.shared.clone(),
            self.stats.clone(),
            settings,
        )?;
        *slot = Some(handle);
        Ok(())
    }

    /// Stop the detection loop. Returns false when it was not running.
    ///
    /// Waits for an in-flight cycle; call from a blocking context.
    pub fn stop_detection(&self) -> bool {
        let handle = lock(&self.detection).take();
        match handle {
            Some(h) => {
                let was_running = !h.is_finished();
                h.stop();
                was_running
            }
            None => false,
        }
    }

    pub fn is_detecting(&self) -> bool {
        lock(&self.detection)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn status(&self) -> serde_json::Value {
        let profiles = lock(&self.shared.store).len();
        let today = {
            let ledger = lock(&self.shared.ledger);
            serde_json::json!({
                "date": ledger.today(),
                "records": ledger.today_records().len(),
            })
        };
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "detecting": self.is_detecting(),
            "feed": self.config.feed_path.display().to_string(),
            "profiles": profiles,
            "today": today,
            "match_threshold": self.config.match_threshold,
            "duplicate_threshold": self.config.duplicate_threshold,
            "cooldown_minutes": self.config.cooldown_minutes,
            "stats": self.stats.snapshot(),
        })
    }
}

fn resolve_date(date: &str, ledger: &AttendanceLedger) -> Result<String, ServiceError> {
    let date = date.trim();
    if date.is_empty() {
        return Ok(ledger.today());
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| ServiceError::InvalidDate(date.to_string()))
}
