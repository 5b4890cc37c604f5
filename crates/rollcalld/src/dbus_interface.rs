use std::sync::Arc;

use rollcall_core::ledger::export_file_name;
use rollcall_core::{Detection, Embedding, LedgerError, RegistrationError, StoreError};
use zbus::{fdo, interface};

use crate::service::{AttendanceService, ServiceError};

pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceInterface {
    service: Arc<AttendanceService>,
}

impl AttendanceInterface {
    pub fn new(service: Arc<AttendanceService>) -> Self {
        Self { service }
    }
}

fn to_fdo(err: ServiceError) -> fdo::Error {
    match &err {
        ServiceError::Registration(RegistrationError::Validation(_))
        | ServiceError::InvalidDate(_)
        | ServiceError::Registration(RegistrationError::Store(StoreError::EmptyEmbedding))
        | ServiceError::InvalidSelector(_) => fdo::Error::InvalidArgs(err.to_string()),
        _ => fdo::Error::Failed(err.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(format!("encoding reply: {e}")))
}

async fn blocking<T, F>(f: F) -> fdo::Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| fdo::Error::Failed(format!("worker task failed: {e}")))
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceInterface {
    /// Register a face. `detections_json` holds the faces found in the photo.
    async fn register(&self, name: &str, id: &str, detections_json: &str) -> fdo::Result<String> {
        tracing::info!(name, id, "register requested");
        let detections: Vec<Detection> = serde_json::from_str(detections_json)
            .map_err(|e| fdo::Error::InvalidArgs(format!("detections: {e}")))?;
        let service = Arc::clone(&self.service);
        let (name, id) = (name.to_string(), id.to_string());
        let profile = blocking(move || service.register(&name, &id, detections))
            .await?
            .map_err(to_fdo)?;
        to_json(&serde_json::json!({
            "name": profile.name,
            "id": profile.id,
            "registered_at": profile.registered_at,
            "quality": profile.quality,
        }))
    }

    /// List registered profiles without their embeddings.
    async fn list_profiles(&self) -> fdo::Result<String> {
        let service = Arc::clone(&self.service);
        let profiles = blocking(move || service.profiles()).await?;
        let listing: Vec<_> = profiles
            .into_iter()
            .enumerate()
            .map(|(i, p)| {
                serde_json::json!({
                    "position": i,
                    "name": p.name,
                    "id": p.id,
                    "registered_at": p.registered_at,
                })
            })
            .collect();
        to_json(&listing)
    }

    /// Remove a profile by external ID or `#<position>`.
    async fn remove_profile(&self, selector: &str) -> fdo::Result<String> {
        tracing::info!(selector, "remove_profile requested");
        let service = Arc::clone(&self.service);
        let selector = selector.to_string();
        let removed = blocking(move || service.remove_profile(&selector))
            .await?
            .map_err(to_fdo)?;
        Ok(removed.name)
    }

    /// Match a probe embedding and mark attendance.
    async fn mark(&self, embedding_json: &str) -> fdo::Result<String> {
        let probe: Embedding = serde_json::from_str(embedding_json)
            .map_err(|e| fdo::Error::InvalidArgs(format!("embedding: {e}")))?;
        let service = Arc::clone(&self.service);
        let outcome = blocking(move || service.mark(&probe))
            .await?
            .map_err(to_fdo)?;
        to_json(&outcome)
    }

    /// Attendance records for a `YYYY-MM-DD` date; blank means today.
    async fn records(&self, date: &str) -> fdo::Result<String> {
        let service = Arc::clone(&self.service);
        let date = date.to_string();
        let (date, records) = blocking(move || service.records(&date))
            .await?
            .map_err(to_fdo)?;
        to_json(&serde_json::json!({ "date": date, "records": records }))
    }

    /// CSV export for a date; `csv` is null when the day has no records.
    async fn export_csv(&self, date: &str) -> fdo::Result<String> {
        let service = Arc::clone(&self.service);
        let date = date.to_string();
        let (date, csv) = match blocking(move || service.export_csv(&date)).await? {
            Ok((date, csv)) => (date, Some(csv)),
            Err(ServiceError::Ledger(LedgerError::NoRecords(date))) => (date, None),
            Err(e) => return Err(to_fdo(e)),
        };
        to_json(&serde_json::json!({
            "date": date,
            "file_name": export_file_name(&date),
            "csv": csv,
        }))
    }

    /// Start the detection loop.
    async fn start(&self) -> fdo::Result<bool> {
        tracing::info!("start requested");
        let service = Arc::clone(&self.service);
        blocking(move || service.start_detection())
            .await?
            .map_err(to_fdo)?;
        Ok(true)
    }

    /// Stop the detection loop after the current cycle.
    async fn stop(&self) -> fdo::Result<bool> {
        tracing::info!("stop requested");
        let service = Arc::clone(&self.service);
        blocking(move || service.stop_detection()).await
    }

    /// Re-read faces and the attendance log from storage.
    async fn reload(&self) -> fdo::Result<()> {
        let service = Arc::clone(&self.service);
        blocking(move || service.reload()).await?.map_err(to_fdo)
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let service = Arc::clone(&self.service);
        let status = blocking(move || service.status()).await?;
        Ok(status.to_string())
    }
}
