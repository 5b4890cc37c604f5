//! Registration workflow: validate input, pick the face, check duplicates, store.

use crate::detection::{select_registration_face, Detection};
use crate::store::{EmbeddingStore, StoreError};
use crate::types::FaceProfile;
use crate::validate::{validate_id, validate_name, ValidationError};
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("no face detected in the image; use a clear, frontal photo")]
    NoFaceDetected,
    #[error("face in image is too small ({area:.0}px², need at least {min:.0}px²); use a higher resolution image")]
    FaceTooSmall { area: f32, min: f32 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct RegistrationRequest {
    pub name: String,
    /// Blank means no external ID.
    pub id: String,
    /// Faces the model found in the registration photo.
    pub detections: Vec<Detection>,
}

/// Register a new identity.
///
/// Checks run in order: name and ID validation, face presence, face size,
/// duplicate name, duplicate face. The profile is persisted by the store.
pub fn register(
    store: &mut EmbeddingStore,
    request: RegistrationRequest,
    min_face_area: f32,
    now: DateTime<Utc>,
) -> Result<FaceProfile, RegistrationError> {
    let name = validate_name(&request.name)?.to_string();
    let id = validate_id(&request.id)?.map(str::to_string);

    let face = select_registration_face(&request.detections)
        .ok_or(RegistrationError::NoFaceDetected)?;
    let area = face.bbox.area();
    if area < min_face_area {
        return Err(RegistrationError::FaceTooSmall {
            area,
            min: min_face_area,
        });
    }

    let profile = FaceProfile {
        name,
        id,
        embedding: face.embedding.clone(),
        registered_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        quality: face.score,
    };
    store.add(profile.clone())?;
    Ok(profile)
}
