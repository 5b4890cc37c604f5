//! Boundary to the external face detection / embedding model.

use crate::types::{BoundingBox, Embedding};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest box area (px²) a face must exceed to be considered during attendance.
pub const DEFAULT_MIN_ATTENDANCE_AREA: f32 = 100.0;
/// Smallest box area (px²) accepted for a registration photo.
pub const DEFAULT_MIN_REGISTRATION_AREA: f32 = 160.0;

/// One face found by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    /// Detector confidence in [0, 1].
    #[serde(default)]
    pub score: f32,
    pub embedding: Embedding,
}

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("detector could not be loaded: {0}")]
    Load(String),
    #[error("detection failed: {0}")]
    Failed(String),
    #[error("detection source exhausted")]
    Exhausted,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Produces the faces visible in the next captured frame.
///
/// Implementations own both capture and inference; a call may block until a
/// frame is available.
pub trait FaceDetector {
    fn detect(&mut self) -> Result<Vec<Detection>, DetectError>;
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubjectError {
    #[error("no face detected")]
    NoFace,
    #[error("face too small or far away (largest area {largest:.0}px², need more than {min:.0}px²)")]
    TooSmall { largest: f32, min: f32 },
}

/// Pick the subject of an attendance frame: the largest face whose box area
/// exceeds `min_area`. Equal areas resolve to the earlier detection.
pub fn select_subject(detections: &[Detection], min_area: f32) -> Result<&Detection, SubjectError> {
    if detections.is_empty() {
        return Err(SubjectError::NoFace);
    }

    let mut best: Option<&Detection> = None;
    let mut largest = 0.0f32;
    for det in detections {
        let area = det.bbox.area();
        if area > largest {
            largest = area;
            if area > min_area {
                best = Some(det);
            }
        }
    }

    best.ok_or(SubjectError::TooSmall {
        largest,
        min: min_area,
    })
}

/// Pick the face of a registration photo: the highest-scoring detection.
pub fn select_registration_face(detections: &[Detection]) -> Option<&Detection> {
    detections
        .iter()
        .fold(None, |best: Option<&Detection>, det| match best {
            Some(b) if b.score >= det.score => Some(b),
            _ => Some(det),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(w: f32, h: f32, score: f32, tag: f32) -> Detection {
        Detection {
            bbox: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: w,
                height: h,
            },
            score,
            embedding: Embedding::new(vec![tag]),
        }
    }

    #[test]
    fn test_select_subject_empty() {
        assert_eq!(select_subject(&[], 100.0), Err(SubjectError::NoFace));
    }

    #[test]
    fn test_select_subject_largest_wins() {
        let dets = vec![det(20.0, 20.0, 0.9, 1.0), det(40.0, 40.0, 0.5, 2.0), det(30.0, 30.0, 0.99, 3.0)];
        let subject = select_subject(&dets, 100.0).unwrap();
        assert_eq!(subject.embedding.values, vec![2.0]);
    }

    #[test]
    fn test_select_subject_tie_keeps_first() {
        let dets = vec![det(20.0, 10.0, 0.9, 1.0), det(10.0, 20.0, 0.9, 2.0)];
        assert_eq!(select_subject(&dets, 100.0).unwrap().embedding.values, vec![1.0]);
    }

    #[test]
    fn test_select_subject_too_small() {
        let dets = vec![det(5.0, 5.0, 0.9, 1.0), det(10.0, 10.0, 0.9, 2.0)];
        match select_subject(&dets, 100.0) {
            Err(SubjectError::TooSmall { largest, min }) => {
                assert_eq!(largest, 100.0);
                assert_eq!(min, 100.0);
            }
            other => panic!("expected TooSmall, got {other:?}"),
        }
    }

    #[test]
    fn test_registration_face_highest_score() {
        let dets = vec![det(50.0, 50.0, 0.4, 1.0), det(20.0, 20.0, 0.8, 2.0), det(30.0, 30.0, 0.8, 3.0)];
        let face = select_registration_face(&dets).unwrap();
        assert_eq!(face.embedding.values, vec![2.0]);
        assert!(select_registration_face(&[]).is_none());
    }

    #[test]
    fn test_detection_json_shape() {
        let raw = r#"{"box":{"x":1,"y":2,"width":30,"height":40},"score":0.9,"embedding":[0.1,0.2]}"#;
        let d: Detection = serde_json::from_str(raw).unwrap();
        assert_eq!(d.bbox.area(), 1200.0);
        assert_eq!(d.embedding.len(), 2);
    }
}
