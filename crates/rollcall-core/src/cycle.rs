//! One attendance detection cycle, after the frame has been analysed.
//!
//! `Detecting → {NoFace | FaceTooSmall | FaceFound → Matching} →
//! {NoMatch | Matched → AttemptMark} → {Suppressed | Recorded}`. Every branch
//! ends back in idle; no state carries over between cycles except the
//! ledger's cooldown check.

use crate::detection::{select_subject, Detection, SubjectError};
use crate::ledger::{AttendanceLedger, AttendanceRecord, Identity, LedgerError, MarkOutcome};
use crate::store::EmbeddingStore;
use crate::types::Matcher;

#[derive(Debug, Clone, Copy)]
pub struct CyclePolicy {
    pub match_threshold: f32,
    pub min_face_area: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    NoFace,
    FaceTooSmall { largest: f32 },
    NoMatch,
    Suppressed { name: String, distance: f32 },
    Recorded { record: AttendanceRecord, distance: f32 },
}

impl CycleOutcome {
    /// Short machine-readable label, used in logs and status output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoFace => "no_face",
            Self::FaceTooSmall { .. } => "face_too_small",
            Self::NoMatch => "no_match",
            Self::Suppressed { .. } => "suppressed",
            Self::Recorded { .. } => "recorded",
        }
    }
}

/// Select the subject, match it, and try to mark attendance.
pub fn process_detections(
    detections: &[Detection],
    store: &EmbeddingStore,
    ledger: &mut AttendanceLedger,
    matcher: &dyn Matcher,
    policy: CyclePolicy,
) -> Result<CycleOutcome, LedgerError> {
    let subject = match select_subject(detections, policy.min_face_area) {
        Ok(subject) => subject,
        Err(SubjectError::NoFace) => return Ok(CycleOutcome::NoFace),
        Err(SubjectError::TooSmall { largest, .. }) => {
            return Ok(CycleOutcome::FaceTooSmall { largest })
        }
    };

    let Some(found) = store.find_best_match(matcher, &subject.embedding, policy.match_threshold)
    else {
        tracing::debug!(faces = detections.len(), "unknown face");
        return Ok(CycleOutcome::NoMatch);
    };
    tracing::debug!(
        name = %found.profile.name,
        distance = found.distance,
        "face matched"
    );

    let outcome = match ledger.mark(&Identity::from(&found))? {
        MarkOutcome::Recorded(record) => CycleOutcome::Recorded {
            record,
            distance: found.distance,
        },
        MarkOutcome::Suppressed { name } => CycleOutcome::Suppressed {
            name,
            distance: found.distance,
        },
    };
    Ok(outcome)
}
