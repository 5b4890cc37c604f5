//! rollcall-core: Face matching and attendance bookkeeping.
//!
//! Registered faces live in an [`EmbeddingStore`]; probes are matched by
//! nearest Euclidean distance; the [`AttendanceLedger`] records one mark per
//! identity per cooldown window and exports a day's records as CSV.

pub mod clock;
pub mod cycle;
pub mod detection;
pub mod ledger;
pub mod registration;
pub mod storage;
pub mod store;
pub mod types;
pub mod validate;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cycle::{process_detections, CycleOutcome, CyclePolicy};
pub use detection::{DetectError, Detection, FaceDetector};
pub use ledger::{AttendanceLedger, AttendanceRecord, Identity, LedgerError, MarkOutcome};
pub use registration::{register, RegistrationError, RegistrationRequest};
pub use storage::{MemoryStorage, Storage, StorageError};
pub use store::{EmbeddingStore, ProfileSelector, StoreError};
pub use types::{BoundingBox, Embedding, EuclideanMatcher, FaceProfile, MatchResult, Matcher};

/// Default distance under which a probe matches a registered face.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;
