//! Registered face profiles and the duplicate rules guarding them.

use crate::storage::{self, Storage, StorageError, FACES_KEY};
use crate::types::{Embedding, FaceProfile, MatchResult, Matcher};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Default distance under which two registration faces count as the same person.
pub const DEFAULT_DUPLICATE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("a person named {0:?} is already registered")]
    DuplicateName(String),
    #[error("this face is already registered as {name:?} (distance {distance:.3})")]
    DuplicateFace { name: String, distance: f32 },
    #[error("embedding is empty")]
    EmptyEmbedding,
    #[error("embedding has {actual} dimensions, registered faces have {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("no registered profile matches {0}")]
    NotFound(ProfileSelector),
    #[error(transparent)]
    Persistence(#[from] StorageError),
}

/// Addresses one profile for removal.
///
/// Parses `#<n>` as a zero-based position and anything else as an external ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileSelector {
    Index(usize),
    Id(String),
}

impl FromStr for ProfileSelector {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.strip_prefix('#') {
            Some(pos) => Ok(Self::Index(pos.parse()?)),
            None => Ok(Self::Id(s.to_string())),
        }
    }
}

impl fmt::Display for ProfileSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "position #{i}"),
            Self::Id(id) => write!(f, "id {id:?}"),
        }
    }
}

/// Sole owner of the registered profiles.
///
/// Every mutation writes the full collection back to storage before
/// returning. A failed write is reported, but the in-memory change is kept.
pub struct EmbeddingStore {
    profiles: Vec<FaceProfile>,
    storage: Arc<dyn Storage>,
    duplicate_threshold: f32,
}

impl EmbeddingStore {
    /// Load the persisted profiles.
    pub fn load(storage: Arc<dyn Storage>, duplicate_threshold: f32) -> Result<Self, StoreError> {
        let profiles: Vec<FaceProfile> = storage::load_json(storage.as_ref(), FACES_KEY)?;
        tracing::debug!(count = profiles.len(), "loaded face profiles");
        Ok(Self {
            profiles,
            storage,
            duplicate_threshold,
        })
    }

    /// Replace the in-memory profiles with the persisted ones.
    pub fn reload(&mut self) -> Result<(), StoreError> {
        self.profiles = storage::load_json(self.storage.as_ref(), FACES_KEY)?;
        tracing::debug!(count = self.profiles.len(), "reloaded face profiles");
        Ok(())
    }

    pub fn duplicate_threshold(&self) -> f32 {
        self.duplicate_threshold
    }

    /// Registered profiles in insertion order.
    pub fn list(&self) -> &[FaceProfile] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Case-insensitive, whitespace-trimmed name collision check.
    pub fn is_duplicate_name(&self, name: &str) -> bool {
        let wanted = name.trim().to_lowercase();
        self.profiles
            .iter()
            .any(|p| p.name.trim().to_lowercase() == wanted)
    }

    /// First registered profile closer than the duplicate threshold, with its distance.
    pub fn duplicate_face(&self, embedding: &Embedding) -> Option<(&FaceProfile, f32)> {
        self.profiles.iter().find_map(|p| {
            let d = embedding.euclidean_distance(&p.embedding);
            (d < self.duplicate_threshold).then_some((p, d))
        })
    }

    pub fn is_duplicate_face(&self, embedding: &Embedding) -> bool {
        self.duplicate_face(embedding).is_some()
    }

    /// Append a profile after the name and face duplicate checks pass.
    pub fn add(&mut self, profile: FaceProfile) -> Result<(), StoreError> {
        if self.is_duplicate_name(&profile.name) {
            return Err(StoreError::DuplicateName(profile.name));
        }
        if profile.embedding.is_empty() {
            return Err(StoreError::EmptyEmbedding);
        }
        if let Some(existing) = self.profiles.first() {
            if existing.embedding.len() != profile.embedding.len() {
                return Err(StoreError::DimensionMismatch {
                    expected: existing.embedding.len(),
                    actual: profile.embedding.len(),
                });
            }
        }
        if let Some((existing, distance)) = self.duplicate_face(&profile.embedding) {
            return Err(StoreError::DuplicateFace {
                name: existing.name.clone(),
                distance,
            });
        }

        tracing::info!(name = %profile.name, id = ?profile.id, "registering face profile");
        self.profiles.push(profile);
        self.persist()
    }

    /// Remove one profile. Absent targets are reported as `NotFound`.
    pub fn remove(&mut self, selector: &ProfileSelector) -> Result<FaceProfile, StoreError> {
        let pos = match selector {
            ProfileSelector::Index(i) => (*i < self.profiles.len()).then_some(*i),
            ProfileSelector::Id(id) => self
                .profiles
                .iter()
                .position(|p| p.id.as_deref() == Some(id.as_str())),
        };
        let pos = pos.ok_or_else(|| StoreError::NotFound(selector.clone()))?;

        let removed = self.profiles.remove(pos);
        tracing::info!(name = %removed.name, %selector, "removed face profile");
        self.persist()?;
        Ok(removed)
    }

    /// Match a probe embedding against every registered profile.
    pub fn find_best_match(
        &self,
        matcher: &dyn Matcher,
        probe: &Embedding,
        threshold: f32,
    ) -> Option<MatchResult> {
        matcher.find_best_match(probe, &self.profiles, threshold)
    }

    fn persist(&self) -> Result<(), StoreError> {
        storage::save_json(self.storage.as_ref(), FACES_KEY, &self.profiles).map_err(|e| {
            tracing::error!(error = %e, "failed to persist face profiles");
            StoreError::Persistence(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::types::EuclideanMatcher;

    fn profile(name: &str, id: Option<&str>, values: Vec<f32>) -> FaceProfile {
        FaceProfile {
            name: name.into(),
            id: id.map(String::from),
            embedding: Embedding::new(values),
            registered_at: "2026-03-02T08:00:00Z".into(),
            quality: 0.8,
        }
    }

    fn store_with(storage: Arc<MemoryStorage>, threshold: f32) -> EmbeddingStore {
        EmbeddingStore::load(storage, threshold).unwrap()
    }

    #[test]
    fn test_add_and_list_in_insertion_order() {
        let mut store = store_with(Arc::new(MemoryStorage::new()), 0.6);
        store.add(profile("Ann", Some("1"), vec![0.0, 0.0])).unwrap();
        store.add(profile("Bob", None, vec![1.0, 0.0])).unwrap();
        let names: Vec<_> = store.list().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["Ann", "Bob"]);
    }

    #[test]
    fn test_duplicate_name_case_insensitive() {
        let mut store = store_with(Arc::new(MemoryStorage::new()), 0.6);
        store.add(profile("Ann", None, vec![0.0, 0.0])).unwrap();
        let err = store.add(profile("ann", None, vec![5.0, 5.0])).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateName(ref n) if n == "ann"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_duplicate_face_rejected_below_threshold() {
        let mut store = store_with(Arc::new(MemoryStorage::new()), 0.6);
        store.add(profile("Ann", None, vec![0.0, 0.0])).unwrap();
        let err = store.add(profile("Bob", None, vec![0.3, 0.0])).unwrap_err();
        match err {
            StoreError::DuplicateFace { name, distance } => {
                assert_eq!(name, "Ann");
                assert!((distance - 0.3).abs() < 1e-6);
            }
            other => panic!("expected DuplicateFace, got {other:?}"),
        }
    }

    #[test]
    fn test_distinct_face_accepted_above_threshold() {
        let mut store = store_with(Arc::new(MemoryStorage::new()), 0.6);
        store.add(profile("Ann", None, vec![0.0, 0.0])).unwrap();
        store.add(profile("Bob", None, vec![0.8, 0.0])).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut store = store_with(Arc::new(MemoryStorage::new()), 0.6);
        store.add(profile("Ann", None, vec![0.0, 0.0])).unwrap();
        let err = store.add(profile("Bob", None, vec![5.0, 0.0, 0.0])).unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch { expected: 2, actual: 3 }
        ));
    }

    #[test]
    fn test_empty_embedding_rejected() {
        let storage = Arc::new(MemoryStorage::new());
        let mut store = store_with(storage.clone(), 0.6);
        let err = store.add(profile("Ann", None, vec![])).unwrap_err();
        assert!(matches!(err, StoreError::EmptyEmbedding));
        assert!(store.is_empty());
        assert!(storage.raw(FACES_KEY).is_none());

        store.add(profile("Bob", None, vec![0.1, 0.2])).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_add_persists_and_reload_sees_it() {
        let storage = Arc::new(MemoryStorage::new());
        let mut writer = store_with(storage.clone(), 0.5);
        let mut reader = store_with(storage.clone(), 0.5);
        writer.add(profile("Ann", Some("A-1"), vec![0.25, 0.5])).unwrap();

        assert!(reader.is_empty());
        reader.reload().unwrap();
        assert_eq!(reader.list(), writer.list());
    }

    #[test]
    fn test_persisted_round_trip_is_byte_identical() {
        let storage = Arc::new(MemoryStorage::new());
        let mut store = store_with(storage.clone(), 0.5);
        store.add(profile("Ann", Some("1"), vec![0.1, 0.2, 0.3])).unwrap();
        store.add(profile("Bob", None, vec![0.9, -0.7, 0.33333334])).unwrap();
        let first = storage.raw(FACES_KEY).unwrap();

        let reloaded = store_with(storage.clone(), 0.5);
        reloaded.persist().unwrap();
        assert_eq!(storage.raw(FACES_KEY).unwrap(), first);
    }

    #[test]
    fn test_remove_by_index_and_id() {
        let mut store = store_with(Arc::new(MemoryStorage::new()), 0.5);
        store.add(profile("Ann", Some("1"), vec![0.0, 0.0])).unwrap();
        store.add(profile("Bob", Some("2"), vec![1.0, 0.0])).unwrap();
        store.add(profile("Cid", None, vec![2.0, 0.0])).unwrap();

        let removed = store.remove(&ProfileSelector::Id("2".into())).unwrap();
        assert_eq!(removed.name, "Bob");
        let removed = store.remove(&ProfileSelector::Index(1)).unwrap();
        assert_eq!(removed.name, "Cid");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove_missing_is_not_found() {
        let mut store = store_with(Arc::new(MemoryStorage::new()), 0.5);
        store.add(profile("Ann", Some("1"), vec![0.0, 0.0])).unwrap();
        assert!(matches!(
            store.remove(&ProfileSelector::Index(3)),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.remove(&ProfileSelector::Id("nope".into())),
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_failed_write_keeps_in_memory_change() {
        let storage = Arc::new(MemoryStorage::new());
        let mut store = store_with(storage.clone(), 0.5);
        storage.fail_writes(true);
        let err = store.add(profile("Ann", None, vec![0.0])).unwrap_err();
        assert!(matches!(err, StoreError::Persistence(_)));
        assert_eq!(store.len(), 1);
        assert!(storage.raw(FACES_KEY).is_none());
    }

    #[test]
    fn test_selector_parsing() {
        assert_eq!("#2".parse::<ProfileSelector>().unwrap(), ProfileSelector::Index(2));
        assert_eq!(
            "S-12".parse::<ProfileSelector>().unwrap(),
            ProfileSelector::Id("S-12".into())
        );
        assert_eq!("7".parse::<ProfileSelector>().unwrap(), ProfileSelector::Id("7".into()));
        assert!("#x".parse::<ProfileSelector>().is_err());
    }

    #[test]
    fn test_find_best_match_through_store() {
        let mut store = store_with(Arc::new(MemoryStorage::new()), 0.5);
        store.add(profile("Ann", None, vec![0.0, 0.0])).unwrap();
        store.add(profile("Bob", None, vec![1.0, 1.0])).unwrap();
        let probe = Embedding::new(vec![0.9, 1.0]);
        let m = store.find_best_match(&EuclideanMatcher, &probe, 0.6).unwrap();
        assert_eq!(m.profile.name, "Bob");
        assert_eq!(m.index, 1);
    }
}
