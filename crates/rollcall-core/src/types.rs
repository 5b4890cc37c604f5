use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box of a detected face, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// Face embedding vector as produced by the external recognition model.
///
/// Serialized as a plain JSON number array so stored profiles never depend
/// on a binary or typed-array representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Embeddings of different length are never comparable and yield
    /// `f32::INFINITY`.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A registered identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceProfile {
    pub name: String,
    /// External identifier (student/employee number).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub embedding: Embedding,
    /// RFC 3339 registration time. Never changes after creation.
    pub registered_at: String,
    /// Detector score of the face used at registration.
    #[serde(default)]
    pub quality: f32,
}

/// Result of matching a probe embedding against the registered profiles.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub profile: FaceProfile,
    /// Position of the profile in insertion order.
    pub index: usize,
    pub distance: f32,
    /// `max(0, 1 - distance)`.
    pub confidence: f32,
}

/// Strategy for comparing a probe embedding against a gallery of registered faces.
pub trait Matcher {
    fn find_best_match(
        &self,
        probe: &Embedding,
        gallery: &[FaceProfile],
        threshold: f32,
    ) -> Option<MatchResult>;
}

/// Nearest-neighbour matcher over Euclidean distance.
///
/// Scans every gallery entry. On equal distances the earliest profile in
/// insertion order wins. A match requires the minimum distance to be strictly
/// below the threshold.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn find_best_match(
        &self,
        probe: &Embedding,
        gallery: &[FaceProfile],
        threshold: f32,
    ) -> Option<MatchResult> {
        if probe.is_empty() {
            return None;
        }
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, profile) in gallery.iter().enumerate() {
            let dist = probe.euclidean_distance(&profile.embedding);
            // Strict comparison keeps the first of equal minima.
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist < threshold => Some(MatchResult {
                profile: gallery[idx].clone(),
                index: idx,
                distance: best_dist,
                confidence: (1.0 - best_dist).max(0.0),
            }),
            _ => None,
        }
    }
}
