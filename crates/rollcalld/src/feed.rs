//! Detection feed written by an external vision process.
//!
//! One line per analysed frame, each a JSON array of detections:
//! `[{"box":{"x":..,"y":..,"width":..,"height":..},"score":..,"embedding":[..]}]`.
//! A blank line or `[]` is a frame with no face. The path may be a named
//! pipe, in which case `detect` blocks until the producer writes a frame.

use rollcall_core::{DetectError, Detection, FaceDetector};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

pub struct DetectionFeed<R = File> {
    reader: BufReader<R>,
    source: PathBuf,
    line: String,
    frames: u64,
}

impl DetectionFeed<File> {
    pub fn open(path: &Path) -> Result<Self, DetectError> {
        let file = File::open(path)
            .map_err(|e| DetectError::Load(format!("{}: {e}", path.display())))?;
        tracing::info!(path = %path.display(), "detection feed opened");
        Ok(Self::from_reader(file, path))
    }
}

impl<R: Read> DetectionFeed<R> {
    pub fn from_reader(reader: R, source: &Path) -> Self {
        Self {
            reader: BufReader::new(reader),
            source: source.to_path_buf(),
            line: String::new(),
            frames: 0,
        }
    }
}

impl<R: Read> FaceDetector for DetectionFeed<R> {
    fn detect(&mut self) -> Result<Vec<Detection>, DetectError> {
        self.line.clear();
        if self.reader.read_line(&mut self.line)? == 0 {
            tracing::info!(source = %self.source.display(), frames = self.frames, "detection feed exhausted");
            return Err(DetectError::Exhausted);
        }
        self.frames += 1;

        let raw = self.line.trim();
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(raw).map_err(|e| {
            DetectError::Failed(format!("frame {} of {}: {e}", self.frames, self.source.display()))
        })
    }
}
