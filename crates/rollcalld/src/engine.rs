use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use rollcall_core::{
    process_detections, AttendanceLedger, CycleOutcome, CyclePolicy, DetectError, EmbeddingStore,
    EuclideanMatcher, FaceDetector, LedgerError,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector failed to load after {attempts} attempts: {last}")]
    ModelLoad { attempts: u32, last: DetectError },
    #[error("detection loop is already running")]
    AlreadyRunning,
    #[error("failed to spawn detection thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Lock a store, recovering the data if a previous holder panicked.
pub fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// The two stores, each behind its own single-writer lock.
///
/// Lock order when both are needed: store, then ledger.
#[derive(Clone)]
pub struct Shared {
    pub store: Arc<Mutex<EmbeddingStore>>,
    pub ledger: Arc<Mutex<AttendanceLedger>>,
}

/// Counters reported by the daemon status.
#[derive(Default)]
pub struct Stats {
    pub cycles: AtomicU64,
    /// Cycles that ran the detector.
    pub processed: AtomicU64,
    /// Processed cycles that found a usable face.
    pub faces: AtomicU64,
    pub matches: AtomicU64,
    pub recorded: AtomicU64,
    pub suppressed: AtomicU64,
    pub errors: AtomicU64,
}

impl Stats {
    fn count(&self, outcome: &CycleOutcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if !matches!(outcome, CycleOutcome::NoFace | CycleOutcome::FaceTooSmall { .. }) {
            self.faces.fetch_add(1, Ordering::Relaxed);
        }
        match outcome {
            CycleOutcome::Recorded { .. } => {
                self.matches.fetch_add(1, Ordering::Relaxed);
                self.recorded.fetch_add(1, Ordering::Relaxed);
            }
            CycleOutcome::Suppressed { .. } => {
                self.matches.fetch_add(1, Ordering::Relaxed);
                self.suppressed.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "cycles": self.cycles.load(Ordering::Relaxed),
            "processed": self.processed.load(Ordering::Relaxed),
            "faces": self.faces.load(Ordering::Relaxed),
            "matches": self.matches.load(Ordering::Relaxed),
            "recorded": self.recorded.load(Ordering::Relaxed),
            "suppressed": self.suppressed.load(Ordering::Relaxed),
            "errors": self.errors.load(Ordering::Relaxed),
        })
    }
}

/// Loop timing and decision parameters.
#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub interval: Duration,
    pub frame_skip: u64,
    pub policy: CyclePolicy,
}

/// Open a detector, retrying with a linear backoff (`attempt × backoff`).
pub fn load_with_retry<D, F>(mut load: F, attempts: u32, backoff: Duration) -> Result<D, EngineError>
where
    F: FnMut() -> Result<D, DetectError>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match load() {
            Ok(detector) => return Ok(detector),
            Err(e) if attempt >= attempts => {
                tracing::error!(attempt, error = %e, "detector load failed; giving up");
                return Err(EngineError::ModelLoad { attempts, last: e });
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "detector load failed; retrying");
                std::thread::sleep(backoff * attempt);
                attempt += 1;
            }
        }
    }
}

/// Run one cycle: capture/detect without holding any lock, then match and mark.
pub fn run_cycle(
    detector: &mut dyn FaceDetector,
    shared: &Shared,
    policy: CyclePolicy,
) -> Result<CycleOutcome, CycleError> {
    let detections = detector.detect()?;
    let store = lock(&shared.store);
    let mut ledger = lock(&shared.ledger);
    Ok(process_detections(
        &detections,
        &store,
        &mut ledger,
        &EuclideanMatcher,
        policy,
    )?)
}

#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Handle to a running detection loop.
pub struct LoopHandle {
    stop_tx: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl LoopHandle {
    /// Ask the loop to stop and wait for it. An in-flight cycle finishes first.
    pub fn stop(self) {
        let _ = self.stop_tx.send(());
        if self.thread.join().is_err() {
            tracing::error!("detection thread panicked");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

/// Spawn the detection loop on a dedicated OS thread.
///
/// Cycles run back to back with `settings.interval` between them. A stop
/// request is only observed between cycles. The loop ends on its own when
/// the detector reports it is exhausted.
pub fn spawn_detection_loop<D>(
    mut detector: D,
    shared: Shared,
    stats: Arc<Stats>,
    settings: LoopSettings,
) -> Result<LoopHandle, EngineError>
where
    D: FaceDetector + Send + 'static,
{
    let (stop_tx, stop_rx) = mpsc::channel::<()>();

    let thread = std::thread::Builder::new()
        .name("rollcall-detect".into())
        .spawn(move || {
            tracing::info!(
                interval_ms = settings.interval.as_millis() as u64,
                frame_skip = settings.frame_skip,
                "detection loop started"
            );
            loop {
                let cycle = stats.cycles.fetch_add(1, Ordering::Relaxed) + 1;

                if cycle % settings.frame_skip.max(1) == 0 {
                    match run_cycle(&mut detector, &shared, settings.policy) {
                        Ok(outcome) => {
                            stats.count(&outcome);
                            log_outcome(&outcome);
                        }
                        Err(CycleError::Detect(DetectError::Exhausted)) => break,
                        Err(e) => {
                            stats.errors.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(error = %e, "detection cycle failed");
                        }
                    }
                }

                match stop_rx.recv_timeout(settings.interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            tracing::info!("detection loop stopped");
        })?;

    Ok(LoopHandle { stop_tx, thread })
}

fn log_outcome(outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::NoFace => tracing::debug!("no face detected"),
        CycleOutcome::FaceTooSmall { largest } => {
            tracing::debug!(largest, "face too small or far away")
        }
        CycleOutcome::NoMatch => tracing::info!("unknown face detected"),
        CycleOutcome::Suppressed { name, distance } => {
            tracing::info!(%name, distance, "attendance already marked recently")
        }
        CycleOutcome::Recorded { record, distance } => tracing::info!(
            name = %record.name,
            time = %record.time,
            distance,
            "attendance marked"
        ),
    }
}
