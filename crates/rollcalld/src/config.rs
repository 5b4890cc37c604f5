use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use rollcall_core::detection::{DEFAULT_MIN_ATTENDANCE_AREA, DEFAULT_MIN_REGISTRATION_AREA};
use rollcall_core::ledger::DEFAULT_COOLDOWN_MINUTES;
use rollcall_core::store::DEFAULT_DUPLICATE_THRESHOLD;
use rollcall_core::DEFAULT_MATCH_THRESHOLD;

/// Which D-Bus bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database holding faces and the attendance log.
    pub db_path: PathBuf,
    /// Path to the SQLite database behind the roster API.
    pub roster_path: PathBuf,
    /// JSON-lines detection feed (regular file or named pipe).
    pub feed_path: PathBuf,
    /// Euclidean distance below which a probe matches a registered face.
    pub match_threshold: f32,
    /// Euclidean distance below which a new registration is a duplicate face.
    pub duplicate_threshold: f32,
    /// Minutes before the same identity can be marked again.
    pub cooldown_minutes: i64,
    /// Pause between detection cycles.
    pub detection_interval_ms: u64,
    /// Process only every Nth cycle.
    pub frame_skip: u64,
    /// Minimum box area for a registration face.
    pub min_registration_area: f32,
    /// Minimum box area for an attendance face.
    pub min_attendance_area: f32,
    /// Attempts to open the detector before giving up.
    pub model_load_retries: u32,
    /// Start the detection loop at daemon startup.
    pub autostart: bool,
    pub bus: BusKind,
    /// Serve the roster HTTP API.
    pub http_enabled: bool,
    pub http_addr: SocketAddr,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = env_path("ROLLCALL_DB_PATH").unwrap_or_else(|| data_dir.join("attendance.db"));
        let roster_path =
            env_path("ROLLCALL_ROSTER_PATH").unwrap_or_else(|| data_dir.join("roster.db"));
        let feed_path = env_path("ROLLCALL_FEED_PATH")
            .unwrap_or_else(|| PathBuf::from("/run/rollcall/detections.jsonl"));

        let bus = match std::env::var("ROLLCALL_BUS").as_deref() {
            Ok("system") => BusKind::System,
            _ => BusKind::Session,
        };

        Self {
            db_path,
            roster_path,
            feed_path,
            match_threshold: env_parse("ROLLCALL_MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD),
            duplicate_threshold: env_parse(
                "ROLLCALL_DUPLICATE_THRESHOLD",
                DEFAULT_DUPLICATE_THRESHOLD,
            ),
            cooldown_minutes: env_parse("ROLLCALL_COOLDOWN_MINUTES", DEFAULT_COOLDOWN_MINUTES),
            detection_interval_ms: env_parse("ROLLCALL_DETECTION_INTERVAL_MS", 1500),
            frame_skip: env_parse::<u64>("ROLLCALL_FRAME_SKIP", 2).max(1),
            min_registration_area: env_parse(
                "ROLLCALL_MIN_REGISTRATION_AREA",
                DEFAULT_MIN_REGISTRATION_AREA,
            ),
            min_attendance_area: env_parse(
                "ROLLCALL_MIN_ATTENDANCE_AREA",
                DEFAULT_MIN_ATTENDANCE_AREA,
            ),
            model_load_retries: env_parse::<u32>("ROLLCALL_MODEL_LOAD_RETRIES", 3).max(1),
            autostart: env_flag("ROLLCALL_AUTOSTART", false),
            bus,
            http_enabled: env_flag("ROLLCALL_HTTP_ENABLED", true),
            http_addr: env_parse("ROLLCALL_HTTP_ADDR", SocketAddr::from(([127, 0, 0, 1], 3000))),
        }
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::from_millis(self.detection_interval_ms)
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cooldown_minutes)
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(default)
}
