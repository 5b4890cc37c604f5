use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rollcall_core::validate::validate_photo;
use rollcall_core::{Detection, Embedding};

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1",
    gen_blocking = false
)]
trait Attendance {
    fn register(&self, name: &str, id: &str, detections_json: &str) -> zbus::Result<String>;
    fn list_profiles(&self) -> zbus::Result<String>;
    fn remove_profile(&self, selector: &str) -> zbus::Result<String>;
    fn mark(&self, embedding_json: &str) -> zbus::Result<String>;
    fn records(&self, date: &str) -> zbus::Result<String>;
    fn export_csv(&self, date: &str) -> zbus::Result<String>;
    fn start(&self) -> zbus::Result<bool>;
    fn stop(&self) -> zbus::Result<bool>;
    fn reload(&self) -> zbus::Result<()>;
    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face attendance CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new face
    Register {
        /// Full name (letters, spaces, apostrophes and hyphens)
        #[arg(short, long)]
        name: String,
        /// Optional external ID, e.g. a student number
        #[arg(short, long, default_value = "")]
        id: String,
        /// Registration photo (JPEG, PNG or WebP, at most 5 MB)
        #[arg(short, long)]
        photo: PathBuf,
        /// JSON file with the faces detected in the photo
        #[arg(short, long)]
        detections: PathBuf,
    },
    /// List registered faces
    List,
    /// Remove a registered face by ID or #<position>
    Remove {
        selector: String,
    },
    /// Match one embedding and mark attendance
    Mark {
        /// JSON file holding the probe embedding as an array of numbers
        #[arg(short, long)]
        embedding: PathBuf,
    },
    /// Show attendance records for a day
    Records {
        /// Day as YYYY-MM-DD (default: today)
        #[arg(short, long, value_parser = parse_date)]
        date: Option<String>,
    },
    /// Export a day's attendance as CSV
    Export {
        /// Day as YYYY-MM-DD (default: today)
        #[arg(short, long, value_parser = parse_date)]
        date: Option<String>,
        /// Output file (default: attendance_<date>.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Start the detection loop
    Start,
    /// Stop the detection loop
    Stop,
    /// Re-read faces and attendance from storage
    Reload,
    /// Show daemon status
    Status,
}

fn parse_date(s: &str) -> Result<String, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| format!("invalid date {s:?}, expected YYYY-MM-DD"))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn print_pretty(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw).context("daemon sent invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("connecting to D-Bus")?;
    let proxy = AttendanceProxy::new(&connection)
        .await
        .context("rollcalld is not reachable")?;

    match cli.command {
        Commands::Register {
            name,
            id,
            photo,
            detections,
        } => {
            let format = validate_photo(&photo)
                .with_context(|| format!("checking {}", photo.display()))?;
            tracing::debug!(?format, photo = %photo.display(), "photo accepted");
            let faces: Vec<Detection> = read_json(&detections)?;
            let reply = proxy
                .register(&name, &id, &serde_json::to_string(&faces)?)
                .await?;
            let profile: serde_json::Value = serde_json::from_str(&reply)?;
            println!("Registered {}", profile["name"].as_str().unwrap_or(name.as_str()));
        }
        Commands::List => {
            let reply = proxy.list_profiles().await?;
            let profiles: Vec<serde_json::Value> = serde_json::from_str(&reply)?;
            if profiles.is_empty() {
                println!("No faces registered");
            }
            for p in &profiles {
                println!(
                    "#{:<4} {:<30} {:<20} {}",
                    p["position"],
                    p["name"].as_str().unwrap_or_default(),
                    p["id"].as_str().unwrap_or("-"),
                    p["registered_at"].as_str().unwrap_or_default(),
                );
            }
        }
        Commands::Remove { selector } => {
            let name = proxy.remove_profile(&selector).await?;
            println!("Removed {name}");
        }
        Commands::Mark { embedding } => {
            let probe: Embedding = read_json(&embedding)?;
            let reply = proxy.mark(&serde_json::to_string(&probe)?).await?;
            print_pretty(&reply)?;
        }
        Commands::Records { date } => {
            let reply = proxy.records(date.as_deref().unwrap_or("")).await?;
            let value: serde_json::Value = serde_json::from_str(&reply)?;
            let records = value["records"].as_array().cloned().unwrap_or_default();
            println!("{}: {} record(s)", value["date"].as_str().unwrap_or_default(), records.len());
            for r in &records {
                println!(
                    "  {:<12} {:<30} {:<20} {:.2}",
                    r["time"].as_str().unwrap_or_default(),
                    r["name"].as_str().unwrap_or_default(),
                    r["id"].as_str().unwrap_or_default(),
                    r["confidence"].as_f64().unwrap_or_default(),
                );
            }
        }
        Commands::Export { date, output } => {
            let reply = proxy.export_csv(date.as_deref().unwrap_or("")).await?;
            let value: serde_json::Value = serde_json::from_str(&reply)?;
            let day = value["date"].as_str().unwrap_or_default();
            let Some(csv) = value["csv"].as_str() else {
                tracing::warn!(date = day, "no attendance records to export");
                bail!("no attendance records for {day}");
            };
            let path = match output {
                Some(p) => p,
                None => PathBuf::from(value["file_name"].as_str().unwrap_or("attendance.csv")),
            };
            std::fs::write(&path, csv).with_context(|| format!("writing {}", path.display()))?;
            println!("Exported {day} to {}", path.display());
        }
        Commands::Start => {
            proxy.start().await?;
            println!("Detection started");
        }
        Commands::Stop => {
            if proxy.stop().await? {
                println!("Detection stopped");
            } else {
                println!("Detection was not running");
            }
        }
        Commands::Reload => {
            proxy.reload().await?;
            println!("Reloaded");
        }
        Commands::Status => {
            let reply = proxy.status().await?;
            print_pretty(&reply)?;
        }
    }

    Ok(())
}
