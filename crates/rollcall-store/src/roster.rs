//! Student roster served by the HTTP API.
//!
//! Registrations accumulate; a student ID can be registered once.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("student ID {0:?} is already registered")]
    Duplicate(String),
    #[error("roster database: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("creating roster directory: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: Uuid,
    pub name: String,
    pub student_id: String,
    pub registered_at: DateTime<Utc>,
}

pub struct Roster {
    conn: tokio_rusqlite::Connection,
}

impl Roster {
    pub async fn open(path: &Path) -> Result<Self, RosterError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = tokio_rusqlite::Connection::open(path).await?;
        Self::init(&conn).await?;
        tracing::info!(path = %path.display(), "opened roster database");
        Ok(Self { conn })
    }

    pub async fn open_in_memory() -> Result<Self, RosterError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init(&conn).await?;
        Ok(Self { conn })
    }

    async fn init(conn: &tokio_rusqlite::Connection) -> Result<(), RosterError> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS students (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    student_id TEXT NOT NULL UNIQUE,
                    registered_at INTEGER NOT NULL
                )",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Add a student. Existing registrations are left untouched.
    pub async fn register(
        &self,
        name: &str,
        student_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Student, RosterError> {
        let student = Student {
            id: Uuid::new_v4(),
            name: name.to_string(),
            student_id: student_id.to_string(),
            registered_at: at,
        };

        let row = student.clone();
        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM students WHERE student_id = ?1)",
                    [&row.student_id],
                    |r| r.get(0),
                )?;
                if exists {
                    return Ok(false);
                }
                tx.execute(
                    "INSERT INTO students (id, name, student_id, registered_at) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![
                        row.id.to_string(),
                        row.name,
                        row.student_id,
                        row.registered_at.timestamp_millis()
                    ],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if !inserted {
            return Err(RosterError::Duplicate(student.student_id));
        }
        tracing::info!(name = %student.name, student_id = %student.student_id, "student registered");
        Ok(student)
    }

    /// All students, most recently registered first.
    pub async fn list(&self) -> Result<Vec<Student>, RosterError> {
        let students = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, student_id, registered_at FROM students
                     ORDER BY registered_at DESC, rowid DESC",
                )?;
                let rows = stmt.query_map([], |row| {
                    let id: String = row.get(0)?;
                    let millis: i64 = row.get(3)?;
                    Ok(Student {
                        id: Uuid::parse_str(&id).map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
                        })?,
                        name: row.get(1)?,
                        student_id: row.get(2)?,
                        registered_at: DateTime::from_timestamp_millis(millis).ok_or(
                            rusqlite::Error::IntegralValueOutOfRange(3, millis),
                        )?,
                    })
                })?;
                let students = rows.collect::<Result<Vec<_>, _>>()?;
                Ok(students)
            })
            .await?;
        Ok(students)
    }
}
