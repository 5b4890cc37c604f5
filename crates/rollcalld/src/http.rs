//! Roster HTTP API.
//!
//! `POST /api/register {name, studentId}` adds a student (201, 400, 409, 500).
//! `GET /api/student` lists every student, newest first (200, 404 when empty).

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rollcall_core::validate::{validate_id, validate_name};
use rollcall_store::{Roster, RosterError, Student};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterStudent {
    name: String,
    student_id: String,
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<RosterError> for ApiError {
    fn from(err: RosterError) -> Self {
        match &err {
            RosterError::Duplicate(_) => Self::new(StatusCode::CONFLICT, err.to_string()),
            _ => {
                tracing::error!(error = %err, "roster request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "error accessing student roster")
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "message": self.message })),
        )
            .into_response()
    }
}

pub fn build_router(roster: Arc<Roster>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/register", post(register_student))
        .route("/api/student", get(list_students))
        .with_state(roster)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn register_student(
    State(roster): State<Arc<Roster>>,
    payload: Result<Json<RegisterStudent>, JsonRejection>,
) -> Result<(StatusCode, Json<Student>), ApiError> {
    let Json(req) = payload?;
    let name = validate_name(&req.name)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;
    let student_id = validate_id(&req.student_id)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "studentId is required"))?;

    let student = roster
        .register(name, student_id, chrono::Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(student)))
}

async fn list_students(State(roster): State<Arc<Roster>>) -> Result<Json<Vec<Student>>, ApiError> {
    let students = roster.list().await?;
    if students.is_empty() {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "no students are currently registered",
        ));
    }
    Ok(Json(students))
}
