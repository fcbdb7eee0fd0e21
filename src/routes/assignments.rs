// src/routes/assignments.rs

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{engine_error, ApiError};
use crate::models::{Assignment, Issue, TimelineEntry};
use crate::AppState;

#[derive(Deserialize)]
pub struct AssignBody {
    pub manager_id: i64,
    pub head_id: i64,
    pub deadline: DateTime<Utc>,
}

pub async fn assign_issue(
    State(state): State<AppState>,
    Path(issue_id): Path<i64>,
    Json(b): Json<AssignBody>,
) -> Result<Json<Assignment>, ApiError> {
    let assignment = state
        .engine
        .assign_to_department(b.manager_id, issue_id, b.head_id, b.deadline)
        .await
        .map_err(engine_error)?;
    Ok(Json(assignment))
}

#[derive(Deserialize)]
pub struct StartWorkBody {
    pub head_id: i64,
}

pub async fn start_work(
    State(state): State<AppState>,
    Path(issue_id): Path<i64>,
    Json(b): Json<StartWorkBody>,
) -> Result<Json<Issue>, ApiError> {
    let issue = state
        .engine
        .start_working(b.head_id, issue_id)
        .await
        .map_err(engine_error)?;
    Ok(Json(issue))
}

#[derive(Deserialize)]
pub struct ResolveBody {
    pub head_id: i64,
    pub remark: Option<String>,
}

pub async fn resolve_issue(
    State(state): State<AppState>,
    Path(issue_id): Path<i64>,
    Json(b): Json<ResolveBody>,
) -> Result<Json<Issue>, ApiError> {
    let issue = state
        .engine
        .mark_resolved(b.head_id, issue_id, b.remark)
        .await
        .map_err(engine_error)?;
    Ok(Json(issue))
}

#[derive(Deserialize)]
pub struct InvalidBody {
    pub manager_id: i64,
    pub reason: Option<String>,
}

pub async fn invalidate_issue(
    State(state): State<AppState>,
    Path(issue_id): Path<i64>,
    Json(b): Json<InvalidBody>,
) -> Result<Json<Issue>, ApiError> {
    let issue = state
        .engine
        .mark_invalid(b.manager_id, issue_id, b.reason)
        .await
        .map_err(engine_error)?;
    Ok(Json(issue))
}

#[derive(Deserialize)]
pub struct CommentBody {
    pub head_id: i64,
    pub text: String,
    #[serde(default)]
    pub visible_to_customer: bool,
}

pub async fn add_comment(
    State(state): State<AppState>,
    Path(issue_id): Path<i64>,
    Json(b): Json<CommentBody>,
) -> Result<Json<TimelineEntry>, ApiError> {
    let entry = state
        .engine
        .add_comment(b.head_id, issue_id, b.text, b.visible_to_customer)
        .await
        .map_err(engine_error)?;
    Ok(Json(entry))
}
