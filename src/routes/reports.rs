// src/routes/reports.rs

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{engine_error, ApiError};
use crate::engine::reports::{HeadReport, ManagerReport};
use crate::AppState;

#[derive(Deserialize)]
pub struct WindowQ {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

pub async fn head_report(
    State(state): State<AppState>,
    Path(head_id): Path<i64>,
    Query(q): Query<WindowQ>,
) -> Result<Json<HeadReport>, ApiError> {
    let report = state
        .engine
        .head_report(head_id, q.from, q.to)
        .await
        .map_err(engine_error)?;
    Ok(Json(report))
}

#[derive(Deserialize)]
pub struct ManagerReportQ {
    pub manager_id: i64,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub department: Option<String>,
}

pub async fn manager_report(
    State(state): State<AppState>,
    Query(q): Query<ManagerReportQ>,
) -> Result<Json<ManagerReport>, ApiError> {
    let report = state
        .engine
        .manager_report(q.manager_id, q.from, q.to, q.department)
        .await
        .map_err(engine_error)?;
    Ok(Json(report))
}
