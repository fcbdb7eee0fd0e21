// src/routes/visits.rs

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{engine_error, ApiError};
use crate::models::{SiteVisit, SiteVisitRequest};
use crate::AppState;

#[derive(Deserialize)]
pub struct RequestVisitBody {
    pub head_id: i64,
}

pub async fn request_visit(
    State(state): State<AppState>,
    Path(issue_id): Path<i64>,
    Json(b): Json<RequestVisitBody>,
) -> Result<Json<SiteVisitRequest>, ApiError> {
    let request = state
        .engine
        .request_site_visit(b.head_id, issue_id)
        .await
        .map_err(engine_error)?;
    Ok(Json(request))
}

#[derive(Deserialize)]
pub struct RejectBody {
    pub service_head_id: i64,
}

pub async fn reject_request(
    State(state): State<AppState>,
    Path(request_id): Path<i64>,
    Json(b): Json<RejectBody>,
) -> Result<Json<SiteVisitRequest>, ApiError> {
    let request = state
        .engine
        .reject_site_visit_request(b.service_head_id, request_id)
        .await
        .map_err(engine_error)?;
    Ok(Json(request))
}

#[derive(Deserialize)]
pub struct ScheduleBody {
    pub service_head_id: i64,
    pub engineer_id: i64,
    /// Present when scheduling against another department's request;
    /// absent for SERVICE-owned issues.
    pub request_id: Option<i64>,
    pub scheduled_date: DateTime<Utc>,
}

pub async fn schedule_visit(
    State(state): State<AppState>,
    Path(issue_id): Path<i64>,
    Json(b): Json<ScheduleBody>,
) -> Result<Json<SiteVisit>, ApiError> {
    let visit = match b.request_id {
        Some(request_id) => {
            state
                .engine
                .schedule_site_visit_for_request(
                    b.service_head_id,
                    issue_id,
                    b.engineer_id,
                    request_id,
                    b.scheduled_date,
                )
                .await
        }
        None => {
            state
                .engine
                .schedule_site_visit_direct(
                    b.service_head_id,
                    issue_id,
                    b.engineer_id,
                    b.scheduled_date,
                )
                .await
        }
    }
    .map_err(engine_error)?;
    Ok(Json(visit))
}

#[derive(Deserialize)]
pub struct CompleteBody {
    pub head_id: i64,
}

pub async fn complete_visit(
    State(state): State<AppState>,
    Path(visit_id): Path<i64>,
    Json(b): Json<CompleteBody>,
) -> Result<Json<SiteVisit>, ApiError> {
    let visit = state
        .engine
        .complete_site_visit(b.head_id, visit_id)
        .await
        .map_err(engine_error)?;
    Ok(Json(visit))
}

#[derive(Deserialize)]
pub struct CancelBody {
    pub head_id: i64,
    pub remark: Option<String>,
}

pub async fn cancel_visit(
    State(state): State<AppState>,
    Path(visit_id): Path<i64>,
    Json(b): Json<CancelBody>,
) -> Result<Json<SiteVisit>, ApiError> {
    let visit = state
        .engine
        .cancel_site_visit(b.head_id, visit_id, b.remark)
        .await
        .map_err(engine_error)?;
    Ok(Json(visit))
}
