// src/routes/issues.rs

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{engine_error, internal_error, ApiError};
use crate::engine::lifecycle::CreateIssue;
use crate::models::{Category, HeadQueue, Issue, Priority, TimelineEntry};
use crate::AppState;

#[derive(Deserialize)]
pub struct CreateIssueBody {
    pub customer_id: i64,
    pub project_id: i64,
    pub description: String,
    pub priority: Option<Priority>,
    pub category: Option<Category>,
    #[serde(default)]
    pub attachment_urls: Vec<String>,
}

pub async fn create_issue(
    State(state): State<AppState>,
    Json(b): Json<CreateIssueBody>,
) -> Result<Json<Issue>, ApiError> {
    let issue = state
        .engine
        .create_issue(CreateIssue {
            customer_id: b.customer_id,
            project_id: b.project_id,
            description: b.description,
            priority: b.priority,
            category: b.category,
            attachment_urls: b.attachment_urls,
        })
        .await
        .map_err(engine_error)?;
    Ok(Json(issue))
}

#[derive(Deserialize)]
pub struct ListQ {
    pub customer_id: i64,
    #[serde(default)]
    pub closed: bool,
}

pub async fn list_customer_issues(
    State(state): State<AppState>,
    Query(q): Query<ListQ>,
) -> Result<Json<Vec<Issue>>, ApiError> {
    let rows = state
        .engine
        .store()
        .issues_for_customer(q.customer_id, !q.closed)
        .await
        .map_err(internal_error)?;
    Ok(Json(rows))
}

#[derive(Deserialize)]
pub struct DetailQ {
    /// When set, the caller is a customer: ownership is enforced and
    /// only customer-visible timeline entries are returned.
    pub customer_id: Option<i64>,
}

#[derive(Serialize)]
pub struct IssueDetail {
    pub issue: Issue,
    pub timeline: Vec<TimelineEntry>,
}

pub async fn get_issue(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(q): Query<DetailQ>,
) -> Result<Json<IssueDetail>, ApiError> {
    let store = state.engine.store();
    let issue = store
        .issue(id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| {
            engine_error(crate::engine::EngineError::not_found("issue", id))
        })?;

    if let Some(customer_id) = q.customer_id {
        if issue.customer_id != customer_id {
            return Err(engine_error(crate::engine::EngineError::permission(
                format!("issue {} does not belong to customer {}", issue.ticket_no, customer_id),
            )));
        }
    }

    let timeline = store
        .timeline(id, q.customer_id.is_some())
        .await
        .map_err(internal_error)?;
    Ok(Json(IssueDetail { issue, timeline }))
}

#[derive(Deserialize)]
pub struct QueueQ {
    pub queue: HeadQueue,
}

pub async fn list_head_issues(
    State(state): State<AppState>,
    Path(head_id): Path<i64>,
    Query(q): Query<QueueQ>,
) -> Result<Json<Vec<Issue>>, ApiError> {
    let rows = state
        .engine
        .store()
        .issues_for_head(head_id, q.queue)
        .await
        .map_err(internal_error)?;
    Ok(Json(rows))
}
