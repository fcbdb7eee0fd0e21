// src/routes/attachments.rs

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{engine_error, internal_error, ApiError, ErrorBody};
use crate::engine::EngineError;
use crate::models::Issue;
use crate::storage::{PresignedUpload, UploadSpec, MAX_UPLOAD_BATCH};
use crate::AppState;

#[derive(Deserialize)]
pub struct PresignBody {
    pub files: Vec<UploadSpec>,
}

#[derive(Serialize)]
pub struct PresignResp {
    pub batch_id: Uuid,
    pub uploads: Vec<PresignedUpload>,
}

/// Issues presigned upload URLs under a fresh temporary batch.
pub async fn presign_uploads(
    State(state): State<AppState>,
    Json(b): Json<PresignBody>,
) -> Result<Json<PresignResp>, ApiError> {
    if b.files.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: "bad_request",
                message: "no files provided".to_string(),
            }),
        ));
    }
    if b.files.len() > MAX_UPLOAD_BATCH {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: "bad_request",
                message: format!("at most {MAX_UPLOAD_BATCH} files per batch"),
            }),
        ));
    }

    let batch_id = Uuid::new_v4();
    let uploads = state
        .engine
        .files()
        .presign_uploads(&b.files, batch_id)
        .await
        .map_err(internal_error)?;
    Ok(Json(PresignResp { batch_id, uploads }))
}

#[derive(Deserialize)]
pub struct RequestAttachmentsBody {
    pub head_id: i64,
    pub remark: String,
}

pub async fn request_attachments(
    State(state): State<AppState>,
    Path(issue_id): Path<i64>,
    Json(b): Json<RequestAttachmentsBody>,
) -> Result<Json<Issue>, ApiError> {
    let issue = state
        .engine
        .request_attachment(b.head_id, issue_id, b.remark)
        .await
        .map_err(engine_error)?;
    Ok(Json(issue))
}

#[derive(Deserialize)]
pub struct ConfirmBody {
    pub customer_id: i64,
    pub batch_id: Uuid,
}

#[derive(Serialize)]
pub struct ConfirmResp {
    pub moved: Vec<String>,
}

pub async fn confirm_attachments(
    State(state): State<AppState>,
    Path(issue_id): Path<i64>,
    Json(b): Json<ConfirmBody>,
) -> Result<Json<ConfirmResp>, ApiError> {
    let moved = state
        .engine
        .confirm_attachments_uploaded(b.customer_id, issue_id, b.batch_id)
        .await
        .map_err(engine_error)?;
    Ok(Json(ConfirmResp { moved }))
}

#[derive(Deserialize)]
pub struct DownloadQ {
    pub key: String,
    /// Customers may only fetch keys under their own tickets.
    pub customer_id: Option<i64>,
}

#[derive(Serialize)]
pub struct DownloadResp {
    pub url: String,
}

pub async fn download_url(
    State(state): State<AppState>,
    Query(q): Query<DownloadQ>,
) -> Result<Json<DownloadResp>, ApiError> {
    let mut parts = q.key.splitn(3, '/');
    let (prefix, ticket_no, file) = (parts.next(), parts.next(), parts.next());
    let ticket_no = match (prefix, ticket_no, file) {
        (Some("issues"), Some(ticket), Some(f)) if !f.is_empty() => ticket,
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    error: "bad_request",
                    message: "invalid attachment key".to_string(),
                }),
            ))
        }
    };

    if let Some(customer_id) = q.customer_id {
        let issue = state
            .engine
            .store()
            .issue_by_ticket(ticket_no)
            .await
            .map_err(internal_error)?;
        match issue {
            Some(i) if i.customer_id == customer_id => {}
            _ => {
                return Err(engine_error(EngineError::permission(format!(
                    "key does not belong to customer {customer_id}"
                ))))
            }
        }
    }

    let url = state
        .engine
        .files()
        .presign_download(&q.key)
        .await
        .map_err(internal_error)?;
    Ok(Json(DownloadResp { url }))
}
