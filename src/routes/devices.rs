// src/routes/devices.rs

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{internal_error, ApiError};
use crate::models::UserRef;
use crate::AppState;

#[derive(Deserialize)]
pub struct UpsertTokenBody {
    #[serde(flatten)]
    pub user: UserRef,
    pub token: String,
}

#[derive(Serialize)]
pub struct Updated {
    pub updated: bool,
}

pub async fn upsert_device_token(
    State(state): State<AppState>,
    Json(b): Json<UpsertTokenBody>,
) -> Result<Json<Updated>, ApiError> {
    state
        .engine
        .store()
        .upsert_device_token(b.user, &b.token)
        .await
        .map_err(internal_error)?;
    Ok(Json(Updated { updated: true }))
}
