//! Patient mailbox handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use clinicq_core::FlowError;
use clinicq_store::QueryWindow;
use clinicq_types::{Notification, PatientId};
use serde::Deserialize;

/// Mailbox query params
#[derive(Debug, Deserialize)]
pub struct MailboxQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// Notifications of a patient, oldest first
pub async fn list_notifications(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Query(query): Query<MailboxQuery>,
) -> ApiResult<Json<Vec<Notification>>> {
    let uid = PatientId::new(uid);
    let window = QueryWindow {
        limit: query.limit,
        offset: query.offset,
    };
    let notes = state
        .flow
        .mailbox()
        .mailbox(&uid, window)
        .await
        .map_err(FlowError::from)?;
    Ok(Json(notes))
}
