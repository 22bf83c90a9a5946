//! Arrival device handlers: scans, PIN entry, abandonment

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use clinicq_core::{FlowError, PendingVerification};
use clinicq_types::{
    ActiveQueueEntry, ArrivalIndexEntry, ArrivalMethod, ArrivalRecord, CounterId, PatientId,
};
use serde::Deserialize;

/// Scan request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub uid: PatientId,
    /// Counter the device is installed at
    pub counter_id: CounterId,
    #[serde(default = "default_method")]
    pub method: ArrivalMethod,
}

fn default_method() -> ArrivalMethod {
    ArrivalMethod::Rfid
}

/// A scan or manual uid entry; opens the PIN window
pub async fn scan_arrival(
    State(state): State<AppState>,
    Json(request): Json<ScanRequest>,
) -> ApiResult<(StatusCode, Json<PendingVerification>)> {
    let ticket = state
        .flow
        .verifier()
        .verify_arrival(&request.uid, &request.counter_id, request.method)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(ticket)))
}

/// Open PIN window of a patient
pub async fn get_pending_arrival(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> ApiResult<Json<PendingVerification>> {
    let uid = PatientId::new(uid);
    let ticket = state
        .flow
        .verifier()
        .pending(&uid)
        .ok_or(FlowError::NoAuthorization { uid })?;
    Ok(Json(ticket))
}

/// PIN request body
#[derive(Debug, Deserialize)]
pub struct PinRequest {
    pub pin: String,
}

/// Verify the PIN and admit the patient to the counter queue
pub async fn submit_pin(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(request): Json<PinRequest>,
) -> ApiResult<(StatusCode, Json<ActiveQueueEntry>)> {
    let uid = PatientId::new(uid);
    let queued = state.flow.verifier().submit_pin(&uid, &request.pin).await?;
    Ok((StatusCode::CREATED, Json(queued)))
}

/// Cancel a pending arrival and give the authorization back
pub async fn abandon_arrival(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> ApiResult<Json<ArrivalIndexEntry>> {
    let uid = PatientId::new(uid);
    Ok(Json(state.flow.verifier().abandon(&uid).await?))
}

/// Verified arrivals of a patient, oldest first
pub async fn list_arrivals(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> ApiResult<Json<Vec<ArrivalRecord>>> {
    let uid = PatientId::new(uid);
    Ok(Json(state.flow.verifier().arrivals_for(&uid).await?))
}
