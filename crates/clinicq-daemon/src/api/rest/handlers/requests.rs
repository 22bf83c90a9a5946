//! Service request handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use clinicq_core::Acceptance;
use clinicq_types::{ArrivalIndexEntry, CounterId, PatientId, RequestKey, ServiceRequest};
use serde::{Deserialize, Serialize};

/// Submit request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub uid: PatientId,
    pub counter_id: CounterId,
}

/// Submit a service request on behalf of a patient
pub async fn submit_request(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> ApiResult<(StatusCode, Json<ServiceRequest>)> {
    let created = state
        .flow
        .ledger()
        .submit(&request.uid, &request.counter_id)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Get a service request
pub async fn get_request(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<ServiceRequest>> {
    let request_key: RequestKey = key.parse()?;
    Ok(Json(state.flow.ledger().get(&request_key).await?))
}

/// Acceptance response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptResponse {
    pub request: ServiceRequest,
    /// `None` when the request was planned behind the patient's open chain
    pub authorization: Option<ArrivalIndexEntry>,
    pub chain_order: u32,
}

impl From<Acceptance> for AcceptResponse {
    fn from(acceptance: Acceptance) -> Self {
        let chain_order = acceptance.chain_order();
        Self {
            request: acceptance.request,
            authorization: acceptance.authorization,
            chain_order,
        }
    }
}

/// Accept a pending request
pub async fn accept_request(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<AcceptResponse>> {
    let request_key: RequestKey = key.parse()?;
    let acceptance = state.flow.ledger().accept(&request_key).await?;
    Ok(Json(acceptance.into()))
}

/// Reject request body
#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: String,
}

/// Reject a pending request
pub async fn reject_request(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<RejectRequest>,
) -> ApiResult<Json<ServiceRequest>> {
    let request_key: RequestKey = key.parse()?;
    let rejected = state
        .flow
        .ledger()
        .reject(&request_key, &request.reason)
        .await?;
    Ok(Json(rejected))
}

/// Re-issue the authorization of an accepted request
pub async fn reissue_request(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<ArrivalIndexEntry>> {
    let request_key: RequestKey = key.parse()?;
    Ok(Json(state.flow.ledger().reissue(&request_key).await?))
}

/// Requests of a patient
pub async fn list_patient_requests(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> ApiResult<Json<Vec<ServiceRequest>>> {
    let uid = PatientId::new(uid);
    Ok(Json(state.flow.ledger().list_for_patient(&uid).await?))
}

/// Pending requests of a counter, oldest first
pub async fn list_pending_requests(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ServiceRequest>>> {
    let counter_id = CounterId::new(id);
    Ok(Json(
        state.flow.ledger().pending_for_counter(&counter_id).await?,
    ))
}
