//! Arrival authorization handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use clinicq_core::{FlowError, Revocation};
use clinicq_types::{ArrivalIndexEntry, AwaitingKey, CounterId, PatientId, RequestKey};
use serde::{Deserialize, Serialize};

/// Current authorization of a patient, as seen by an arrival device
pub async fn get_authorization(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> ApiResult<Json<ArrivalIndexEntry>> {
    let uid = PatientId::new(uid);
    let entry = state
        .flow
        .planner()
        .lookup_authorization(&uid)
        .await?
        .ok_or(FlowError::NoAuthorization { uid })?;
    Ok(Json(entry))
}

/// Revoke query params
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeQuery {
    pub request_key: String,
}

/// Cancel a chain step that has not been admitted yet
pub async fn revoke_authorization(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Query(query): Query<RevokeQuery>,
) -> ApiResult<Json<Revocation>> {
    let uid = PatientId::new(uid);
    let request_key: RequestKey = query.request_key.parse()?;
    let revoked = state.flow.planner().revoke(&uid, &request_key).await?;
    tracing::info!(uid = %uid, promoted = revoked.promoted.is_some(), "Revoked chain step via API");
    Ok(Json(revoked))
}

/// Reassign request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReassignRequest {
    pub awaiting_key: String,
    pub counter_id: CounterId,
}

/// Move an unconsumed authorization to another counter
pub async fn reassign_authorization(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(request): Json<ReassignRequest>,
) -> ApiResult<Json<ArrivalIndexEntry>> {
    let uid = PatientId::new(uid);
    let awaiting_key: AwaitingKey = request.awaiting_key.parse()?;
    let entry = state
        .flow
        .planner()
        .reassign(&uid, &awaiting_key, &request.counter_id)
        .await?;
    Ok(Json(entry))
}

/// Chain overview of a patient
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainResponse {
    pub uid: PatientId,
    pub authorization: Option<ArrivalIndexEntry>,
    /// Chain orders the patient was admitted with, in arrival order
    pub admitted_orders: Vec<u32>,
    /// Orders of the open chain: live authorization, open queue entries, planned steps
    pub open_orders: Vec<u32>,
    pub next_chain_order: u32,
}

/// Chain overview of a patient
pub async fn get_chain(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> ApiResult<Json<ChainResponse>> {
    let uid = PatientId::new(uid);
    let snapshot = state.flow.planner().snapshot(&uid).await?;
    Ok(Json(ChainResponse {
        admitted_orders: snapshot.queue.iter().map(|q| q.chain_order).collect(),
        open_orders: snapshot.open_orders(),
        next_chain_order: snapshot.next_chain_order(),
        authorization: snapshot.authorization,
        uid,
    }))
}

/// Authorizations awaiting arrival at a counter, oldest first
pub async fn list_awaiting(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ArrivalIndexEntry>>> {
    let counter_id = CounterId::new(id);
    Ok(Json(state.flow.planner().awaiting_at(&counter_id).await?))
}
