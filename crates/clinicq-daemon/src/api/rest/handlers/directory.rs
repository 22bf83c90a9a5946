//! Facility layout and patient registration handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use clinicq_types::{Counter, CounterId, Establishment, EstablishmentId, Patient, PatientId};
use serde::{Deserialize, Serialize};

/// Register establishment request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterEstablishmentRequest {
    pub est_id: EstablishmentId,
    pub name: String,
}

/// Register or rename an establishment
pub async fn register_establishment(
    State(state): State<AppState>,
    Json(request): Json<RegisterEstablishmentRequest>,
) -> ApiResult<(StatusCode, Json<Establishment>)> {
    let establishment = state
        .flow
        .directory()
        .register_establishment(request.est_id, request.name)
        .await?;
    Ok((StatusCode::CREATED, Json(establishment)))
}

/// Register counter request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCounterRequest {
    pub counter_id: CounterId,
    pub est_id: EstablishmentId,
    pub name: String,
}

/// Register or rename a counter
pub async fn register_counter(
    State(state): State<AppState>,
    Json(request): Json<RegisterCounterRequest>,
) -> ApiResult<(StatusCode, Json<Counter>)> {
    let counter = state
        .flow
        .directory()
        .register_counter(request.counter_id, request.est_id, request.name)
        .await?;
    Ok((StatusCode::CREATED, Json(counter)))
}

/// Counters of an establishment
pub async fn list_counters(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Counter>>> {
    let est_id = EstablishmentId::new(id);
    state.flow.directory().establishment(&est_id).await?;
    Ok(Json(state.flow.directory().counters_for(&est_id).await?))
}

/// Register patient request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPatientRequest {
    pub uid: PatientId,
    pub display_name: String,
    pub pin: String,
}

/// Registered patient, without the PIN digest
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientResponse {
    pub uid: PatientId,
    pub display_name: String,
    pub registered_at: chrono::DateTime<chrono::Utc>,
}

impl From<Patient> for PatientResponse {
    fn from(patient: Patient) -> Self {
        Self {
            uid: patient.uid,
            display_name: patient.display_name,
            registered_at: patient.registered_at,
        }
    }
}

/// Register a patient
pub async fn register_patient(
    State(state): State<AppState>,
    Json(request): Json<RegisterPatientRequest>,
) -> ApiResult<(StatusCode, Json<PatientResponse>)> {
    let patient = state
        .flow
        .directory()
        .register_patient(request.uid, request.display_name, &request.pin)
        .await?;
    Ok((StatusCode::CREATED, Json(patient.into())))
}
