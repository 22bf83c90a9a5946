//! Active queue handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::{Path, State},
    Json,
};
use clinicq_core::EndServiceOutcome;
use clinicq_types::{ActiveQueueEntry, ArrivalIndexEntry, CounterId, QueueKey};
use serde::Serialize;

/// Admit the longest-waiting patient at a counter
pub async fn admit_next(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ActiveQueueEntry>> {
    let counter_id = CounterId::new(id);
    Ok(Json(state.flow.queue().admit_next(&counter_id).await?))
}

/// Queue of a counter
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterQueueResponse {
    pub counter_id: CounterId,
    pub in_service: Vec<ActiveQueueEntry>,
    pub waiting: Vec<ActiveQueueEntry>,
}

/// Patients in service and waiting at a counter
pub async fn get_counter_queue(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CounterQueueResponse>> {
    let counter_id = CounterId::new(id);
    let in_service = state.flow.queue().in_service(&counter_id).await?;
    let waiting = state.flow.queue().waiting(&counter_id).await?;
    Ok(Json(CounterQueueResponse {
        counter_id,
        in_service,
        waiting,
    }))
}

/// Get a queue entry
pub async fn get_queue_entry(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<ActiveQueueEntry>> {
    let queue_key: QueueKey = key.parse()?;
    Ok(Json(state.flow.queue().get(&queue_key).await?))
}

/// End service response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndServiceResponse {
    /// `chain_completed`, `advanced` or `already_completed`
    pub outcome: &'static str,
    pub entry: ActiveQueueEntry,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<ArrivalIndexEntry>,
}

impl From<EndServiceOutcome> for EndServiceResponse {
    fn from(outcome: EndServiceOutcome) -> Self {
        match outcome {
            EndServiceOutcome::ChainCompleted(entry) => Self {
                outcome: "chain_completed",
                entry,
                next: None,
            },
            EndServiceOutcome::Advanced { completed, next } => Self {
                outcome: "advanced",
                entry: completed,
                next: Some(next),
            },
            EndServiceOutcome::AlreadyCompleted(entry) => Self {
                outcome: "already_completed",
                entry,
                next: None,
            },
        }
    }
}

/// Complete service and advance the patient's chain
pub async fn end_service(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<EndServiceResponse>> {
    let queue_key: QueueKey = key.parse()?;
    let outcome = state.flow.queue().end_service(&queue_key).await?;
    Ok(Json(outcome.into()))
}
