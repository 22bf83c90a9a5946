//! Active queue entries.

use crate::arrival::ArrivalIndexEntry;
use crate::ids::{CounterId, EstablishmentId, PatientId, QueueKey, RequestKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of an admitted patient at a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Waiting,
    InService,
    Completed,
}

impl QueueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueState::Waiting => "waiting",
            QueueState::InService => "in_service",
            QueueState::Completed => "completed",
        }
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A patient who physically arrived at a counter.
///
/// Entries are kept after completion as the patient's service history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveQueueEntry {
    pub queue_key: QueueKey,
    pub uid: PatientId,
    pub counter_id: CounterId,
    pub est_id: EstablishmentId,
    pub request_key: RequestKey,
    pub chain_order: u32,
    pub state: QueueState,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub arrived_at: DateTime<Utc>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub admitted_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ActiveQueueEntry {
    /// Waiting entry for a consumed authorization.
    pub fn waiting(entry: &ArrivalIndexEntry, arrived_at: DateTime<Utc>) -> Self {
        Self {
            queue_key: QueueKey::for_arrival(&entry.awaiting_key),
            uid: entry.uid.clone(),
            counter_id: entry.counter_id.clone(),
            est_id: entry.est_id.clone(),
            request_key: entry.request_key,
            chain_order: entry.chain_order,
            state: QueueState::Waiting,
            arrived_at,
            admitted_at: None,
            completed_at: None,
        }
    }

    /// Whether this entry still belongs to an open chain.
    pub fn is_open(&self) -> bool {
        !matches!(self.state, QueueState::Completed)
    }
}
