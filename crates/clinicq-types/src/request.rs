//! Service requests and their resolution state.

use crate::ids::{CounterId, EstablishmentId, PatientId, RequestKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Resolution state of a service request.
///
/// `Rejected` and `Cancelled` are terminal. An accepted step stays accepted
/// until staff revoke it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Pending => "pending",
            RequestState::Accepted => "accepted",
            RequestState::Rejected => "rejected",
            RequestState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A patient's request to be served at a counter.
///
/// Accepted requests are kept as the audit trail of a patient's chain: the
/// `chain_order` assigned on acceptance is what the chain plan is derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequest {
    pub request_key: RequestKey,
    pub uid: PatientId,
    pub counter_id: CounterId,
    pub est_id: EstablishmentId,
    pub state: RequestState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_order: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ServiceRequest {
    pub fn new(uid: PatientId, counter_id: CounterId, est_id: EstablishmentId) -> Self {
        Self {
            request_key: RequestKey::generate(),
            uid,
            counter_id,
            est_id,
            state: RequestState::Pending,
            chain_order: None,
            reason: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == RequestState::Pending
    }

    pub fn is_accepted(&self) -> bool {
        self.state == RequestState::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_request_is_pending() {
        let request = ServiceRequest::new(
            PatientId::new("P1"),
            CounterId::new("C1"),
            EstablishmentId::new("E1"),
        );
        assert!(request.is_pending());
        assert!(request.chain_order.is_none());
    }

    #[test]
    fn test_state_wire_names() {
        let json = serde_json::to_value(RequestState::Accepted).unwrap();
        assert_eq!(json, "accepted");
        assert_eq!(RequestState::Rejected.to_string(), "rejected");
        let cancelled: RequestState = serde_json::from_str("\"cancelled\"").unwrap();
        assert_eq!(cancelled, RequestState::Cancelled);
    }
}
