//! Arrival authorizations and the arrival audit log.

use crate::ids::{AwaitingKey, CounterId, EstablishmentId, PatientId, RequestKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of an arrival index entry. Entries only ever exist while awaiting
/// arrival: consuming one deletes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    AwaitingArrival,
}

/// The single authoritative record saying a patient may check in at a counter.
///
/// Stored keyed by `uid`, so there is at most one per patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrivalIndexEntry {
    pub uid: PatientId,
    pub counter_id: CounterId,
    pub est_id: EstablishmentId,
    pub request_key: RequestKey,
    pub awaiting_key: AwaitingKey,
    pub chain_order: u32,
    pub status: AuthorizationStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl ArrivalIndexEntry {
    /// New authorization with a freshly minted awaiting key.
    pub fn new(
        uid: PatientId,
        counter_id: CounterId,
        est_id: EstablishmentId,
        request_key: RequestKey,
        chain_order: u32,
    ) -> Self {
        Self {
            uid,
            counter_id,
            est_id,
            request_key,
            awaiting_key: AwaitingKey::generate(),
            chain_order,
            status: AuthorizationStatus::AwaitingArrival,
            created_at: Utc::now(),
        }
    }
}

/// How a physical arrival was signalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalMethod {
    Rfid,
    ManualPin,
}

impl fmt::Display for ArrivalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArrivalMethod::Rfid => f.write_str("rfid"),
            ArrivalMethod::ManualPin => f.write_str("manual_pin"),
        }
    }
}

/// Write-once audit record of a verified physical arrival.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrivalRecord {
    pub uid: PatientId,
    pub awaiting_key: AwaitingKey,
    pub request_key: RequestKey,
    pub counter_id: CounterId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub method: ArrivalMethod,
}

impl ArrivalRecord {
    pub fn for_entry(entry: &ArrivalIndexEntry, method: ArrivalMethod) -> Self {
        Self {
            uid: entry.uid.clone(),
            awaiting_key: entry.awaiting_key,
            request_key: entry.request_key,
            counter_id: entry.counter_id.clone(),
            timestamp: Utc::now(),
            method,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_index_entry_wire_shape() {
        let mut entry = ArrivalIndexEntry::new(
            PatientId::new("P1"),
            CounterId::new("C1"),
            EstablishmentId::new("E1"),
            RequestKey::generate(),
            0,
        );
        entry.created_at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["uid"], "P1");
        assert_eq!(json["counterId"], "C1");
        assert_eq!(json["estId"], "E1");
        assert_eq!(json["chainOrder"], 0);
        assert_eq!(json["status"], "awaiting_arrival");
        assert_eq!(json["createdAt"], 1_700_000_000_123_i64);
        assert!(json["awaitingKey"].is_string());
        assert!(json["requestKey"].is_string());
    }

    #[test]
    fn test_arrival_record_method_names() {
        assert_eq!(
            serde_json::to_value(ArrivalMethod::ManualPin).unwrap(),
            "manual_pin"
        );
        assert_eq!(serde_json::to_value(ArrivalMethod::Rfid).unwrap(), "rfid");
    }
}
