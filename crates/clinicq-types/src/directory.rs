//! Establishments and their service counters.

use crate::ids::{CounterId, EstablishmentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A facility hosting one or more counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Establishment {
    pub est_id: EstablishmentId,
    pub name: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub registered_at: DateTime<Utc>,
}

/// A physical service station inside an establishment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counter {
    pub counter_id: CounterId,
    pub est_id: EstablishmentId,
    pub name: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub registered_at: DateTime<Utc>,
}
