//! Patient-facing notifications.

use crate::ids::{CounterId, EstablishmentId, PatientId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status a notification reports to the patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    AwaitingArrival,
    Waiting,
    InService,
    Completed,
    Rejected,
    Cancelled,
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NotificationStatus::AwaitingArrival => "awaiting_arrival",
            NotificationStatus::Waiting => "waiting",
            NotificationStatus::InService => "in_service",
            NotificationStatus::Completed => "completed",
            NotificationStatus::Rejected => "rejected",
            NotificationStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Notification category. Only arrival updates exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ArrivalUpdate,
}

/// A state transition as observed by the fan-out, before names are resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionEvent {
    pub uid: PatientId,
    pub est_id: EstablishmentId,
    pub counter_id: CounterId,
    pub status: NotificationStatus,
    pub chain_order: u32,
    pub message: String,
}

/// Message written to a patient's mailbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub est_id: EstablishmentId,
    pub est_name: String,
    pub counter_id: CounterId,
    pub counter_name: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub status: NotificationStatus,
    pub message: String,
    pub chain_order: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}
