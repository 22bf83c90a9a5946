//! ClinicQ Types - records shared by every ClinicQ component.
//!
//! A patient moves through one or more service counters:
//!
//! - **ServiceRequest**: a patient's ask to be served at a counter, resolved by staff
//! - **ArrivalIndexEntry**: the single record saying where a patient may check in next
//! - **ArrivalRecord**: write-once audit entry for every verified physical arrival
//! - **ActiveQueueEntry**: an arrived patient waiting for, or receiving, service
//! - **Notification**: patient-facing message emitted for every transition
//!
//! Field names serialize in camelCase and timestamps as epoch milliseconds so
//! the records can be exchanged with devices and UIs as-is.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod arrival;
pub mod directory;
pub mod ids;
pub mod notification;
pub mod patient;
pub mod queue;
pub mod request;

pub use arrival::{ArrivalIndexEntry, ArrivalMethod, ArrivalRecord, AuthorizationStatus};
pub use directory::{Counter, Establishment};
pub use ids::{
    AwaitingKey, CounterId, EstablishmentId, IdParseError, PatientId, QueueKey, RequestKey,
};
pub use notification::{Notification, NotificationKind, NotificationStatus, TransitionEvent};
pub use patient::Patient;
pub use queue::{ActiveQueueEntry, QueueState};
pub use request::{RequestState, ServiceRequest};
