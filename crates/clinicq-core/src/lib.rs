//! # ClinicQ Core - Arrival Authorization and Patient Flow
//!
//! Coordinates patients through the service counters of a facility. A patient
//! requests service, staff accept or reject, the patient physically arrives
//! and proves who they are, is served, and may be chained on to another
//! counter.
//!
//! ## Components
//!
//! - [`RequestLedger`]: service request lifecycle (pending, accepted, rejected)
//! - [`ChainPlanner`]: sole owner of the arrival index, at most one entry per patient
//! - [`ArrivalVerifier`]: scan + PIN verification, admission into the queue
//! - [`ActiveQueueManager`]: per-counter FIFO admission and service completion
//! - [`NotificationFanout`]: patient mailbox and in-process broadcast
//! - [`Directory`]: establishments, counters, patients
//!
//! [`ClinicFlow`] wires them together over one [`clinicq_store::DocumentStore`].
//!
//! ## Concurrency
//!
//! There is no global lock. Every transition is a per-key conditional write
//! against the store:
//!
//! - arrival index entries are created insert-if-absent and consumed with an
//!   atomic read-and-delete, keyed by patient
//! - admission claims a waiting entry with a compare-and-set on its version
//! - request resolution is a compare-and-set out of `pending`
//!
//! ## Example
//!
//! ```rust,no_run
//! use clinicq_core::{ClinicFlow, FlowConfig};
//! use clinicq_types::{ArrivalMethod, CounterId, EstablishmentId, PatientId};
//!
//! # async fn example() -> clinicq_core::FlowResult<()> {
//! let flow = ClinicFlow::in_memory(FlowConfig::default());
//! let dir = flow.directory();
//! dir.register_establishment(EstablishmentId::new("E1"), "North Clinic").await?;
//! dir.register_counter(CounterId::new("C1"), EstablishmentId::new("E1"), "Triage").await?;
//! dir.register_patient(PatientId::new("P1"), "Ada", "1234").await?;
//!
//! let uid = PatientId::new("P1");
//! let request = flow.ledger().submit(&uid, &CounterId::new("C1")).await?;
//! flow.ledger().accept(&request.request_key).await?;
//!
//! flow.verifier().verify_arrival(&uid, &CounterId::new("C1"), ArrivalMethod::Rfid).await?;
//! let queued = flow.verifier().submit_pin(&uid, "1234").await?;
//!
//! flow.queue().admit_next(&CounterId::new("C1")).await?;
//! flow.queue().end_service(&queued.queue_key).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod directory;
pub mod error;
pub mod flow;
pub mod ledger;
pub mod notify;
pub mod planner;
pub mod queue;
pub mod retry;
mod table;
pub mod verifier;

pub use config::FlowConfig;
pub use directory::Directory;
pub use error::{FlowError, FlowResult};
pub use flow::ClinicFlow;
pub use ledger::{Acceptance, RequestLedger};
pub use notify::{
    MailboxSink, NotificationEnvelope, NotificationFanout, NotificationSink, NotifyError,
};
pub use planner::{ChainPlanner, ChainSnapshot, ChainStep, Revocation};
pub use queue::{ActiveQueueManager, EndServiceOutcome};
pub use retry::RetryPolicy;
pub use table::Versioned;
pub use verifier::{ArrivalVerifier, PendingVerification};
