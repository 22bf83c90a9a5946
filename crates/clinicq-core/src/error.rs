//! Error taxonomy for patient flow operations.

use clinicq_store::StoreError;
use clinicq_types::{CounterId, PatientId, RequestKey, RequestState};
use thiserror::Error;

/// Errors returned by flow operations to the staff UI or device.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The patient holds no arrival authorization. A normal outcome for an
    /// unscanned or ineligible patient.
    #[error("no authorization: {uid} is not awaiting arrival anywhere")]
    NoAuthorization { uid: PatientId },

    /// The authorization was for another counter. It has been consumed and
    /// must be re-issued by staff.
    #[error("wrong counter, expected {expected}")]
    WrongCounter {
        uid: PatientId,
        expected: CounterId,
        actual: CounterId,
    },

    /// The request was already accepted or rejected.
    #[error("request {request_key} already {state}")]
    AlreadyResolved {
        request_key: RequestKey,
        state: RequestState,
    },

    /// An arrival index entry already exists for the patient. Indicates a
    /// planning bug; never resolved by overwriting.
    #[error("conflicting arrival authorization for {uid}: already awaiting at {existing_counter}")]
    ConflictingEntry {
        uid: PatientId,
        existing_counter: CounterId,
    },

    /// Nobody is waiting at the counter.
    #[error("queue empty at counter {counter_id}")]
    QueueEmpty { counter_id: CounterId },

    /// Wrong PIN. Retryable while the verification window is open.
    #[error("verification failed for {uid}")]
    VerificationFailed { uid: PatientId },

    /// The PIN window lapsed; the patient has to scan again.
    #[error("verification window expired for {uid}")]
    VerificationExpired { uid: PatientId },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl FlowError {
    /// Outcomes that are part of normal operation and are not logged as errors.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            FlowError::NoAuthorization { .. }
                | FlowError::QueueEmpty { .. }
                | FlowError::VerificationFailed { .. }
        )
    }

    /// Whether the same call may succeed if retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, FlowError::Store(err) if err.is_transient())
    }
}

/// Result type for flow operations.
pub type FlowResult<T> = std::result::Result<T, FlowError>;
