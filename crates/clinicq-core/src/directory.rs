//! Establishments, counters and patients.

use crate::error::{FlowError, FlowResult};
use crate::table::Table;
use chrono::Utc;
use clinicq_store::{Collection, DocumentStore, Query, SortOrder, StoreError};
use clinicq_types::{Counter, CounterId, Establishment, EstablishmentId, Patient, PatientId};
use std::sync::Arc;
use tracing::{info, instrument};

/// Registry of the facility layout and the patients allowed to check in.
#[derive(Clone)]
pub struct Directory {
    establishments: Table<Establishment>,
    counters: Table<Counter>,
    patients: Table<Patient>,
}

impl Directory {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            establishments: Table::new(Arc::clone(&store), Collection::Establishments),
            counters: Table::new(Arc::clone(&store), Collection::Counters),
            patients: Table::new(store, Collection::Patients),
        }
    }

    /// Register or rename an establishment.
    #[instrument(skip(self, name), fields(est_id = %est_id))]
    pub async fn register_establishment(
        &self,
        est_id: EstablishmentId,
        name: impl Into<String>,
    ) -> FlowResult<Establishment> {
        let establishment = Establishment {
            est_id,
            name: name.into(),
            registered_at: Utc::now(),
        };
        self.establishments
            .put(establishment.est_id.as_str(), &establishment)
            .await?;
        info!(name = %establishment.name, "Registered establishment");
        Ok(establishment)
    }

    /// Register or rename a counter. The establishment must exist.
    #[instrument(skip(self, name), fields(counter_id = %counter_id, est_id = %est_id))]
    pub async fn register_counter(
        &self,
        counter_id: CounterId,
        est_id: EstablishmentId,
        name: impl Into<String>,
    ) -> FlowResult<Counter> {
        self.establishment(&est_id).await?;
        let counter = Counter {
            counter_id,
            est_id,
            name: name.into(),
            registered_at: Utc::now(),
        };
        self.counters.put(counter.counter_id.as_str(), &counter).await?;
        info!(name = %counter.name, "Registered counter");
        Ok(counter)
    }

    /// Register a patient. Registering an existing uid is rejected; PIN
    /// resets are not supported.
    #[instrument(skip(self, display_name, pin), fields(uid = %uid))]
    pub async fn register_patient(
        &self,
        uid: PatientId,
        display_name: impl Into<String>,
        pin: &str,
    ) -> FlowResult<Patient> {
        if pin.is_empty() {
            return Err(FlowError::InvalidState("PIN must not be empty".to_string()));
        }
        let patient = Patient::new(uid, display_name, pin);
        match self.patients.insert(patient.uid.as_str(), &patient).await {
            Ok(_) => {
                info!("Registered patient");
                Ok(patient)
            }
            Err(StoreError::PreconditionFailed(_)) => Err(FlowError::InvalidState(format!(
                "patient {} already registered",
                patient.uid
            ))),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn establishment(&self, est_id: &EstablishmentId) -> FlowResult<Establishment> {
        self.establishments
            .record(est_id.as_str())
            .await?
            .ok_or_else(|| FlowError::NotFound(format!("establishment {}", est_id)))
    }

    pub async fn counter(&self, counter_id: &CounterId) -> FlowResult<Counter> {
        self.counters
            .record(counter_id.as_str())
            .await?
            .ok_or_else(|| FlowError::NotFound(format!("counter {}", counter_id)))
    }

    pub async fn patient(&self, uid: &PatientId) -> FlowResult<Patient> {
        self.patients
            .record(uid.as_str())
            .await?
            .ok_or_else(|| FlowError::NotFound(format!("patient {}", uid)))
    }

    /// Counters of an establishment, by name.
    pub async fn counters_for(&self, est_id: &EstablishmentId) -> FlowResult<Vec<Counter>> {
        Ok(self
            .counters
            .records(
                &Query::new()
                    .filter("estId", est_id.as_str())
                    .order_by("name", SortOrder::Ascending),
            )
            .await?)
    }

    /// Display names for a counter and its establishment, falling back to the
    /// raw ids when either is unknown.
    pub async fn display_names(
        &self,
        est_id: &EstablishmentId,
        counter_id: &CounterId,
    ) -> (String, String) {
        let est_name = match self.establishments.record(est_id.as_str()).await {
            Ok(Some(est)) => est.name,
            _ => est_id.to_string(),
        };
        let counter_name = match self.counters.record(counter_id.as_str()).await {
            Ok(Some(counter)) => counter.name,
            _ => counter_id.to_string(),
        };
        (est_name, counter_name)
    }
}
