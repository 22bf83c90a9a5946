use crate::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// Named document collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Establishments,
    Counters,
    Patients,
    Requests,
    ArrivalIndex,
    ArrivalRecords,
    ActiveQueue,
    Notifications,
}

impl Collection {
    pub const ALL: [Collection; 8] = [
        Collection::Establishments,
        Collection::Counters,
        Collection::Patients,
        Collection::Requests,
        Collection::ArrivalIndex,
        Collection::ArrivalRecords,
        Collection::ActiveQueue,
        Collection::Notifications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Establishments => "establishments",
            Collection::Counters => "counters",
            Collection::Patients => "patients",
            Collection::Requests => "requests",
            Collection::ArrivalIndex => "arrival_index",
            Collection::ArrivalRecords => "arrival_records",
            Collection::ActiveQueue => "active_queue",
            Collection::Notifications => "notifications",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored document. `version` is assigned by the store on every write and
/// is the token conditional writes are checked against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub collection: Collection,
    pub key: String,
    pub version: u64,
    pub body: Value,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Deserialize the body into a typed record.
    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        serde_json::from_value(self.body.clone()).map_err(|e| {
            StoreError::Serialization(format!("{}/{}: {}", self.collection, self.key, e))
        })
    }

    /// Top-level body field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.body.get(name)
    }
}

/// Expected state of a document for a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Write regardless of current state.
    Any,
    /// The document must not exist.
    Absent,
    /// The document must exist at exactly this version.
    Version(u64),
}

impl Precondition {
    pub(crate) fn admits(&self, current: Option<u64>) -> bool {
        match (self, current) {
            (Precondition::Any, _) => true,
            (Precondition::Absent, None) => true,
            (Precondition::Absent, Some(_)) => false,
            (Precondition::Version(expected), Some(actual)) => *expected == actual,
            (Precondition::Version(_), None) => false,
        }
    }
}

/// Kind of change carried by a subscription event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Inserted,
    Updated,
    Deleted,
}

/// A single committed change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub collection: Collection,
    pub key: String,
    pub kind: ChangeKind,
    /// Document after the change; `None` for deletes.
    pub document: Option<Document>,
    /// Document before the change; `None` for inserts.
    pub previous: Option<Document>,
}

/// Equality filter on a top-level body field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

impl FieldFilter {
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, body: &Value) -> bool {
        body.get(&self.field) == Some(&self.value)
    }

    /// Whether a change touches the filtered view: the new or the previous
    /// body matches, so documents leaving the view are observed too.
    pub fn matches_change(&self, event: &ChangeEvent) -> bool {
        event
            .document
            .iter()
            .chain(event.previous.iter())
            .any(|doc| self.matches(&doc.body))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Generic query window for paged reads. `limit == 0` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

/// Filtered, ordered range query over one collection.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filters: Vec<FieldFilter>,
    pub order_by: Option<(String, SortOrder)>,
    pub window: QueryWindow,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(FieldFilter::new(field, value));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.order_by = Some((field.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.window.limit = limit;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.window.offset = offset;
        self
    }

    pub fn matches(&self, body: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(body))
    }

    /// Sort and window a candidate set in place. Ties are broken by key so
    /// results are deterministic.
    pub fn arrange(&self, mut docs: Vec<Document>) -> Vec<Document> {
        match &self.order_by {
            Some((field, order)) => docs.sort_by(|a, b| {
                let ordering =
                    compare_values(a.field(field), b.field(field)).then_with(|| a.key.cmp(&b.key));
                match order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                }
            }),
            None => docs.sort_by(|a, b| a.key.cmp(&b.key)),
        }

        let iter = docs.into_iter().skip(self.window.offset);
        if self.window.limit == 0 {
            iter.collect()
        } else {
            iter.take(self.window.limit).collect()
        }
    }
}

/// Total order over JSON values used for range ordering: missing < null <
/// bool < number < string < other.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(_) => 5,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .unwrap_or(f64::NAN)
                .partial_cmp(&y.as_f64().unwrap_or(f64::NAN))
                .unwrap_or(Ordering::Equal),
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
