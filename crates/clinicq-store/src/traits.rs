use crate::model::{ChangeEvent, Collection, Document, FieldFilter, Precondition, Query};
use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

/// Keyed document store used as the system of record.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Get one document by key.
    async fn get(&self, collection: Collection, key: &str) -> StoreResult<Option<Document>>;

    /// Unconditional upsert.
    async fn put(&self, collection: Collection, key: &str, body: Value) -> StoreResult<Document>;

    /// Atomic conditional write. `next == None` deletes the document.
    ///
    /// Returns the document as stored after the write (`None` after a
    /// delete). Fails with [`StoreError::PreconditionFailed`] when the current
    /// state does not satisfy `expected`; nothing is written in that case.
    async fn compare_and_set(
        &self,
        collection: Collection,
        key: &str,
        expected: Precondition,
        next: Option<Value>,
    ) -> StoreResult<Option<Document>>;

    /// Atomically read and delete a document.
    async fn take(&self, collection: Collection, key: &str) -> StoreResult<Option<Document>>;

    /// Filtered, ordered range query.
    async fn query(&self, collection: Collection, query: &Query) -> StoreResult<Vec<Document>>;

    /// Subscribe to changes in a collection, optionally filtered by a field.
    fn watch(&self, collection: Collection, filter: Option<FieldFilter>) -> Watch;

    /// Insert a document that must not exist yet.
    async fn insert(&self, collection: Collection, key: &str, body: Value) -> StoreResult<Document> {
        self.compare_and_set(collection, key, Precondition::Absent, Some(body))
            .await?
            .ok_or_else(|| StoreError::Backend(format!("insert of {}/{} stored nothing", collection, key)))
    }

    /// Delete a document. Returns whether anything was deleted.
    async fn delete(&self, collection: Collection, key: &str) -> StoreResult<bool> {
        Ok(self.take(collection, key).await?.is_some())
    }
}

/// Subscription error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WatchError {
    /// The subscriber fell behind and `0` events were dropped.
    #[error("subscriber lagged by {0} events")]
    Lagged(u64),

    #[error("store closed")]
    Closed,
}

/// A live change subscription on one collection.
#[derive(Debug)]
pub struct Watch {
    collection: Collection,
    filter: Option<FieldFilter>,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl Watch {
    pub fn new(
        collection: Collection,
        filter: Option<FieldFilter>,
        rx: broadcast::Receiver<ChangeEvent>,
    ) -> Self {
        Self {
            collection,
            filter,
            rx,
        }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// Next matching change.
    pub async fn recv(&mut self) -> Result<ChangeEvent, WatchError> {
        loop {
            let event = match self.rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => return Err(WatchError::Lagged(n)),
                Err(broadcast::error::RecvError::Closed) => return Err(WatchError::Closed),
            };
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Next matching change already buffered, without waiting.
    pub fn try_recv(&mut self) -> Option<Result<ChangeEvent, WatchError>> {
        loop {
            let event = match self.rx.try_recv() {
                Ok(event) => event,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(WatchError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Some(Err(WatchError::Closed))
                }
            };
            if self.accepts(&event) {
                return Some(Ok(event));
            }
        }
    }

    fn accepts(&self, event: &ChangeEvent) -> bool {
        event.collection == self.collection
            && self
                .filter
                .as_ref()
                .map_or(true, |filter| filter.matches_change(event))
    }
}
