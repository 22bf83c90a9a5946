//! In-memory reference implementation of [`DocumentStore`].
//!
//! Per-key atomicity comes from `DashMap` entry locking: a conditional write
//! holds the shard lock for its key from the precondition check through the
//! write and the change notification. Change events are fanned out over a
//! `tokio::sync::broadcast` channel. Nothing is persisted.

use crate::model::{ChangeEvent, ChangeKind, Collection, Document, FieldFilter, Precondition, Query};
use crate::traits::{DocumentStore, Watch};
use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// Default capacity of the change broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

type DocKey = (Collection, String);

/// In-memory document store.
pub struct InMemoryDocumentStore {
    docs: Arc<DashMap<DocKey, Document>>,
    sequence: AtomicU64,
    events: broadcast::Sender<ChangeEvent>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            docs: Arc::new(DashMap::new()),
            sequence: AtomicU64::new(0),
            events,
        }
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: Collection) -> usize {
        self.docs.iter().filter(|e| e.key().0 == collection).count()
    }

    fn next_version(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn document(&self, collection: Collection, key: &str, body: Value) -> Document {
        Document {
            collection,
            key: key.to_string(),
            version: self.next_version(),
            body,
            updated_at: Utc::now(),
        }
    }

    fn publish(
        &self,
        collection: Collection,
        key: &str,
        kind: ChangeKind,
        document: Option<Document>,
        previous: Option<Document>,
    ) {
        // No receivers is not an error.
        let _ = self.events.send(ChangeEvent {
            collection,
            key: key.to_string(),
            kind,
            document,
            previous,
        });
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, collection: Collection, key: &str) -> StoreResult<Option<Document>> {
        Ok(self
            .docs
            .get(&(collection, key.to_string()))
            .map(|d| d.value().clone()))
    }

    async fn put(&self, collection: Collection, key: &str, body: Value) -> StoreResult<Document> {
        self.compare_and_set(collection, key, Precondition::Any, Some(body))
            .await?
            .ok_or_else(|| StoreError::Backend(format!("put of {}/{} stored nothing", collection, key)))
    }

    async fn compare_and_set(
        &self,
        collection: Collection,
        key: &str,
        expected: Precondition,
        next: Option<Value>,
    ) -> StoreResult<Option<Document>> {
        match self.docs.entry((collection, key.to_string())) {
            Entry::Occupied(mut occupied) => {
                let current_version = occupied.get().version;
                if !expected.admits(Some(current_version)) {
                    trace!(%collection, key, current_version, ?expected, "precondition failed");
                    return Err(StoreError::PreconditionFailed(format!(
                        "{}/{} is at version {}, expected {:?}",
                        collection, key, current_version, expected
                    )));
                }
                match next {
                    Some(body) => {
                        let document = self.document(collection, key, body);
                        let previous = occupied.insert(document.clone());
                        self.publish(
                            collection,
                            key,
                            ChangeKind::Updated,
                            Some(document.clone()),
                            Some(previous),
                        );
                        Ok(Some(document))
                    }
                    None => {
                        let previous = occupied.remove();
                        self.publish(collection, key, ChangeKind::Deleted, None, Some(previous));
                        Ok(None)
                    }
                }
            }
            Entry::Vacant(vacant) => {
                if !expected.admits(None) {
                    trace!(%collection, key, ?expected, "precondition failed on absent document");
                    return Err(StoreError::PreconditionFailed(format!(
                        "{}/{} does not exist, expected {:?}",
                        collection, key, expected
                    )));
                }
                match next {
                    Some(body) => {
                        let document = self.document(collection, key, body);
                        vacant.insert(document.clone());
                        self.publish(
                            collection,
                            key,
                            ChangeKind::Inserted,
                            Some(document.clone()),
                            None,
                        );
                        Ok(Some(document))
                    }
                    None => Ok(None),
                }
            }
        }
    }

    async fn take(&self, collection: Collection, key: &str) -> StoreResult<Option<Document>> {
        match self.docs.entry((collection, key.to_string())) {
            Entry::Occupied(occupied) => {
                let previous = occupied.remove();
                self.publish(
                    collection,
                    key,
                    ChangeKind::Deleted,
                    None,
                    Some(previous.clone()),
                );
                Ok(Some(previous))
            }
            Entry::Vacant(_) => Ok(None),
        }
    }

    async fn query(&self, collection: Collection, query: &Query) -> StoreResult<Vec<Document>> {
        let candidates = self
            .docs
            .iter()
            .filter(|e| e.key().0 == collection && query.matches(&e.value().body))
            .map(|e| e.value().clone())
            .collect::<Vec<_>>();
        Ok(query.arrange(candidates))
    }

    fn watch(&self, collection: Collection, filter: Option<FieldFilter>) -> Watch {
        Watch::new(collection, filter, self.events.subscribe())
    }
}
