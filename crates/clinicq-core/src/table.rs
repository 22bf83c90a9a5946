//! Typed access to a store collection.

use clinicq_store::{Collection, Document, DocumentStore, Precondition, Query, StoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

/// A decoded record together with the store version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub record: T,
}

impl<T: DeserializeOwned> Versioned<T> {
    pub(crate) fn decode(doc: &Document) -> StoreResult<Self> {
        Ok(Self {
            version: doc.version,
            record: doc.decode()?,
        })
    }
}

/// One collection viewed as records of type `T`.
pub(crate) struct Table<T> {
    store: Arc<dyn DocumentStore>,
    collection: Collection,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for Table<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            collection: self.collection,
            _record: PhantomData,
        }
    }
}

impl<T> Table<T>
where
    T: Serialize + DeserializeOwned,
{
    pub(crate) fn new(store: Arc<dyn DocumentStore>, collection: Collection) -> Self {
        Self {
            store,
            collection,
            _record: PhantomData,
        }
    }

    pub(crate) fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub(crate) fn collection(&self) -> Collection {
        self.collection
    }

    pub(crate) async fn get(&self, key: &str) -> StoreResult<Option<Versioned<T>>> {
        self.store
            .get(self.collection, key)
            .await?
            .map(|doc| Versioned::decode(&doc))
            .transpose()
    }

    pub(crate) async fn record(&self, key: &str) -> StoreResult<Option<T>> {
        Ok(self.get(key).await?.map(|v| v.record))
    }

    pub(crate) async fn put(&self, key: &str, record: &T) -> StoreResult<u64> {
        let body = serde_json::to_value(record)?;
        Ok(self.store.put(self.collection, key, body).await?.version)
    }

    /// Insert a record that must not exist yet.
    pub(crate) async fn insert(&self, key: &str, record: &T) -> StoreResult<u64> {
        let body = serde_json::to_value(record)?;
        Ok(self.store.insert(self.collection, key, body).await?.version)
    }

    /// Replace a record only if it is still at `version`.
    pub(crate) async fn replace(&self, key: &str, version: u64, record: &T) -> StoreResult<u64> {
        let body = serde_json::to_value(record)?;
        let stored = self
            .store
            .compare_and_set(self.collection, key, Precondition::Version(version), Some(body))
            .await?;
        Ok(stored.map_or(version, |doc| doc.version))
    }

    /// Delete a record only if it is still at `version`.
    pub(crate) async fn remove_at(&self, key: &str, version: u64) -> StoreResult<()> {
        self.store
            .compare_and_set(self.collection, key, Precondition::Version(version), None)
            .await
            .map(|_| ())
    }

    /// Atomically read and delete.
    pub(crate) async fn take(&self, key: &str) -> StoreResult<Option<T>> {
        self.store
            .take(self.collection, key)
            .await?
            .map(|doc| doc.decode())
            .transpose()
    }

    pub(crate) async fn query(&self, query: &Query) -> StoreResult<Vec<Versioned<T>>> {
        self.store
            .query(self.collection, query)
            .await?
            .iter()
            .map(Versioned::decode)
            .collect()
    }

    pub(crate) async fn records(&self, query: &Query) -> StoreResult<Vec<T>> {
        Ok(self.query(query).await?.into_iter().map(|v| v.record).collect())
    }
}
