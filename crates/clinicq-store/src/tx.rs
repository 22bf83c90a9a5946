use crate::model::{Collection, Document, Precondition};
use crate::traits::DocumentStore;
use crate::StoreError;
use serde_json::Value;
use tracing::debug;

/// What a read-modify-write step decided to do with the document it saw.
#[derive(Debug, Clone, PartialEq)]
pub enum TxDecision {
    Write(Value),
    Delete,
    /// Leave the document untouched and return it as read.
    Keep,
}

/// Optimistic read-modify-write on a single key.
///
/// Reads the document, lets `decide` inspect it, then commits the decision
/// with a compare-and-set against the version that was read. A concurrent
/// writer makes the commit fail and the whole step is re-run, up to
/// `max_attempts` times before giving up with [`StoreError::Contention`].
/// Errors returned by `decide` abort the transaction unchanged.
pub async fn transact<F, E>(
    store: &dyn DocumentStore,
    collection: Collection,
    key: &str,
    max_attempts: u32,
    mut decide: F,
) -> Result<Option<Document>, E>
where
    F: FnMut(Option<&Document>) -> Result<TxDecision, E> + Send,
    E: From<StoreError> + Send,
{
    let attempts = max_attempts.max(1);
    for attempt in 1..=attempts {
        let current = store.get(collection, key).await?;
        let expected = match &current {
            Some(doc) => Precondition::Version(doc.version),
            None => Precondition::Absent,
        };

        let next = match decide(current.as_ref())? {
            TxDecision::Keep => return Ok(current),
            TxDecision::Delete if current.is_none() => return Ok(None),
            TxDecision::Delete => None,
            TxDecision::Write(body) => Some(body),
        };

        match store.compare_and_set(collection, key, expected, next).await {
            Ok(stored) => return Ok(stored),
            Err(StoreError::PreconditionFailed(_)) => {
                debug!(%collection, key, attempt, "transaction conflict, retrying");
            }
            Err(other) => return Err(other.into()),
        }
    }

    Err(StoreError::Contention(format!(
        "{}/{}: gave up after {} attempts",
        collection, key, attempts
    ))
    .into())
}
