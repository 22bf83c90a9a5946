//! ClinicQ document store.
//!
//! ClinicQ components never talk to a database directly. They depend on a
//! keyed document store offering four capabilities:
//! - get/set/delete by key
//! - atomic conditional writes (compare-and-set on a document version)
//! - change subscriptions filtered by a field value
//! - ordered range queries by a field
//!
//! Anything providing those (an embedded KV store with watch support, a
//! managed realtime database) can back ClinicQ. `memory` holds the in-process
//! reference backend.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
mod model;
mod traits;
mod tx;

pub use error::{StoreError, StoreResult};
pub use model::{
    ChangeEvent, ChangeKind, Collection, Document, FieldFilter, Precondition, Query, QueryWindow,
    SortOrder,
};
pub use traits::{DocumentStore, Watch, WatchError};
pub use tx::{transact, TxDecision};
