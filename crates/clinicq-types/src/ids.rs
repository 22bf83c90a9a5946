//! Strongly-typed identifiers for ClinicQ entities
//!
//! Patient, counter and establishment ids come from outside (badge numbers,
//! facility codes) and are kept as opaque strings. Keys minted by ClinicQ
//! itself are UUID-based. All of them serialize as bare strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error returned when a key cannot be parsed from its textual form.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {kind}: {value}")]
pub struct IdParseError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }
    };
}

macro_rules! uuid_key {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Storage key form (the bare UUID).
            pub fn storage_key(&self) -> String {
                self.0.to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            /// Accepts both the bare UUID and the prefixed display form.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s.strip_prefix(concat!($prefix, ":")).unwrap_or(s);
                Uuid::parse_str(raw).map(Self).map_err(|_| IdParseError {
                    kind: stringify!($name),
                    value: s.to_string(),
                })
            }
        }
    };
}

string_id!(
    /// Patient identity (`uid`).
    PatientId
);

string_id!(
    /// Service counter identifier.
    CounterId
);

string_id!(
    /// Establishment (facility) identifier.
    EstablishmentId
);

uuid_key!(
    /// Key of a service request.
    RequestKey,
    "req"
);

uuid_key!(
    /// Key of one issued arrival authorization. A fresh key is minted every
    /// time an ArrivalIndexEntry is (re)created.
    AwaitingKey,
    "await"
);

uuid_key!(
    /// Key of an active queue entry.
    QueueKey,
    "queue"
);

impl QueueKey {
    /// Queue key admitted for a consumed authorization.
    ///
    /// Derived rather than generated so that replaying the admission write for
    /// the same arrival lands on the same document.
    pub fn for_arrival(awaiting_key: &AwaitingKey) -> Self {
        Self(*awaiting_key.as_uuid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_key_generation() {
        let a = RequestKey::generate();
        let b = RequestKey::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_uuid_key_parses_prefixed_and_bare() {
        let key = AwaitingKey::generate();
        let prefixed: AwaitingKey = key.to_string().parse().unwrap();
        let bare: AwaitingKey = key.storage_key().parse().unwrap();
        assert_eq!(prefixed, key);
        assert_eq!(bare, key);
        assert!(key.to_string().starts_with("await:"));
    }

    #[test]
    fn test_invalid_key_is_rejected() {
        let err = "req:not-a-uuid".parse::<RequestKey>().unwrap_err();
        assert_eq!(err.kind, "RequestKey");
    }

    #[test]
    fn test_string_ids_serialize_bare() {
        let uid = PatientId::new("P1");
        assert_eq!(serde_json::to_string(&uid).unwrap(), "\"P1\"");
        assert_eq!(uid.to_string(), "P1");
    }

    #[test]
    fn test_queue_key_follows_awaiting_key() {
        let awaiting = AwaitingKey::generate();
        assert_eq!(
            QueueKey::for_arrival(&awaiting).as_uuid(),
            awaiting.as_uuid()
        );
    }
}
