//! Patient identity and verification secret.

use crate::ids::PatientId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A registered patient.
///
/// The PIN is never stored in clear: only a salted SHA-256 digest is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub uid: PatientId,
    pub display_name: String,
    pin_salt: String,
    pin_digest: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub registered_at: DateTime<Utc>,
}

impl Patient {
    pub fn new(uid: PatientId, display_name: impl Into<String>, pin: &str) -> Self {
        let pin_salt = Uuid::new_v4().simple().to_string();
        let pin_digest = digest_pin(&pin_salt, pin);
        Self {
            uid,
            display_name: display_name.into(),
            pin_salt,
            pin_digest,
            registered_at: Utc::now(),
        }
    }

    /// Check a candidate PIN against the stored digest.
    pub fn verify_pin(&self, candidate: &str) -> bool {
        let candidate = digest_pin(&self.pin_salt, candidate);
        // Digests are fixed-length hex, fold to avoid early exit on mismatch.
        candidate.len() == self.pin_digest.len()
            && candidate
                .bytes()
                .zip(self.pin_digest.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

fn digest_pin(salt: &str, pin: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(pin.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_verification() {
        let patient = Patient::new(PatientId::new("P1"), "Ada", "4821");
        assert!(patient.verify_pin("4821"));
        assert!(!patient.verify_pin("4822"));
        assert!(!patient.verify_pin(""));
    }

    #[test]
    fn test_pin_not_serialized_in_clear() {
        let patient = Patient::new(PatientId::new("P1"), "Ada", "4821");
        let json = serde_json::to_string(&patient).unwrap();
        assert!(!json.contains("4821"));
        let restored: Patient = serde_json::from_str(&json).unwrap();
        assert!(restored.verify_pin("4821"));
    }

    #[test]
    fn test_same_pin_different_salt() {
        let a = Patient::new(PatientId::new("P1"), "Ada", "0000");
        let b = Patient::new(PatientId::new("P2"), "Bea", "0000");
        assert_ne!(a.pin_digest, b.pin_digest);
    }
}
