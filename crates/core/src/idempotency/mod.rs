//! Idempotency keys, request fingerprints, and response snapshots.
//!
//! The idempotency scope is (api-key-id, key). A reservation is made inside
//! the same store transaction as the posting; completed records are immutable
//! and replay the exact response of the first call. Fingerprints detect key
//! reuse with a different request body.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::ledger::error::LedgerError;

/// Maximum accepted key length.
const MAX_KEY_LEN: usize = 256;

/// A validated, canonicalized idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Canonicalizes and validates a client-supplied key: trimmed, non-empty,
    /// at most 256 bytes, printable ASCII.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for empty, oversized, or non-printable keys.
    pub fn parse(raw: &str) -> Result<Self, LedgerError> {
        let key = raw.trim();
        if key.is_empty() {
            return Err(LedgerError::Validation(
                "idempotency key must not be empty".to_string(),
            ));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(LedgerError::Validation(format!(
                "idempotency key exceeds {MAX_KEY_LEN} bytes"
            )));
        }
        if !key.bytes().all(|b| (0x21..=0x7e).contains(&b)) {
            return Err(LedgerError::Validation(
                "idempotency key must be printable ASCII without spaces".to_string(),
            ));
        }
        Ok(Self(key.to_string()))
    }

    /// Returns the canonical key string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SHA-256 fingerprint of a canonical request body, hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprints an operation name plus its serialized request.
    ///
    /// The operation name is mixed in so the same body sent to two different
    /// operations never fingerprints equal. Object keys are sorted before
    /// hashing so field order in the wire body is irrelevant.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the request fails to serialize.
    pub fn of<T: Serialize>(operation: &str, request: &T) -> Result<Self, LedgerError> {
        let value = serde_json::to_value(request)
            .map_err(|e| LedgerError::Validation(format!("unserializable request: {e}")))?;
        let mut hasher = Sha256::new();
        hasher.update(operation.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical_json(&value).as_bytes());
        let digest = hasher.finalize();
        Ok(Self(hex_encode(&digest)))
    }

    /// Returns the hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Renders JSON with recursively sorted object keys.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", rendered.join(","))
        }
        other => other.to_string(),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// The recorded outcome of a completed operation: either the success body or
/// the final error, exactly as the adapter would render it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Whether the recorded outcome was a success.
    pub ok: bool,
    /// The response body (success) or serialized error (failure).
    pub body: Value,
}

impl Snapshot {
    /// Records a successful response body.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the receipt fails to serialize.
    pub fn success<T: Serialize>(receipt: &T) -> Result<Self, LedgerError> {
        Ok(Self {
            ok: true,
            body: serde_json::to_value(receipt)
                .map_err(|e| LedgerError::Store(format!("unserializable receipt: {e}")))?,
        })
    }

    /// Records a final failure.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the error fails to serialize.
    pub fn failure(error: &LedgerError) -> Result<Self, LedgerError> {
        Ok(Self {
            ok: false,
            body: serde_json::to_value(error)
                .map_err(|e| LedgerError::Store(format!("unserializable error: {e}")))?,
        })
    }

    /// Replays the recorded outcome as the operation result.
    ///
    /// # Errors
    ///
    /// Returns the recorded failure, or `Store` if the snapshot cannot be
    /// decoded into the expected receipt type.
    pub fn replay<T: DeserializeOwned>(&self) -> Result<T, LedgerError> {
        if self.ok {
            serde_json::from_value(self.body.clone())
                .map_err(|e| LedgerError::Store(format!("undecodable snapshot: {e}")))
        } else {
            let error: LedgerError = serde_json::from_value(self.body.clone())
                .map_err(|e| LedgerError::Store(format!("undecodable error snapshot: {e}")))?;
            Err(error)
        }
    }
}

/// Stored idempotency record status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Reserved, operation still running.
    InFlight,
    /// Completed successfully; snapshot holds the response body.
    Completed,
    /// Completed with a final failure; snapshot holds the error.
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_trims_and_validates() {
        assert_eq!(
            IdempotencyKey::parse("  tx-001  ").unwrap().as_str(),
            "tx-001"
        );
        assert!(IdempotencyKey::parse("").is_err());
        assert!(IdempotencyKey::parse("   ").is_err());
        assert!(IdempotencyKey::parse("has space").is_err());
        assert!(IdempotencyKey::parse(&"k".repeat(257)).is_err());
    }

    #[test]
    fn test_fingerprint_is_order_insensitive() {
        let a = json!({"amount": "25.00", "to": "@store"});
        let b = json!({"to": "@store", "amount": "25.00"});
        assert_eq!(
            Fingerprint::of("transfer", &a).unwrap(),
            Fingerprint::of("transfer", &b).unwrap()
        );
    }

    #[test]
    fn test_fingerprint_differs_on_body_change() {
        let a = json!({"amount": "25.00"});
        let b = json!({"amount": "26.00"});
        assert_ne!(
            Fingerprint::of("transfer", &a).unwrap(),
            Fingerprint::of("transfer", &b).unwrap()
        );
    }

    #[test]
    fn test_fingerprint_differs_per_operation() {
        let body = json!({"amount": "25.00"});
        assert_ne!(
            Fingerprint::of("transfer", &body).unwrap(),
            Fingerprint::of("hold_create", &body).unwrap()
        );
    }

    #[test]
    fn test_snapshot_replays_success() {
        #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
        struct Receipt {
            entry_id: String,
        }
        let receipt = Receipt {
            entry_id: "abc".to_string(),
        };
        let snapshot = Snapshot::success(&receipt).unwrap();
        let replayed: Receipt = snapshot.replay().unwrap();
        assert_eq!(replayed, receipt);
    }

    #[test]
    fn test_snapshot_replays_failure() {
        let err = LedgerError::InsufficientFunds {
            available: 100,
            required: 200,
        };
        let snapshot = Snapshot::failure(&err).unwrap();
        let replayed: Result<(), LedgerError> = snapshot.replay();
        assert_eq!(replayed.unwrap_err(), err);
    }

    #[test]
    fn test_snapshot_bytes_stable() {
        let err = LedgerError::SelfTransfer;
        let a = serde_json::to_string(&Snapshot::failure(&err).unwrap()).unwrap();
        let b = serde_json::to_string(&Snapshot::failure(&err).unwrap()).unwrap();
        assert_eq!(a, b);
    }
}
