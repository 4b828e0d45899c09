//! Deterministic hashing of job request bodies.
//!
//! Resubmitting a job with the same `job_id` is a no-op only when the
//! request body is byte-for-byte equivalent. JSON object key order is not
//! significant, so the body is canonicalised (keys sorted recursively)
//! before hashing. The SHA-256 digest is truncated to 16 bytes and stored
//! as a UUID so it fits the same column shape as every other identifier.

use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Hash a request body into its idempotency key.
///
/// The same logical JSON document maps to the same hash across processes
/// and versions; any structural difference produces a different one.
pub fn request_hash(body: &Value) -> Uuid {
    let mut canonical = String::new();
    write_canonical(body, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

/// Serialize a JSON value with object keys in sorted order.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Key serialization cannot fail for a string
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            out.push_str(&scalar.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_bodies_hash_the_same() {
        let a = json!({"url": "http://example.com", "depth": 3});
        let b = json!({"url": "http://example.com", "depth": 3});
        assert_eq!(request_hash(&a), request_hash(&b));
    }

    #[test]
    fn key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"a": 1, "b": 2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b": 2, "a": 1}"#).unwrap();
        assert_eq!(request_hash(&a), request_hash(&b));
    }

    #[test]
    fn nested_key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"outer": {"x": 1, "y": 2}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"outer": {"y": 2, "x": 1}}"#).unwrap();
        assert_eq!(request_hash(&a), request_hash(&b));
    }

    #[test]
    fn different_bodies_hash_differently() {
        let a = json!({"url": "http://example.com"});
        let b = json!({"url": "http://example.org"});
        assert_ne!(request_hash(&a), request_hash(&b));
    }

    #[test]
    fn array_order_matters() {
        let a = json!([1, 2, 3]);
        let b = json!([3, 2, 1]);
        assert_ne!(request_hash(&a), request_hash(&b));
    }

    #[test]
    fn null_and_empty_object_differ() {
        assert_ne!(request_hash(&Value::Null), request_hash(&json!({})));
    }

    #[test]
    fn hash_is_a_stable_uuid() {
        let body = json!({"k": "v"});
        let first = request_hash(&body);
        let second = request_hash(&body);
        assert_eq!(first, second);
        assert_ne!(first, Uuid::nil());
    }
}
