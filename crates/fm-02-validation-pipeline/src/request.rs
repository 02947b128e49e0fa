//! # Validation Request
//!
//! The canonical shape a trigger takes while traversing the pipeline.
//! Its value form is the cache-key input, so two identical requests key
//! identically regardless of which node validates them.

use shared_crypto::SignatureBytes;
use shared_types::{Identity, TenantId, Value};
use uuid::Uuid;

/// One operation under validation.
#[derive(Debug, Clone)]
pub struct ValidationRequest {
    /// Request method tag (`POST`, `trigger`, ...). Opaque to the core.
    pub method: String,
    /// Request path or operation name.
    pub path: String,
    /// The authenticated caller.
    pub identity: Identity,
    /// Tenant the operation executes under.
    pub tenant: TenantId,
    /// Caller-supplied timestamp, epoch milliseconds.
    pub timestamp_ms: u64,
    /// Caller signature over the canonical request, if provided.
    pub signature: Option<SignatureBytes>,
    /// The operation payload.
    pub payload: Value,
    /// Resource the operation touches (consent is checked against this).
    pub resource: String,
    /// Permission the operation requires on the resource.
    pub required_permission: String,
    /// Correlates pipeline events with the triggering operation.
    pub correlation_id: Uuid,
}

impl ValidationRequest {
    /// The canonical request fields the caller signs: method, path,
    /// identity, timestamp. Payload integrity is the security layer's
    /// concern, not the transport signature's.
    #[must_use]
    pub fn signing_value(&self) -> Value {
        Value::from([
            ("method", Value::from(self.method.as_str())),
            ("path", Value::from(self.path.as_str())),
            ("identity", Value::from(self.identity.as_str())),
            ("timestamp_ms", Value::Int(self.timestamp_ms as i64)),
        ])
    }

    /// The full cache-key input: signing fields plus tenant, resource,
    /// permission, and payload. Any change to what a layer could observe
    /// must change the key.
    #[must_use]
    pub fn cache_input(&self) -> Value {
        Value::from([
            ("method", Value::from(self.method.as_str())),
            ("path", Value::from(self.path.as_str())),
            ("identity", Value::from(self.identity.as_str())),
            ("tenant", Value::from(self.tenant.as_str())),
            ("resource", Value::from(self.resource.as_str())),
            ("permission", Value::from(self.required_permission.as_str())),
            ("payload", self.payload.clone()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_crypto::hash_value;

    fn request(payload: Value) -> ValidationRequest {
        ValidationRequest {
            method: "POST".into(),
            path: "/flows/f-1/trigger".into(),
            identity: Identity::from("did:example:alice"),
            tenant: TenantId::from("acme"),
            timestamp_ms: 1_700_000_000_000,
            signature: None,
            payload,
            resource: "flow:f-1".into(),
            required_permission: "execute".into(),
            correlation_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_cache_input_ignores_timestamp_and_signature() {
        // Two submissions of the same operation seconds apart must share
        // a cache key; the timestamp lives only in the signing value.
        let mut a = request(Value::from([("x", Value::Int(1))]));
        let mut b = request(Value::from([("x", Value::Int(1))]));
        a.timestamp_ms = 1;
        b.timestamp_ms = 2;
        assert_eq!(hash_value(&a.cache_input()), hash_value(&b.cache_input()));
    }

    #[test]
    fn test_cache_input_sensitive_to_payload() {
        let a = request(Value::from([("x", Value::Int(1))]));
        let b = request(Value::from([("x", Value::Int(2))]));
        assert_ne!(hash_value(&a.cache_input()), hash_value(&b.cache_input()));
    }

    #[test]
    fn test_signing_value_shape() {
        let req = request(Value::Null);
        let v = req.signing_value();
        assert!(v.get_path("method").is_some());
        assert!(v.get_path("identity").is_some());
        assert!(v.get_path("payload").is_none());
    }
}
