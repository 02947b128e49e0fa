//! # Signature Layer
//!
//! Verifies the caller-supplied signature over the canonical request
//! (method, path, identity, timestamp). Rejects stale timestamps and
//! malformed signatures before any payload inspection happens.

use crate::layers::ValidationLayer;
use crate::ports::CallerKeyProvider;
use crate::report::LayerReport;
use crate::request::ValidationRequest;
use async_trait::async_trait;
use shared_crypto::{canonicalize, HmacSigner, Signer};
use shared_types::{Clock, ErrorCode, Value};
use std::sync::Arc;

/// Maximum clock skew between caller timestamp and node clock.
pub const DEFAULT_MAX_SKEW_MS: u64 = 5 * 60 * 1000;

/// The encryption/signature verification layer.
pub struct SignatureLayer {
    keys: Arc<dyn CallerKeyProvider>,
    clock: Arc<dyn Clock>,
    max_skew_ms: u64,
}

impl SignatureLayer {
    /// Layer id referenced by pipeline configuration.
    pub const ID: &'static str = "signature";

    /// Creates the layer with the default skew window.
    #[must_use]
    pub fn new(keys: Arc<dyn CallerKeyProvider>, clock: Arc<dyn Clock>) -> Self {
        Self {
            keys,
            clock,
            max_skew_ms: DEFAULT_MAX_SKEW_MS,
        }
    }

    /// Overrides the skew window.
    #[must_use]
    pub fn with_max_skew_ms(mut self, max_skew_ms: u64) -> Self {
        self.max_skew_ms = max_skew_ms;
        self
    }
}

#[async_trait]
impl ValidationLayer for SignatureLayer {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn validate(&self, request: &ValidationRequest) -> LayerReport {
        let now = self.clock.now_ms();
        let skew = now.abs_diff(request.timestamp_ms);
        if skew > self.max_skew_ms {
            return LayerReport::failed(Self::ID, ErrorCode::AuthFail, "request timestamp stale")
                .with_details(Value::from([
                    ("skew_ms", Value::Int(skew as i64)),
                    ("max_skew_ms", Value::Int(self.max_skew_ms as i64)),
                ]));
        }

        let Some(signature) = &request.signature else {
            return LayerReport::failed(Self::ID, ErrorCode::AuthFail, "signature missing");
        };
        if signature.as_bytes().is_empty() {
            return LayerReport::failed(
                Self::ID,
                ErrorCode::SignatureInvalid,
                "signature malformed",
            );
        }

        let Some(secret) = self.keys.caller_secret(&request.identity) else {
            return LayerReport::failed(Self::ID, ErrorCode::AuthFail, "unknown caller");
        };

        let verifier = HmacSigner::new(secret, request.identity.as_str());
        let canonical = canonicalize(&request.signing_value());
        if verifier.verify(&canonical, signature) {
            LayerReport::passed(Self::ID, "signature verified")
        } else {
            LayerReport::failed(
                Self::ID,
                ErrorCode::SignatureInvalid,
                "signature does not verify",
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::StaticKeyProvider;
    use shared_types::{Identity, ManualClock, TenantId};
    use uuid::Uuid;

    fn signed_request(secret: &[u8], timestamp_ms: u64) -> ValidationRequest {
        let mut request = ValidationRequest {
            method: "POST".into(),
            path: "/trigger".into(),
            identity: Identity::from("alice"),
            tenant: TenantId::from("acme"),
            timestamp_ms,
            signature: None,
            payload: Value::empty_map(),
            resource: "flow:f".into(),
            required_permission: "execute".into(),
            correlation_id: Uuid::new_v4(),
        };
        let signer = HmacSigner::new(secret.to_vec(), "caller");
        request.signature = Some(signer.sign(&canonicalize(&request.signing_value())));
        request
    }

    fn layer(clock: Arc<ManualClock>) -> SignatureLayer {
        SignatureLayer::new(
            Arc::new(StaticKeyProvider::new().with_secret("alice", b"alice-secret".to_vec())),
            clock,
        )
    }

    #[tokio::test]
    async fn test_valid_signature_passes() {
        let clock = ManualClock::starting_at(1_000_000);
        let report = layer(clock)
            .validate(&signed_request(b"alice-secret", 1_000_000))
            .await;
        assert!(report.is_passing());
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let clock = ManualClock::starting_at(1_000_000);
        let report = layer(clock)
            .validate(&signed_request(b"wrong-secret", 1_000_000))
            .await;
        assert_eq!(report.code, Some(ErrorCode::SignatureInvalid));
    }

    #[tokio::test]
    async fn test_stale_timestamp_rejected() {
        let clock = ManualClock::starting_at(10_000_000);
        let report = layer(clock)
            .validate(&signed_request(b"alice-secret", 10_000_000 - DEFAULT_MAX_SKEW_MS - 1))
            .await;
        assert_eq!(report.code, Some(ErrorCode::AuthFail));
    }

    #[tokio::test]
    async fn test_missing_signature_rejected() {
        let clock = ManualClock::starting_at(1_000_000);
        let mut request = signed_request(b"alice-secret", 1_000_000);
        request.signature = None;
        let report = layer(clock).validate(&request).await;
        assert_eq!(report.code, Some(ErrorCode::AuthFail));
    }

    #[tokio::test]
    async fn test_unknown_caller_rejected() {
        let clock = ManualClock::starting_at(1_000_000);
        let mut request = signed_request(b"alice-secret", 1_000_000);
        request.identity = Identity::from("mallory");
        let report = layer(clock).validate(&request).await;
        assert_eq!(report.code, Some(ErrorCode::AuthFail));
    }

    #[tokio::test]
    async fn test_tampered_request_rejected() {
        let clock = ManualClock::starting_at(1_000_000);
        let mut request = signed_request(b"alice-secret", 1_000_000);
        request.path = "/other".into();
        let report = layer(clock).validate(&request).await;
        assert_eq!(report.code, Some(ErrorCode::SignatureInvalid));
    }
}
