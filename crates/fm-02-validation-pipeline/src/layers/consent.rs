//! # Consent Layer
//!
//! Consults the consent store for the required permission on the
//! resource. Default-deny: an absent token is a denial, and a store
//! fault blocks the request (fail closed).

use crate::layers::ValidationLayer;
use crate::ports::ConsentStore;
use crate::report::LayerReport;
use crate::request::ValidationRequest;
use async_trait::async_trait;
use shared_types::{ErrorCode, Value};
use std::sync::Arc;
use tracing::warn;

/// The consent/authorization layer.
pub struct ConsentLayer {
    store: Arc<dyn ConsentStore>,
}

impl ConsentLayer {
    /// Layer id referenced by pipeline configuration.
    pub const ID: &'static str = "consent";

    /// Creates the layer over a consent store.
    #[must_use]
    pub fn new(store: Arc<dyn ConsentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ValidationLayer for ConsentLayer {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn validate(&self, request: &ValidationRequest) -> LayerReport {
        let consulted = self
            .store
            .has_consent(
                &request.identity,
                &request.resource,
                &request.required_permission,
            )
            .await;

        match consulted {
            Ok(true) => LayerReport::passed(Self::ID, "consent granted"),
            Ok(false) => LayerReport::failed(
                Self::ID,
                ErrorCode::ConsentDenied,
                "no consent token grants the required permission",
            )
            .with_details(Value::from([
                ("resource", Value::from(request.resource.as_str())),
                (
                    "permission",
                    Value::from(request.required_permission.as_str()),
                ),
            ])),
            Err(e) => {
                warn!(error = %e, "Consent store fault; failing closed");
                LayerReport::failed(Self::ID, ErrorCode::Internal, "consent store unavailable")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PortError;
    use shared_types::{Identity, TenantId};
    use uuid::Uuid;

    struct FixedConsent(Result<bool, PortError>);

    #[async_trait]
    impl ConsentStore for FixedConsent {
        async fn has_consent(
            &self,
            _identity: &Identity,
            _resource: &str,
            _permission: &str,
        ) -> Result<bool, PortError> {
            self.0.clone()
        }
    }

    fn request() -> ValidationRequest {
        ValidationRequest {
            method: "POST".into(),
            path: "/trigger".into(),
            identity: Identity::from("alice"),
            tenant: TenantId::from("acme"),
            timestamp_ms: 0,
            signature: None,
            payload: Value::empty_map(),
            resource: "flow:f".into(),
            required_permission: "execute".into(),
            correlation_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_granted() {
        let layer = ConsentLayer::new(Arc::new(FixedConsent(Ok(true))));
        assert!(layer.validate(&request()).await.is_passing());
    }

    #[tokio::test]
    async fn test_default_deny() {
        let layer = ConsentLayer::new(Arc::new(FixedConsent(Ok(false))));
        let report = layer.validate(&request()).await;
        assert_eq!(report.code, Some(ErrorCode::ConsentDenied));
    }

    #[tokio::test]
    async fn test_store_fault_fails_closed() {
        let layer = ConsentLayer::new(Arc::new(FixedConsent(Err(PortError::Unavailable(
            "down".into(),
        )))));
        let report = layer.validate(&request()).await;
        assert!(!report.is_passing());
        assert_eq!(report.code, Some(ErrorCode::Internal));
    }
}
