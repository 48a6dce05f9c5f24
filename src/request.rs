//! The on-the-wire operation payload.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The payload carried inside each broker message.
///
/// `operation_name` is the key the [`Matcher`](crate::Matcher) resolves;
/// `operation_id` is the correlation key for the status store and is treated
/// as immutable for the lifetime of the message. Fields absent from the wire
/// decode to their zero value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationRequest {
    /// Resolves the operation implementation in the matcher.
    pub operation_name: String,
    /// API version the operation is associated with.
    pub api_version: String,
    /// Unique id of this operation; correlation key for the status store.
    pub operation_id: String,
    /// Id of the entity the operation acts on.
    pub entity_id: String,
    /// Type of the entity the operation acts on.
    pub entity_type: String,
    /// Number of times this operation has been retried. Informational.
    pub retry_count: u32,
    /// The operation must not execute once this point in time has passed.
    pub expiration_timestamp: Option<DateTime<Utc>>,
    /// Operation-specific payload.
    pub body: Vec<u8>,
    /// HTTP method for HTTP-shaped operations. Informational.
    pub http_method: String,
    /// Free-form envelope; survives broker round-trips and can be
    /// re-materialized into a caller-chosen shape.
    pub extension: Option<Value>,
}

/// Failure re-materializing the [`extension`](OperationRequest::extension)
/// field into a concrete shape.
#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("no extension set on the request")]
    Missing,
    #[error("extension does not fit the requested shape: {0}")]
    Shape(#[from] serde_json::Error),
}

impl OperationRequest {
    pub fn new(operation_name: impl Into<String>, operation_id: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            operation_id: operation_id.into(),
            ..Self::default()
        }
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn with_entity(
        mut self,
        entity_id: impl Into<String>,
        entity_type: impl Into<String>,
    ) -> Self {
        self.entity_id = entity_id.into();
        self.entity_type = entity_type.into();
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration_timestamp = Some(expiration);
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_http_method(mut self, http_method: impl Into<String>) -> Self {
        self.http_method = http_method.into();
        self
    }

    /// Store `value` as the extension.
    pub fn with_extension<T: Serialize>(mut self, value: &T) -> Result<Self, ExtensionError> {
        self.extension = Some(serde_json::to_value(value)?);
        Ok(self)
    }

    /// Re-materialize the extension into the caller-chosen shape `T` by
    /// pushing it back through the encoding.
    pub fn extension_as<T: DeserializeOwned>(&self) -> Result<T, ExtensionError> {
        let value = self.extension.as_ref().ok_or(ExtensionError::Missing)?;
        Ok(serde_json::from_value(value.clone())?)
    }

    /// True once `expiration_timestamp` is set and `now` has passed it.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_timestamp.is_some_and(|deadline| deadline <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct ScaleDetails {
        target_replicas: u32,
        reason: String,
    }

    #[test]
    fn absent_fields_decode_to_zero_values() {
        let request: OperationRequest =
            serde_json::from_str(r#"{"operation_name":"Scale","operation_id":"op-1"}"#)
                .expect("decode");
        assert_eq!(request.operation_name, "Scale");
        assert_eq!(request.operation_id, "op-1");
        assert_eq!(request.retry_count, 0);
        assert!(request.api_version.is_empty());
        assert!(request.body.is_empty());
        assert!(request.expiration_timestamp.is_none());
        assert!(request.extension.is_none());
    }

    #[test]
    fn extension_round_trips_through_the_encoding() {
        let details = ScaleDetails { target_replicas: 7, reason: "load spike".into() };
        let request = OperationRequest::new("Scale", "op-2")
            .with_extension(&details)
            .expect("set extension");

        let encoded = serde_json::to_vec(&request).expect("encode");
        let decoded: OperationRequest = serde_json::from_slice(&encoded).expect("decode");
        let re_encoded = serde_json::to_vec(&decoded).expect("re-encode");
        assert_eq!(encoded, re_encoded, "re-encoding must be canonical");

        let recovered: ScaleDetails = decoded.extension_as().expect("re-materialize");
        assert_eq!(recovered, details);
    }

    #[test]
    fn missing_extension_is_an_error() {
        let request = OperationRequest::new("Scale", "op-3");
        assert!(matches!(
            request.extension_as::<ScaleDetails>(),
            Err(ExtensionError::Missing)
        ));
    }

    #[test]
    fn mismatched_extension_shape_is_an_error() {
        let request = OperationRequest::new("Scale", "op-4")
            .with_extension(&"just a string")
            .expect("set extension");
        assert!(matches!(
            request.extension_as::<ScaleDetails>(),
            Err(ExtensionError::Shape(_))
        ));
    }

    #[test]
    fn expiry_is_inclusive_of_the_deadline() {
        let now = Utc::now();
        let request = OperationRequest::new("Scale", "op-5").with_expiration(now);
        assert!(request.is_expired(now));
        assert!(request.is_expired(now + Duration::seconds(1)));
        assert!(!request.is_expired(now - Duration::seconds(1)));
    }

    #[test]
    fn no_deadline_never_expires() {
        let request = OperationRequest::new("Scale", "op-6");
        assert!(!request.is_expired(Utc::now()));
    }
}
