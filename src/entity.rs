//! The target resource an operation acts on.

use crate::error::AsyncError;
use crate::request::OperationRequest;
use async_trait::async_trait;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// The resource an operation is guarded against.
///
/// The only capability the pipeline needs is the id of the most recently
/// accepted operation; `guard_concurrency` compares it against the incoming
/// request to enforce at-most-one-in-flight per entity.
pub trait Entity: Send + Sync {
    /// Id of the most recently accepted operation against this entity.
    fn latest_operation_id(&self) -> &str;
}

impl fmt::Debug for dyn Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("dyn Entity")
            .field("latest_operation_id", &self.latest_operation_id())
            .finish()
    }
}

/// Builds an entity from the id of the last accepted operation. Registered
/// per operation name in the [`Matcher`](crate::Matcher).
pub type EntityFactory =
    Arc<dyn Fn(&str) -> Result<Box<dyn Entity>, Box<dyn StdError + Send + Sync>> + Send + Sync>;

/// Reads the target entity for a request from persistent storage.
///
/// Fetch failures are normally transient storage issues, so implementations
/// should classify them as retryable unless they know better.
#[async_trait]
pub trait EntityFetcher: Send + Sync {
    async fn get(&self, request: &OperationRequest) -> Result<Box<dyn Entity>, AsyncError>;
}
