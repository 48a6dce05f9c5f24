//! The polymorphic unit of work.

use crate::entity::Entity;
use crate::error::AsyncError;
use crate::request::OperationRequest;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// One durable unit of work, constructed fresh for every received message
/// and discarded after settlement.
///
/// Implementations are registered by name in the [`Matcher`](crate::Matcher);
/// the operation handler drives the lifecycle in order: `init`,
/// `guard_concurrency`, `run`.
#[async_trait]
pub trait ApiOperation: Send {
    /// Bind the decoded request to the operation's state and set up any
    /// clients the later phases need.
    async fn init(&mut self, request: OperationRequest) -> Result<(), AsyncError>;

    /// Verify this operation may run against `entity`. This check is the
    /// sole inter-message correctness mechanism: implementations compare the
    /// entity's latest accepted operation id against their own request.
    /// `entity` is `None` when no entity fetcher is configured.
    async fn guard_concurrency(&mut self, entity: Option<&dyn Entity>) -> Result<(), AsyncError>;

    /// Perform the work.
    async fn run(&mut self) -> Result<(), AsyncError>;

    /// The stored request, once `init` has bound it. Hooks and logging read
    /// it; the operation never hands out mutable access.
    fn request(&self) -> Option<&OperationRequest>;
}

impl fmt::Debug for dyn ApiOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("dyn ApiOperation").finish()
    }
}

/// Builds one fresh, zero-valued operation instance per received message.
pub type OperationConstructor = Arc<dyn Fn() -> Box<dyn ApiOperation> + Send + Sync>;
