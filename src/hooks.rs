//! Before/after hooks around each operation lifecycle phase.
//!
//! Hooks receive the operation as a read-only parameter; the operation never
//! knows its hooks. A hook error short-circuits: in the `before_*` position
//! it skips the inner call and every `after_*`; in the `after_*` position it
//! replaces the outcome and stops the remaining `after_*` hooks.

use crate::entity::Entity;
use crate::error::AsyncError;
use crate::operation::ApiOperation;
use crate::request::OperationRequest;
use async_trait::async_trait;
use std::sync::Arc;

/// Observation and intervention points around an operation's lifecycle.
///
/// Every method defaults to a no-op, so implementations override only the
/// phases they care about.
#[async_trait]
pub trait OperationHook: Send + Sync {
    async fn before_init(&self, _request: &OperationRequest) -> Result<(), AsyncError> {
        Ok(())
    }

    async fn after_init(
        &self,
        _operation: &dyn ApiOperation,
        _request: &OperationRequest,
        _outcome: &Result<(), AsyncError>,
    ) -> Result<(), AsyncError> {
        Ok(())
    }

    async fn before_guard_concurrency(
        &self,
        _operation: &dyn ApiOperation,
        _entity: Option<&dyn Entity>,
    ) -> Result<(), AsyncError> {
        Ok(())
    }

    async fn after_guard_concurrency(
        &self,
        _operation: &dyn ApiOperation,
        _outcome: &Result<(), AsyncError>,
    ) -> Result<(), AsyncError> {
        Ok(())
    }

    async fn before_run(&self, _operation: &dyn ApiOperation) -> Result<(), AsyncError> {
        Ok(())
    }

    async fn after_run(
        &self,
        _operation: &dyn ApiOperation,
        _outcome: &Result<(), AsyncError>,
    ) -> Result<(), AsyncError> {
        Ok(())
    }
}

/// An operation wrapped with an ordered hook list. From the caller's
/// perspective this *is* an [`ApiOperation`].
pub struct HookedOperation {
    operation: Box<dyn ApiOperation>,
    hooks: Vec<Arc<dyn OperationHook>>,
}

impl HookedOperation {
    pub fn new(operation: Box<dyn ApiOperation>, hooks: Vec<Arc<dyn OperationHook>>) -> Self {
        Self { operation, hooks }
    }

    /// Read-only access to the wrapped operation.
    pub fn operation(&self) -> &dyn ApiOperation {
        self.operation.as_ref()
    }
}

#[async_trait]
impl ApiOperation for HookedOperation {
    async fn init(&mut self, request: OperationRequest) -> Result<(), AsyncError> {
        for hook in &self.hooks {
            hook.before_init(&request).await?;
        }
        let outcome = self.operation.init(request.clone()).await;
        for hook in &self.hooks {
            hook.after_init(self.operation.as_ref(), &request, &outcome).await?;
        }
        outcome
    }

    async fn guard_concurrency(&mut self, entity: Option<&dyn Entity>) -> Result<(), AsyncError> {
        for hook in &self.hooks {
            hook.before_guard_concurrency(self.operation.as_ref(), entity).await?;
        }
        let outcome = self.operation.guard_concurrency(entity).await;
        for hook in &self.hooks {
            hook.after_guard_concurrency(self.operation.as_ref(), &outcome).await?;
        }
        outcome
    }

    async fn run(&mut self) -> Result<(), AsyncError> {
        for hook in &self.hooks {
            hook.before_run(self.operation.as_ref()).await?;
        }
        let outcome = self.operation.run().await;
        for hook in &self.hooks {
            hook.after_run(self.operation.as_ref(), &outcome).await?;
        }
        outcome
    }

    fn request(&self) -> Option<&OperationRequest> {
        self.operation.request()
    }
}
