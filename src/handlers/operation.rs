//! The innermost layer: decode, match, and drive the operation lifecycle.

use super::Handler;
use crate::broker::{ReceivedMessage, Settler};
use crate::codec::Codec;
use crate::entity::{Entity, EntityFetcher};
use crate::error::AsyncError;
use crate::hooks::OperationHook;
use crate::matcher::Matcher;
use crate::operation::ApiOperation;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

/// Decode → match → init → fetch entity → guard concurrency → run → complete.
///
/// Failures at any step abort the remaining steps and surface to the
/// classification layer above. Decode and lookup failures are non-retryable;
/// everything else keeps whatever classification the operation chose.
pub struct OperationHandler {
    matcher: Arc<Matcher>,
    codec: Arc<dyn Codec>,
    hooks: Vec<Arc<dyn OperationHook>>,
    entity_fetcher: Option<Arc<dyn EntityFetcher>>,
}

impl OperationHandler {
    pub fn new(matcher: Arc<Matcher>, codec: Arc<dyn Codec>) -> Self {
        Self { matcher, codec, hooks: Vec::new(), entity_fetcher: None }
    }

    pub fn with_hooks(mut self, hooks: Vec<Arc<dyn OperationHook>>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_entity_fetcher(mut self, fetcher: Arc<dyn EntityFetcher>) -> Self {
        self.entity_fetcher = Some(fetcher);
        self
    }
}

#[async_trait]
impl Handler for OperationHandler {
    async fn handle(
        &self,
        message: &ReceivedMessage,
        settler: &dyn Settler,
    ) -> Result<(), AsyncError> {
        let request = match self.codec.decode(&message.body) {
            Ok(request) => request,
            Err(e) => {
                error!(message_id = %message.message_id, error = %e, "message body does not decode");
                return Err(AsyncError::non_retry("message body does not decode")
                    .with_context(format!("decoding operation request: {e}")));
            }
        };

        if request.is_expired(Utc::now()) {
            error!(operation_id = %request.operation_id, "operation expired before execution");
            return Err(AsyncError::non_retry("operation expired before execution"));
        }

        let mut operation = match self
            .matcher
            .create_hooked(&request.operation_name, self.hooks.clone())
        {
            Ok(operation) => operation,
            Err(e) => {
                error!(
                    operation_name = %request.operation_name,
                    error = %e,
                    "operation is not registered in the matcher"
                );
                return Err(AsyncError::non_retry("unknown operation")
                    .with_context(format!("creating operation instance: {e}")));
            }
        };

        operation.init(request.clone()).await?;

        let entity = match &self.entity_fetcher {
            Some(fetcher) => Some(fetcher.get(&request).await?),
            None => None,
        };
        let entity_ref: Option<&dyn Entity> = entity.as_deref();

        operation.guard_concurrency(entity_ref).await?;

        operation.run().await?;

        settler.complete(message).await.map_err(|e| {
            error!(message_id = %message.message_id, error = %e, "completing message at the broker");
            AsyncError::other("completing message at the broker", e)
        })?;

        info!(operation_id = %request.operation_id, "operation ran successfully");
        Ok(())
    }
}
