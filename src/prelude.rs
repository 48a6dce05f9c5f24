//! Convenient re-exports for common workbus types.
pub use crate::{
    publish_request, ApiOperation, AsyncError, Backoff, BrokerClient, BrokerError, Codec, Entity,
    EntityFetcher, ErrorKind, Handler, HookedOperation, InMemoryBroker, InMemoryStatusStore,
    Jitter, JsonCodec, Matcher, MatcherError, Message, NonRetryError, OperationHook,
    OperationRequest, OperationStatus, Processor, ProcessorOptions, QosEvent, QosOutcome,
    ReceivedMessage, Receiver, RetryError, RetryPolicy, Sender, Settler, StatusStore,
    StatusStoreError,
};
