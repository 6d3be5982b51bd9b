use crate::errors::HandlerError;
use crate::message::MessageEnvelope;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;

/// Trait for processing messages delivered by a [`QueueConsumer`](super::QueueConsumer).
///
/// Returning `Ok` deletes the message. Returning an error leaves it in flight,
/// so it is delivered again once its visibility timeout elapses.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, envelope: MessageEnvelope) -> Result<(), HandlerError>;
}

/// Adapts a function plus shared resources into a [`MessageHandler`].
///
/// # Type Parameters
///
/// * `RFn` - The message handler function type
/// * `Fut` - The future returned by the handler function
/// * `TShared` - The type of shared resources passed to the handler
pub struct FnHandler<RFn, Fut, TShared> {
    rv_fn: RFn,
    shared_resources: TShared,
    _future: PhantomData<fn() -> Fut>,
}

impl<RFn, Fut, TShared> FnHandler<RFn, Fut, TShared>
where
    RFn: Fn(MessageEnvelope, TShared) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    pub fn new(rv_fn: RFn, shared_resources: TShared) -> Self {
        FnHandler {
            rv_fn,
            shared_resources,
            _future: PhantomData,
        }
    }
}

#[async_trait]
impl<RFn, Fut, TShared> MessageHandler for FnHandler<RFn, Fut, TShared>
where
    RFn: Fn(MessageEnvelope, TShared) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    async fn handle(&self, envelope: MessageEnvelope) -> Result<(), HandlerError> {
        (self.rv_fn)(envelope, self.shared_resources.clone()).await
    }
}
