use crate::{
    consumers::{HandleResponse, HandlingContext},
    message::Delivery,
};
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Logic executed before a delivery reaches the handler.
///
/// Pre-handle middlewares run in registration order: all the exchange-level ones first, then
/// the queue-level ones. Each of them gets mutable access to the handling context and to the
/// working copy of the delivery, so it can enrich the former (e.g. extract a tenant id from a
/// header) or rewrite the latter (e.g. decompress the body) before the handler sees them.
///
/// Middlewares cannot fail. A middleware that needs to signal a problem must do so through the
/// context (or message-local storage) so that later middlewares and the handler can react to it.
///
/// Any `Fn(&mut HandlingContext, &mut Delivery)` closure is a pre-handle middleware.
#[async_trait::async_trait]
pub trait PreHandle: Send + Sync + 'static {
    async fn before(&self, context: &mut HandlingContext, delivery: &mut Delivery);
}

#[async_trait::async_trait]
impl<F> PreHandle for F
where
    F: Fn(&mut HandlingContext, &mut Delivery) + Send + Sync + 'static,
{
    async fn before(&self, context: &mut HandlingContext, delivery: &mut Delivery) {
        (self)(context, delivery)
    }
}

/// Logic executed after the handler has returned.
///
/// Post-handle middlewares run in registration order: all the queue-level ones first, then
/// the exchange-level ones. Each of them receives its own copy of the context as it stood when
/// pre-handle middlewares completed, together with the delivery and the handler's response.
/// Nothing they do can change whether the delivery is acked or nacked.
///
/// Any `Fn(HandlingContext, &Delivery, &HandleResponse)` closure is a post-handle middleware.
#[async_trait::async_trait]
pub trait PostHandle: Send + Sync + 'static {
    async fn after(&self, context: HandlingContext, delivery: &Delivery, response: &HandleResponse);
}

#[async_trait::async_trait]
impl<F> PostHandle for F
where
    F: Fn(HandlingContext, &Delivery, &HandleResponse) + Send + Sync + 'static,
{
    async fn after(&self, context: HandlingContext, delivery: &Delivery, response: &HandleResponse) {
        (self)(context, delivery, response)
    }
}

/// The pre-handle and post-handle middlewares registered on an exchange or on a queue.
///
/// Registration appends and never reorders. Readers take a snapshot at the beginning of each
/// pipeline pass: a middleware registered while consumption is ongoing applies to every
/// delivery whose pass starts afterwards.
#[derive(Default)]
pub(crate) struct MiddlewareChain {
    before: ArcSwap<Vec<Arc<dyn PreHandle>>>,
    after: ArcSwap<Vec<Arc<dyn PostHandle>>>,
}

impl MiddlewareChain {
    pub(crate) fn append_before<I>(&self, middlewares: I)
    where
        I: IntoIterator<Item = Arc<dyn PreHandle>>,
    {
        let middlewares: Vec<_> = middlewares.into_iter().collect();
        self.before.rcu(|current| {
            let mut updated = Vec::clone(current);
            updated.extend(middlewares.iter().cloned());
            updated
        });
    }

    pub(crate) fn append_after<I>(&self, middlewares: I)
    where
        I: IntoIterator<Item = Arc<dyn PostHandle>>,
    {
        let middlewares: Vec<_> = middlewares.into_iter().collect();
        self.after.rcu(|current| {
            let mut updated = Vec::clone(current);
            updated.extend(middlewares.iter().cloned());
            updated
        });
    }

    pub(crate) fn before(&self) -> Arc<Vec<Arc<dyn PreHandle>>> {
        self.before.load_full()
    }

    pub(crate) fn after(&self) -> Arc<Vec<Arc<dyn PostHandle>>> {
        self.after.load_full()
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("before", &self.before.load().len())
            .field("after", &self.after.load().len())
            .finish()
    }
}
