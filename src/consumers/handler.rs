//! The `Handler` trait is heavily inspired by `tide`'s approach to endpoint handlers.
use crate::{consumers::HandlingContext, message::Delivery};
use std::future::Future;

/// Implementers of the `Handler` trait process the messages consumed from a queue.
///
/// # Scope
///
/// `handle` does not get access to the underlying channel.
/// The consumption loop takes care of acking/nacking the message with the broker according
/// to the returned [`HandleResponse`].
///
/// # Implementers
///
/// While you can implement `Handler` for a struct or enum, most of the time you will be relying
/// on our implementation of `Handler` for async functions that have a matching signature -
/// `Fn(HandlingContext, Delivery) -> Fut`.
///
/// ```rust
/// use amqp_relay::consumers::{HandleResponse, HandlingContext};
/// use amqp_relay::message::Delivery;
///
/// async fn handle(_context: HandlingContext, delivery: Delivery) -> HandleResponse {
///     match delivery.body_str() {
///         Some(_) => HandleResponse::ack(),
///         None => HandleResponse::nack().with_error(anyhow::anyhow!("The body is not UTF-8")),
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, context: HandlingContext, delivery: Delivery) -> HandleResponse;
}

#[async_trait::async_trait]
impl<F, Fut> Handler for F
where
    F: Send + Sync + 'static + Fn(HandlingContext, Delivery) -> Fut,
    Fut: Future<Output = HandleResponse> + Send + 'static,
{
    async fn handle(&self, context: HandlingContext, delivery: Delivery) -> HandleResponse {
        (self)(context, delivery).await
    }
}

/// The verdict of a [`Handler`] on a delivery.
///
/// Only `nack` drives what happens to the message: when set, the delivery is negatively
/// acknowledged and the broker is asked to requeue it; otherwise it is acknowledged.
///
/// `error` is informational. It is handed to post-handle middlewares (e.g. for logging or
/// metrics) but it is never inspected by the consumption loop: a response carrying an error
/// with `nack` unset is acknowledged.
#[derive(Debug, Default)]
pub struct HandleResponse {
    pub nack: bool,
    pub error: Option<anyhow::Error>,
}

impl HandleResponse {
    /// Acknowledge the delivery.
    pub fn ack() -> Self {
        Self::default()
    }

    /// Negatively acknowledge the delivery, asking the broker to requeue it.
    pub fn nack() -> Self {
        Self {
            nack: true,
            error: None,
        }
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<anyhow::Error>) -> Self {
        self.error = Some(error.into());
        self
    }
}
