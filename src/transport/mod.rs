//! The boundary between this crate and the AMQP client library doing the actual work.
//!
//! Exchanges, queues, consumers and publishers only ever talk to a broker through
//! [`Connection`] and [`Channel`]. The `lapin`-backed implementation lives in
//! [`amqp`](crate::amqp). `memory` provides an in-process broker for tests and demos, behind
//! the `test-util` feature.
use crate::{
    consumers::ConsumeConfig,
    message::{Delivery, Publishing},
    topology::{ExchangeConfig, ExchangeKind, QueueBindConfig},
};
use futures_util::{future::BoxFuture, stream::BoxStream};
use std::{future::Future, sync::Arc};
use tokio::sync::oneshot;

#[cfg(any(test, feature = "test-util"))]
pub mod memory;

pub const WITH_PUBLISHER_CONFIRMATION: bool = true;
pub const WITHOUT_PUBLISHER_CONFIRMATION: bool = false;

/// AMQP reply code used by the broker when a mandatory message cannot be routed.
pub const NO_ROUTE: u16 = 312;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// A session with the broker, able to open channels.
#[async_trait::async_trait]
pub trait Connection: Send + Sync + 'static {
    async fn open_channel(&self) -> Result<Arc<dyn Channel>, anyhow::Error>;

    async fn close(&self) -> Result<(), anyhow::Error>;

    fn status(&self) -> HealthStatus;
}

/// A logical channel multiplexed on top of a [`Connection`].
///
/// Structural operations (declare/bind) must not be issued concurrently on the same channel.
/// Publishing and consuming may run concurrently.
#[async_trait::async_trait]
pub trait Channel: Send + Sync + 'static {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: &ExchangeKind,
        config: &ExchangeConfig,
    ) -> Result<(), anyhow::Error>;

    async fn declare_queue(&self, name: &str, config: &QueueBindConfig) -> Result<(), anyhow::Error>;

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        config: &QueueBindConfig,
    ) -> Result<(), anyhow::Error>;

    /// Limit the number of unacknowledged deliveries pushed to consumers started afterwards.
    async fn set_prefetch(&self, prefetch_count: u16) -> Result<(), anyhow::Error>;

    /// Subscribe to a queue. The returned stream yields deliveries in arrival order and ends
    /// when the channel (or the connection) is closed.
    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        config: &ConsumeConfig,
    ) -> Result<DeliveryStream, anyhow::Error>;

    /// Cancel the subscription `consumer_tag`.
    ///
    /// The broker stops pushing deliveries to it. Deliveries pushed before the cancellation
    /// are still yielded by the stream and stay unsettled until acked or nacked; the stream
    /// ends after them.
    async fn cancel(&self, consumer_tag: &str) -> Result<(), anyhow::Error>;

    /// Put the channel into confirmation mode: the broker acknowledges every message
    /// published from now on.
    async fn enable_confirmations(&self) -> Result<(), anyhow::Error>;

    /// Hand a message over to the broker.
    ///
    /// `Ok` means the transport accepted the write. Whether the broker routed it is only known
    /// by waiting on the returned [`PendingConfirmation`].
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        flags: PublishFlags,
        publishing: Publishing,
    ) -> Result<PendingConfirmation, anyhow::Error>;

    fn status(&self) -> HealthStatus;
}

/// Ack/nack a single delivery with the broker.
#[async_trait::async_trait]
pub trait Acknowledger: Send + Sync + 'static {
    async fn ack(&self) -> Result<(), anyhow::Error>;

    async fn nack(&self, requeue: bool) -> Result<(), anyhow::Error>;
}

/// A delivery as it comes out of the transport: the message plus the handle to settle it.
pub struct InboundDelivery {
    pub delivery: Delivery,
    pub acker: Box<dyn Acknowledger>,
}

impl std::fmt::Debug for InboundDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundDelivery")
            .field("delivery", &self.delivery)
            .finish_non_exhaustive()
    }
}

/// The ordered stream of deliveries for one consumer subscription.
pub type DeliveryStream = BoxStream<'static, Result<InboundDelivery, anyhow::Error>>;

/// Routing flags for a single publish.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishFlags {
    /// Return the message to the publisher if it cannot be routed to any queue.
    pub mandatory: bool,
    /// Return the message to the publisher if it cannot be delivered to a consumer right away.
    ///
    /// RabbitMQ dropped support for this flag in 3.0 and closes the channel when it is set.
    pub immediate: bool,
}

/// The broker's answer to a published message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Confirmation {
    /// The broker took responsibility for the message. A mandatory message that could not
    /// be routed is acked together with its returned copy.
    Ack(Option<ReturnedMessage>),
    Nack(Option<ReturnedMessage>),
    /// The channel is not in confirmation mode.
    NotRequested,
}

/// A message sent back by the broker because it could not be routed or delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReturnedMessage {
    pub reply_code: u16,
    pub reply_text: String,
}

/// A single-slot signal that resolves once, when the broker confirms (or rejects) one
/// published message.
pub struct PendingConfirmation(BoxFuture<'static, Result<Confirmation, anyhow::Error>>);

impl PendingConfirmation {
    pub fn new<F>(confirmation: F) -> Self
    where
        F: Future<Output = Result<Confirmation, anyhow::Error>> + Send + 'static,
    {
        Self(Box::pin(confirmation))
    }

    /// A confirmation that is already known.
    pub fn resolved(confirmation: Confirmation) -> Self {
        Self::new(futures_util::future::ready(Ok(confirmation)))
    }

    /// Wait on the receiving half of a oneshot channel.
    /// If the sender goes away without answering, the confirmation is reported as missing.
    pub fn from_receiver(receiver: oneshot::Receiver<Confirmation>) -> Self {
        Self::new(async move {
            receiver.await.map_err(|_| {
                anyhow::anyhow!("The confirmation slot was closed before the broker answered")
            })
        })
    }

    pub async fn wait(self) -> Result<Confirmation, anyhow::Error> {
        self.0.await
    }
}

impl std::fmt::Debug for PendingConfirmation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PendingConfirmation")
    }
}
