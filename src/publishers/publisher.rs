use crate::{
    message::Publishing,
    publishers::PublishConfig,
    table::{check_short_string, ShortStringTooLong},
    transport::{Channel, Confirmation, HealthStatus, ReturnedMessage},
};
use serde::Serialize;
use std::sync::Arc;

/// Publishes messages to a single exchange over a dedicated channel.
///
/// Whether the channel is in confirmation mode is decided when the publisher is created (see
/// [`Client::create_publisher`]) and encoded in its type: `Publisher<true>` can wait for the
/// broker to confirm each message, `Publisher<false>` cannot.
///
/// # Concurrency
///
/// Each call to [`Publisher::publish`] gets its own confirmation from the transport, so a
/// publisher can be shared across tasks publishing concurrently.
///
/// [`Client::create_publisher`]: crate::client::Client::create_publisher
pub struct Publisher<const CONFIRMATION: bool> {
    exchange_name: String,
    channel: Arc<dyn Channel>,
}

/// Error returned when trying to publish a message using [`Publisher`].
#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    #[error("Failed to encode the message payload")]
    Encoding(#[source] serde_json::Error),
    /// Nothing was sent: the message cannot be represented on the wire.
    #[error("The message cannot be published as is")]
    InvalidMessage(#[source] ShortStringTooLong),
    #[error("Failed to publish message")]
    Transport(#[source] anyhow::Error),
    #[error("The server did not acknowledge the message publishing")]
    NegativeAck(Option<ReturnedMessage>),
    #[error("The server did not confirm the message publishing")]
    MissingConfirmation(#[source] anyhow::Error),
    #[error("The message could not be routed: {0:?}")]
    Returned(ReturnedMessage),
}

impl<const CONFIRMATION: bool> Publisher<CONFIRMATION> {
    pub(crate) fn new(exchange_name: &str, channel: Arc<dyn Channel>) -> Self {
        Self {
            exchange_name: exchange_name.to_owned(),
            channel,
        }
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    /// Whether the underlying channel is in confirmation mode.
    pub fn confirms(&self) -> bool {
        CONFIRMATION
    }

    pub fn status(&self) -> HealthStatus {
        self.channel.status()
    }

    /// Publish a message to the exchange.
    ///
    /// When the publisher was created with confirmation and `config.wait_confirmation` is set,
    /// the call only returns once the broker has confirmed (or rejected) the message. No
    /// timeout is enforced: wrap the call in [`tokio::time::timeout`] if you need one.
    /// Otherwise it returns as soon as the transport has accepted the message.
    #[tracing::instrument(
        name = "rabbitmq_publish",
        skip(self, body, config),
        fields(exchange = %self.exchange_name),
        level = "debug"
    )]
    pub async fn publish(
        &self,
        body: impl Into<Vec<u8>>,
        routing_key: &str,
        config: PublishConfig,
    ) -> Result<(), PublishError> {
        check_short_string("routing_key", routing_key)
            .and_then(|()| config.properties.check_short_strings())
            .map_err(PublishError::InvalidMessage)?;
        let flags = config.flags();
        let publishing = Publishing {
            properties: config.properties,
            body: body.into(),
        };
        let pending = self
            .channel
            .publish(&self.exchange_name, routing_key, flags, publishing)
            .await
            .map_err(PublishError::Transport)?;

        if !(CONFIRMATION && config.wait_confirmation) {
            return Ok(());
        }
        match pending.wait().await {
            Ok(Confirmation::Ack(None)) => Ok(()),
            Ok(Confirmation::Ack(Some(returned))) => Err(PublishError::Returned(returned)),
            Ok(Confirmation::Nack(returned)) => Err(PublishError::NegativeAck(returned)),
            Ok(Confirmation::NotRequested) => Err(PublishError::MissingConfirmation(
                anyhow::anyhow!("The channel is not in confirmation mode"),
            )),
            Err(e) => Err(PublishError::MissingConfirmation(e)),
        }
    }

    /// Encode `payload` as JSON and publish it, see [`Publisher::publish`].
    ///
    /// Encoding failures are reported before anything is sent to the broker.
    /// The content type defaults to `application/json` if `config` does not set one.
    pub async fn publish_json<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        routing_key: &str,
        mut config: PublishConfig,
    ) -> Result<(), PublishError> {
        let body = serde_json::to_vec(payload).map_err(PublishError::Encoding)?;
        config
            .properties
            .content_type
            .get_or_insert_with(|| "application/json".to_owned());
        self.publish(body, routing_key, config).await
    }
}

impl<const CONFIRMATION: bool> std::fmt::Debug for Publisher<CONFIRMATION> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("exchange_name", &self.exchange_name)
            .field("confirms", &CONFIRMATION)
            .finish()
    }
}
