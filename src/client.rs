use crate::{
    amqp::{configuration::RabbitMqSettings, ConnectionFactory},
    error::SetupError,
    publishers::Publisher,
    table::check_short_string,
    topology::{Exchange, ExchangeConfig, ExchangeKind},
    transport::{Connection, HealthStatus},
};
use std::sync::Arc;

/// A connection to a broker: the entry point to declare exchanges and create publishers.
///
/// Every exchange and every publisher gets its own channel.
///
/// # Example
///
/// ```rust,no_run
/// use amqp_relay::amqp::configuration::RabbitMqSettings;
/// use amqp_relay::client::Client;
/// use amqp_relay::topology::{ExchangeConfig, ExchangeKind};
/// use amqp_relay::transport::WITH_PUBLISHER_CONFIRMATION;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Client::connect(&RabbitMqSettings::default()).await?;
/// let exchange = client
///     .start_exchange("orders", ExchangeKind::Topic, ExchangeConfig::default().durable(true))
///     .await?;
/// let publisher = client
///     .create_publisher::<WITH_PUBLISHER_CONFIRMATION>(exchange.name())
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    connection: Arc<dyn Connection>,
}

impl Client {
    /// Connect to RabbitMq using `settings`.
    pub async fn connect(settings: &RabbitMqSettings) -> Result<Self, SetupError> {
        let factory = ConnectionFactory::new_from_config(settings).map_err(SetupError::Connect)?;
        Self::with_factory(&factory).await
    }

    /// Connect to RabbitMq using a pre-configured [`ConnectionFactory`]
    /// (e.g. with a custom TLS connector).
    pub async fn with_factory(factory: &ConnectionFactory) -> Result<Self, SetupError> {
        let connection = factory
            .new_connection()
            .await
            .map_err(SetupError::Connect)?;
        Ok(Self::from_connection(connection))
    }

    /// Use an already established connection, from any transport.
    pub fn from_connection(connection: impl Connection) -> Self {
        Self {
            connection: Arc::new(connection),
        }
    }

    #[tracing::instrument(name = "rabbitmq_close", skip(self))]
    pub async fn close(&self) -> Result<(), SetupError> {
        self.connection.close().await.map_err(SetupError::Close)
    }

    /// Check that the connection is still alive.
    pub fn ping(&self) -> Result<(), SetupError> {
        match self.connection.status() {
            HealthStatus::Healthy => Ok(()),
            HealthStatus::Unhealthy => Err(SetupError::Disconnected),
        }
    }

    pub fn status(&self) -> HealthStatus {
        self.connection.status()
    }

    /// Open a channel and declare an exchange on it.
    pub async fn start_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        config: ExchangeConfig,
    ) -> Result<Exchange, SetupError> {
        self.ping()?;
        check_short_string("exchange", name)?;
        check_short_string("exchange type", kind.as_str())?;
        config.args.check_keys("arguments")?;
        let channel = self
            .connection
            .open_channel()
            .await
            .map_err(|source| SetupError::OpenChannel {
                exchange: name.to_owned(),
                source,
            })?;
        Exchange::declare(channel, name, kind, &config).await
    }

    /// Open a channel to publish on `exchange_name`.
    ///
    /// With `CONFIRMATION` set, the channel is put in confirmation mode: the broker
    /// acknowledges every message and [`Publisher::publish`] can wait for it.
    /// Use [`WITH_PUBLISHER_CONFIRMATION`] / [`WITHOUT_PUBLISHER_CONFIRMATION`] for readability.
    ///
    /// [`WITH_PUBLISHER_CONFIRMATION`]: crate::transport::WITH_PUBLISHER_CONFIRMATION
    /// [`WITHOUT_PUBLISHER_CONFIRMATION`]: crate::transport::WITHOUT_PUBLISHER_CONFIRMATION
    #[tracing::instrument(name = "rabbitmq_create_publisher", skip(self))]
    pub async fn create_publisher<const CONFIRMATION: bool>(
        &self,
        exchange_name: &str,
    ) -> Result<Publisher<CONFIRMATION>, SetupError> {
        check_short_string("exchange", exchange_name)?;
        let channel = self
            .connection
            .open_channel()
            .await
            .map_err(|source| SetupError::OpenChannel {
                exchange: exchange_name.to_owned(),
                source,
            })?;
        if CONFIRMATION {
            channel
                .enable_confirmations()
                .await
                .map_err(|source| SetupError::EnableConfirmations {
                    exchange: exchange_name.to_owned(),
                    source,
                })?;
        }
        Ok(Publisher::new(exchange_name, channel))
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("status", &self.connection.status())
            .finish()
    }
}
