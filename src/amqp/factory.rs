use crate::amqp::{
    channel::LapinConnection,
    configuration::{RabbitMqSettings, RabbitMqTlsSettings},
};
use amq_protocol_types::{AMQPValue, FieldTable};
use anyhow::Context;
use lapin::{
    tcp::{AMQPUriTcpExt, NativeTlsConnector},
    uri::{AMQPScheme, AMQPUri},
    ConnectionProperties,
};
use std::{sync::Arc, time::Duration};

const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything needed to open connections to a RabbitMQ broker.
///
/// Cheap to clone: the TLS connector is shared.
#[derive(Clone)]
pub struct ConnectionFactory {
    uri: AMQPUri,
    connection_timeout: Duration,
    /// `None` means plain TCP.
    tls: Option<Arc<TlsTarget>>,
    locale: Option<String>,
    client_properties: FieldTable,
}

/// A TLS connector and the domain the server certificate must be valid for.
struct TlsTarget {
    connector: NativeTlsConnector,
    domain: String,
}

impl TlsTarget {
    fn from_settings(settings: &RabbitMqTlsSettings, host: String) -> Result<Self, anyhow::Error> {
        let mut builder = NativeTlsConnector::builder();
        if let Some(certificate) = settings.ca_certificate_chain()? {
            builder.add_root_certificate(certificate);
        }
        Ok(Self {
            connector: builder.build().context("TLS configuration failed")?,
            domain: settings.domain.clone().unwrap_or(host),
        })
    }
}

impl ConnectionFactory {
    /// Build a factory from settings.
    ///
    /// The connection timeout defaults to 10 seconds.
    pub fn new_from_config(settings: &RabbitMqSettings) -> Result<Self, anyhow::Error> {
        let uri = settings.amqp_uri();
        let tls = settings
            .tls
            .as_ref()
            .map(|tls| TlsTarget::from_settings(tls, uri.authority.host.clone()))
            .transpose()?
            .map(Arc::new);

        let mut client_properties = FieldTable::default();
        for (key, value) in &settings.client_properties {
            client_properties.insert(
                key.as_str().into(),
                AMQPValue::LongString(value.clone().into()),
            );
        }

        Ok(Self {
            uri,
            connection_timeout: settings
                .connection_timeout()
                .unwrap_or(DEFAULT_CONNECTION_TIMEOUT),
            tls,
            locale: settings.locale.clone(),
            client_properties,
        })
    }

    /// Use `connector` for TLS, checking the server certificate against the URI host.
    pub fn set_tls_connector(&mut self, connector: NativeTlsConnector) {
        let domain = self.uri.authority.host.clone();
        self.set_tls_connector_with_domain(connector, domain);
    }

    pub fn set_tls_connector_with_domain(&mut self, connector: NativeTlsConnector, domain: String) {
        self.tls = Some(Arc::new(TlsTarget { connector, domain }));
    }

    fn connection_properties(&self) -> ConnectionProperties {
        let mut properties =
            ConnectionProperties::default().with_executor(tokio_executor_trait::Tokio::current());
        if let Some(locale) = &self.locale {
            properties.locale = locale.clone();
        }
        for (key, value) in self.client_properties.inner() {
            properties
                .client_properties
                .insert(key.clone(), value.clone());
        }
        properties
    }

    /// Open a new connection, over TLS if the factory has a TLS connector.
    ///
    /// Errors on the established connection are logged at `warn`.
    #[tracing::instrument(name = "rabbitmq_connect", skip(self), fields(host = %self.uri.authority.host))]
    pub async fn new_connection(&self) -> Result<LapinConnection, anyhow::Error> {
        let properties = self.connection_properties();
        let connecting = async {
            match self.tls.clone() {
                Some(tls) => self.connect_with_tls(properties, tls).await,
                None => lapin::Connection::connect_uri(self.uri.clone(), properties).await,
            }
        };
        let connection = tokio::time::timeout(self.connection_timeout, connecting)
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Timed out after {:?} while connecting to RabbitMQ",
                    self.connection_timeout
                )
            })?
            .context("Failed to establish a connection to RabbitMQ")?;

        connection.on_error(|e| {
            tracing::warn!("RabbitMQ broken connection: {:?}", e);
        });
        Ok(LapinConnection::new(connection))
    }

    async fn connect_with_tls(
        &self,
        properties: ConnectionProperties,
        tls: Arc<TlsTarget>,
    ) -> Result<lapin::Connection, lapin::Error> {
        let connect = move |uri: &AMQPUri| {
            // TCP first, then the TLS handshake against the configured domain.
            let mut plain = uri.clone();
            plain.scheme = AMQPScheme::AMQP;
            plain
                .connect()
                .and_then(|tcp| tcp.into_native_tls(&tls.connector, &tls.domain))
        };
        lapin::Connection::connector(self.uri.clone(), Box::new(connect), properties).await
    }
}

impl std::fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("host", &self.uri.authority.host)
            .field("port", &self.uri.authority.port)
            .field("vhost", &self.uri.vhost)
            .field("connection_timeout", &self.connection_timeout)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}
