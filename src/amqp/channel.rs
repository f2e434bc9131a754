//! [`Connection`] and [`Channel`] implemented on top of `lapin`.
use crate::{
    amqp::convenience::{
        basic_consume_options, basic_publish_options, confirmation_from_lapin,
        delivery_from_lapin, exchange_declare_options, exchange_kind_to_lapin, properties_to_basic,
        queue_bind_options, queue_declare_options, table_to_field_table,
    },
    consumers::ConsumeConfig,
    message::Publishing,
    topology::{ExchangeConfig, ExchangeKind, QueueBindConfig},
    transport::{
        Acknowledger, Channel, Connection, DeliveryStream, HealthStatus, InboundDelivery,
        PendingConfirmation, PublishFlags,
    },
};
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicNackOptions, BasicQosOptions, ConfirmSelectOptions,
};
use std::sync::Arc;

/// A `lapin` connection.
pub struct LapinConnection(lapin::Connection);

impl LapinConnection {
    pub fn new(connection: lapin::Connection) -> Self {
        Self(connection)
    }

    pub fn raw(&self) -> &lapin::Connection {
        &self.0
    }
}

#[async_trait::async_trait]
impl Connection for LapinConnection {
    #[tracing::instrument(name = "rabbitmq_create_channel", skip(self))]
    async fn open_channel(&self) -> Result<Arc<dyn Channel>, anyhow::Error> {
        let channel = self.0.create_channel().await?;
        Ok(Arc::new(LapinChannel(channel)))
    }

    async fn close(&self) -> Result<(), anyhow::Error> {
        self.0.close(200, "OK").await?;
        Ok(())
    }

    fn status(&self) -> HealthStatus {
        if self.0.status().connected() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }
}

/// A `lapin` channel.
pub struct LapinChannel(lapin::Channel);

impl LapinChannel {
    /// Get access to the underlying raw channel
    pub fn raw(&self) -> &lapin::Channel {
        &self.0
    }
}

#[async_trait::async_trait]
impl Channel for LapinChannel {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: &ExchangeKind,
        config: &ExchangeConfig,
    ) -> Result<(), anyhow::Error> {
        self.0
            .exchange_declare(
                name,
                exchange_kind_to_lapin(kind),
                exchange_declare_options(config),
                table_to_field_table(&config.args),
            )
            .await?;
        Ok(())
    }

    async fn declare_queue(&self, name: &str, config: &QueueBindConfig) -> Result<(), anyhow::Error> {
        self.0
            .queue_declare(
                name,
                queue_declare_options(config),
                table_to_field_table(&config.args),
            )
            .await?;
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        config: &QueueBindConfig,
    ) -> Result<(), anyhow::Error> {
        self.0
            .queue_bind(
                queue,
                exchange,
                routing_key,
                queue_bind_options(config),
                table_to_field_table(&config.binding_args),
            )
            .await?;
        Ok(())
    }

    async fn set_prefetch(&self, prefetch_count: u16) -> Result<(), anyhow::Error> {
        self.0
            .basic_qos(prefetch_count, BasicQosOptions { global: false })
            .await?;
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        config: &ConsumeConfig,
    ) -> Result<DeliveryStream, anyhow::Error> {
        let consumer = self
            .0
            .basic_consume(
                queue,
                consumer_tag,
                basic_consume_options(config),
                table_to_field_table(&config.args),
            )
            .await?;

        let consumer_tag = consumer_tag.to_owned();
        let stream = consumer.map(move |item| {
            item.map(|delivery| InboundDelivery {
                delivery: delivery_from_lapin(&delivery, &consumer_tag),
                acker: Box::new(LapinAcker(delivery.acker)),
            })
            .map_err(anyhow::Error::from)
        });
        Ok(stream.boxed())
    }

    #[tracing::instrument(name = "rabbitmq_cancel_consumer", skip(self))]
    async fn cancel(&self, consumer_tag: &str) -> Result<(), anyhow::Error> {
        // Waits for cancel-ok: lapin ends the consumer stream once it is received.
        self.0
            .basic_cancel(consumer_tag, BasicCancelOptions { nowait: false })
            .await?;
        Ok(())
    }

    async fn enable_confirmations(&self) -> Result<(), anyhow::Error> {
        // See https://www.rabbitmq.com/amqp-0-9-1-reference.html#confirm.select.nowait
        self.0
            .confirm_select(ConfirmSelectOptions { nowait: false })
            .await?;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        flags: PublishFlags,
        publishing: Publishing,
    ) -> Result<PendingConfirmation, anyhow::Error> {
        let confirm = self
            .0
            .basic_publish(
                exchange,
                routing_key,
                basic_publish_options(flags),
                &publishing.body,
                properties_to_basic(&publishing.properties),
            )
            .await?;
        // Each publish gets its own confirmation future: they cannot be mixed up.
        Ok(PendingConfirmation::new(async move {
            let confirmation = confirm.await?;
            Ok(confirmation_from_lapin(&confirmation))
        }))
    }

    fn status(&self) -> HealthStatus {
        if self.0.status().connected() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }
}

struct LapinAcker(lapin::acker::Acker);

#[async_trait::async_trait]
impl Acknowledger for LapinAcker {
    async fn ack(&self) -> Result<(), anyhow::Error> {
        self.0.ack(BasicAckOptions { multiple: false }).await?;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), anyhow::Error> {
        self.0
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await?;
        Ok(())
    }
}
