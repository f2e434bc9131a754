//! Tag poison messages at the exchange level, requeue them from the handler and observe the
//! outcome from a queue-level post-handle middleware.
//!
//! The demo runs against the in-process broker so it needs no RabbitMQ instance:
//!
//! ```bash
//! RUST_LOG=info cargo run --example poison_requeue --features test-util
//! ```
//!
//! To run it against a real broker, replace the `Client::from_connection` call with
//! `Client::connect(&RabbitMqSettings::default())`.
use amqp_relay::{
    consumers::{ConsumeConfig, HandleResponse, HandlingContext},
    message::{Delivery, MessageProperties},
    publishers::PublishConfig,
    table::Table,
    topology::{ExchangeConfig, ExchangeKind, QueueBindConfig},
    transport::memory::MemoryBroker,
    Client, WITH_PUBLISHER_CONFIRMATION,
};
use tracing_subscriber::EnvFilter;

/// Set by the exchange-level middleware, read by everything downstream.
#[derive(Clone, Debug)]
struct Tag(String);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let broker = MemoryBroker::new();
    let client = Client::from_connection(broker.connection());

    // One channel per exchange. Every queue bound through it shares that channel.
    let exchange = client
        .start_exchange(
            "billing",
            ExchangeKind::Direct,
            ExchangeConfig::default().durable(true),
        )
        .await?;
    let queue = exchange
        .bind_queue(
            "billing.invoices",
            "invoice.created",
            QueueBindConfig::default().durable(true),
        )
        .await?;

    // Exchange-level pre-handle middlewares run first, for every queue bound to the exchange.
    exchange.before(|context: &mut HandlingContext, delivery: &mut Delivery| {
        if let Some(tag) = delivery.properties.headers.get_str("tag") {
            context.insert(Tag(tag.to_owned()));
        }
    });

    // Post-handle middlewares observe the verdict but cannot change it.
    queue.after(
        |context: HandlingContext, delivery: &Delivery, response: &HandleResponse| {
            let tag = context.get::<Tag>().map(|tag| tag.0.as_str()).unwrap_or("none");
            tracing::info!(
                delivery_tag = delivery.delivery_tag,
                tag,
                requeued = response.nack,
                "Delivery processed"
            );
        },
    );

    // A nack always asks the broker to requeue, so a poison message comes back flagged as
    // redelivered. The second attempt gives up on it instead of looping forever.
    let handler = |context: HandlingContext, delivery: Delivery| async move {
        if context.get::<Tag>().map(|tag| tag.0.as_str()) == Some("poison") {
            if delivery.redelivered {
                tracing::warn!(body = ?delivery.body_str(), "Dropping a poison message");
                return HandleResponse::ack();
            }
            return HandleResponse::nack()
                .with_error(anyhow::anyhow!("Refusing to process a poison message"));
        }
        tracing::info!(body = ?delivery.body_str(), "Invoice handled");
        HandleResponse::ack()
    };
    let consumer = queue
        .consume(handler, ConsumeConfig::default().exit_after(3))
        .await?;

    let publisher = client
        .create_publisher::<WITH_PUBLISHER_CONFIRMATION>(exchange.name())
        .await?;
    publisher
        .publish(
            "invoice #1",
            "invoice.created",
            PublishConfig::default().wait_confirmation(true),
        )
        .await?;
    publisher
        .publish(
            "invoice #2",
            "invoice.created",
            PublishConfig::default()
                .wait_confirmation(true)
                .with_properties(MessageProperties {
                    headers: Table::new().with("tag", "poison"),
                    ..MessageProperties::default()
                }),
        )
        .await?;

    // The consumer stops on its own after three deliveries: two invoices and one redelivery.
    consumer.join().await?;
    for acknowledgement in broker.acknowledgements() {
        println!("{:?}", acknowledgement);
    }
    client.close().await?;
    Ok(())
}
