use crate::helpers::random_name;
use amqp_relay::{
    publishers::PublishConfig,
    table::Table,
    topology::{ExchangeConfig, ExchangeKind, QueueBindConfig},
    transport::{
        memory::{Binding, MemoryBroker, Operation},
        HealthStatus, WITHOUT_PUBLISHER_CONFIRMATION,
    },
    Client, SetupError,
};

#[tokio::test]
async fn binding_a_queue_declares_it_and_binds_it_with_the_routing_key() {
    // Arrange
    let broker = MemoryBroker::new();
    let client = Client::from_connection(broker.connection());
    let exchange_name = random_name();
    let queue_name = random_name();

    // Act
    let exchange = client
        .start_exchange(
            &exchange_name,
            ExchangeKind::Topic,
            ExchangeConfig::default().durable(true),
        )
        .await
        .unwrap();
    let queue = exchange
        .bind_queue(
            &queue_name,
            "orders.*",
            QueueBindConfig::default()
                .durable(true)
                .args(Table::new().with("x-max-priority", 10u8)),
        )
        .await
        .unwrap();

    // Assert
    assert_eq!(Some(ExchangeKind::Topic), broker.exchange_kind(&exchange_name));
    assert!(broker.has_queue(&queue_name));
    assert_eq!(
        vec![Binding {
            queue: queue_name.clone(),
            exchange: exchange_name.clone(),
            routing_key: "orders.*".into(),
        }],
        broker.bindings()
    );
    assert_eq!("orders.*", queue.routing_key());
    assert_eq!(exchange_name, queue.exchange().name());
    assert_eq!(HealthStatus::Healthy, exchange.status());
}

#[tokio::test]
async fn topic_exchanges_route_by_pattern() {
    // Arrange
    let broker = MemoryBroker::new();
    let client = Client::from_connection(broker.connection());
    let exchange = client
        .start_exchange(&random_name(), ExchangeKind::Topic, ExchangeConfig::default())
        .await
        .unwrap();
    let eu = exchange
        .bind_queue(&random_name(), "orders.*.eu", QueueBindConfig::default())
        .await
        .unwrap();
    let all = exchange
        .bind_queue(&random_name(), "orders.#", QueueBindConfig::default())
        .await
        .unwrap();
    let publisher = client
        .create_publisher::<WITHOUT_PUBLISHER_CONFIRMATION>(exchange.name())
        .await
        .unwrap();

    // Act
    publisher
        .publish("a", "orders.created.eu", PublishConfig::default())
        .await
        .unwrap();
    publisher
        .publish("b", "orders.created.us", PublishConfig::default())
        .await
        .unwrap();

    // Assert
    assert_eq!(1, broker.pending(eu.name()));
    assert_eq!(2, broker.pending(all.name()));
}

#[tokio::test]
async fn declaration_failures_name_the_failing_entity() {
    // Arrange
    let broker = MemoryBroker::new();
    let client = Client::from_connection(broker.connection());
    let exchange = client
        .start_exchange(&random_name(), ExchangeKind::Direct, ExchangeConfig::default())
        .await
        .unwrap();
    broker.fail(Operation::BindQueue);
    let queue_name = random_name();

    // Act
    let result = exchange
        .bind_queue(&queue_name, "jobs", QueueBindConfig::default())
        .await;

    // Assert
    match result {
        Err(SetupError::BindQueue {
            queue, exchange: e, ..
        }) => {
            assert_eq!(queue_name, queue);
            assert_eq!(exchange.name(), e);
        }
        other => panic!("Unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn redeclaring_an_exchange_with_another_kind_fails() {
    // Arrange
    let broker = MemoryBroker::new();
    let client = Client::from_connection(broker.connection());
    let name = random_name();
    client
        .start_exchange(&name, ExchangeKind::Direct, ExchangeConfig::default())
        .await
        .unwrap();

    // Act
    let result = client
        .start_exchange(&name, ExchangeKind::Fanout, ExchangeConfig::default())
        .await;

    // Assert
    assert!(matches!(result, Err(SetupError::DeclareExchange { .. })));
}

#[tokio::test]
async fn a_closed_client_reports_disconnection() {
    // Arrange
    let broker = MemoryBroker::new();
    let client = Client::from_connection(broker.connection());
    client.ping().unwrap();

    // Act
    client.close().await.unwrap();

    // Assert
    assert!(matches!(client.ping(), Err(SetupError::Disconnected)));
    assert!(matches!(
        client
            .start_exchange(&random_name(), ExchangeKind::Fanout, ExchangeConfig::default())
            .await,
        Err(SetupError::Disconnected)
    ));
}

#[tokio::test]
async fn over_long_names_and_argument_keys_are_rejected_before_reaching_the_broker() {
    // Arrange
    let broker = MemoryBroker::new();
    let client = Client::from_connection(broker.connection());
    let long = "n".repeat(256);

    // Act
    let long_exchange = client
        .start_exchange(&long, ExchangeKind::Direct, ExchangeConfig::default())
        .await;
    let exchange = client
        .start_exchange(&random_name(), ExchangeKind::Direct, ExchangeConfig::default())
        .await
        .unwrap();
    let long_argument_key = exchange
        .bind_queue(
            &random_name(),
            "jobs",
            QueueBindConfig::default().args(Table::new().with(long.as_str(), 1u8)),
        )
        .await;

    // Assert
    assert!(matches!(long_exchange, Err(SetupError::InvalidArgument(_))));
    match long_argument_key {
        Err(SetupError::InvalidArgument(e)) => assert_eq!(256, e.len),
        other => panic!("Unexpected result: {:?}", other),
    }
    assert!(broker.exchange_kind(&long).is_none());
    assert!(broker.bindings().is_empty());
}

#[tokio::test]
async fn a_queue_bound_with_overlapping_patterns_receives_one_copy() {
    // Arrange
    let broker = MemoryBroker::new();
    let client = Client::from_connection(broker.connection());
    let exchange = client
        .start_exchange(&random_name(), ExchangeKind::Topic, ExchangeConfig::default())
        .await
        .unwrap();
    let audit_name = random_name();
    exchange
        .bind_queue(&audit_name, "orders.*", QueueBindConfig::default())
        .await
        .unwrap();
    let orders = exchange
        .bind_queue(&random_name(), "orders.created", QueueBindConfig::default())
        .await
        .unwrap();
    exchange
        .bind_queue(&audit_name, "#", QueueBindConfig::default())
        .await
        .unwrap();
    let publisher = client
        .create_publisher::<WITHOUT_PUBLISHER_CONFIRMATION>(exchange.name())
        .await
        .unwrap();

    // Act
    publisher
        .publish("a", "orders.created", PublishConfig::default())
        .await
        .unwrap();

    // Assert
    assert_eq!(1, broker.pending(&audit_name));
    assert_eq!(1, broker.pending(orders.name()));
}
