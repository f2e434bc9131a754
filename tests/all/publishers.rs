use crate::helpers::{bound_queue, random_name};
use amqp_relay::{
    publishers::{PublishConfig, PublishError},
    transport::{
        memory::{ConfirmPolicy, MemoryBroker, Operation},
        Confirmation, NO_ROUTE,
    },
    Client, SetupError, WITHOUT_PUBLISHER_CONFIRMATION, WITH_PUBLISHER_CONFIRMATION,
};
use serde::Serialize;
use std::{collections::BTreeMap, time::Duration};

#[derive(Serialize)]
struct OrderCreated {
    id: u64,
    amount: u32,
}

#[tokio::test]
async fn publishing_without_confirmation_never_waits() {
    // Arrange
    let fixture = bound_queue().await;
    fixture.broker.set_confirm_policy(ConfirmPolicy::Hold);
    let publisher = fixture
        .client
        .create_publisher::<WITHOUT_PUBLISHER_CONFIRMATION>(fixture.exchange.name())
        .await
        .unwrap();

    // Act
    let result = tokio::time::timeout(
        Duration::from_secs(1),
        publisher.publish("payload", "jobs", PublishConfig::default().wait_confirmation(true)),
    )
    .await
    .expect("Publishing blocked on a confirmation");

    // Assert
    result.unwrap();
    assert!(!publisher.confirms());
    assert_eq!(0, fixture.broker.held_confirmations());
    assert_eq!(1, fixture.broker.pending(fixture.queue.name()));
}

#[tokio::test]
async fn publishing_with_confirmation_waits_for_the_broker() {
    // Arrange
    let fixture = bound_queue().await;
    fixture.broker.set_confirm_policy(ConfirmPolicy::Hold);
    let publisher = fixture
        .client
        .create_publisher::<WITH_PUBLISHER_CONFIRMATION>(fixture.exchange.name())
        .await
        .unwrap();

    // Act
    let publishing = tokio::spawn(async move {
        publisher
            .publish("payload", "jobs", PublishConfig::default().wait_confirmation(true))
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!publishing.is_finished());
    assert!(fixture.broker.release_held(Confirmation::Ack(None)));

    // Assert
    let result = tokio::time::timeout(Duration::from_secs(5), publishing)
        .await
        .expect("Publishing did not complete")
        .unwrap();
    result.unwrap();
}

#[tokio::test]
async fn confirmations_are_not_awaited_unless_requested() {
    // Arrange
    let fixture = bound_queue().await;
    fixture.broker.set_confirm_policy(ConfirmPolicy::Nack);
    let publisher = fixture
        .client
        .create_publisher::<WITH_PUBLISHER_CONFIRMATION>(fixture.exchange.name())
        .await
        .unwrap();

    // Act
    let result = publisher
        .publish("payload", "jobs", PublishConfig::default())
        .await;

    // Assert
    result.unwrap();
}

#[tokio::test]
async fn a_negative_confirmation_is_an_error() {
    // Arrange
    let fixture = bound_queue().await;
    fixture.broker.set_confirm_policy(ConfirmPolicy::Nack);
    let publisher = fixture
        .client
        .create_publisher::<WITH_PUBLISHER_CONFIRMATION>(fixture.exchange.name())
        .await
        .unwrap();

    // Act
    let result = publisher
        .publish("payload", "jobs", PublishConfig::default().wait_confirmation(true))
        .await;

    // Assert
    assert!(matches!(result, Err(PublishError::NegativeAck(_))));
}

#[tokio::test]
async fn a_missing_confirmation_is_an_error() {
    // Arrange
    let fixture = bound_queue().await;
    fixture.broker.set_confirm_policy(ConfirmPolicy::Drop);
    let publisher = fixture
        .client
        .create_publisher::<WITH_PUBLISHER_CONFIRMATION>(fixture.exchange.name())
        .await
        .unwrap();

    // Act
    let result = publisher
        .publish("payload", "jobs", PublishConfig::default().wait_confirmation(true))
        .await;

    // Assert
    assert!(matches!(result, Err(PublishError::MissingConfirmation(_))));
}

#[tokio::test]
async fn concurrent_publishes_get_their_own_confirmation() {
    // Arrange
    let fixture = bound_queue().await;
    fixture.broker.set_confirm_policy(ConfirmPolicy::Hold);
    let publisher = std::sync::Arc::new(
        fixture
            .client
            .create_publisher::<WITH_PUBLISHER_CONFIRMATION>(fixture.exchange.name())
            .await
            .unwrap(),
    );

    // Act
    let first = {
        let publisher = publisher.clone();
        tokio::spawn(async move {
            publisher
                .publish("first", "jobs", PublishConfig::default().wait_confirmation(true))
                .await
        })
    };
    let second = {
        let publisher = publisher.clone();
        tokio::spawn(async move {
            publisher
                .publish("second", "jobs", PublishConfig::default().wait_confirmation(true))
                .await
        })
    };
    while fixture.broker.held_confirmations() < 2 {
        tokio::task::yield_now().await;
    }
    fixture.broker.release_held(Confirmation::Ack(None));
    fixture.broker.release_held(Confirmation::Nack(None));

    // Assert
    let results = [first.await.unwrap(), second.await.unwrap()];
    assert_eq!(1, results.iter().filter(|r| r.is_ok()).count());
    assert_eq!(
        1,
        results
            .iter()
            .filter(|r| matches!(r, Err(PublishError::NegativeAck(_))))
            .count()
    );
}

#[tokio::test]
async fn unroutable_mandatory_messages_are_returned() {
    // Arrange
    let fixture = bound_queue().await;
    let publisher = fixture
        .client
        .create_publisher::<WITH_PUBLISHER_CONFIRMATION>(fixture.exchange.name())
        .await
        .unwrap();

    // Act
    let result = publisher
        .publish(
            "payload",
            "nobody-is-bound-to-this",
            PublishConfig::default()
                .mandatory(true)
                .wait_confirmation(true),
        )
        .await;

    // Assert
    match result {
        Err(PublishError::Returned(returned)) => assert_eq!(NO_ROUTE, returned.reply_code),
        other => panic!("Unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn json_payloads_are_published_with_a_json_content_type() {
    // Arrange
    let fixture = bound_queue().await;
    let publisher = fixture
        .client
        .create_publisher::<WITH_PUBLISHER_CONFIRMATION>(fixture.exchange.name())
        .await
        .unwrap();

    // Act
    publisher
        .publish_json(
            &OrderCreated { id: 7, amount: 1200 },
            "jobs",
            PublishConfig::default()
                .wait_confirmation(true)
                .with_correlation_id("req-1"),
        )
        .await
        .unwrap();

    // Assert
    let published = fixture.broker.published();
    assert_eq!(1, published.len());
    let properties = &published[0].publishing.properties;
    assert_eq!(Some("application/json"), properties.content_type.as_deref());
    assert_eq!(Some("req-1"), properties.correlation_id.as_deref());
    assert_eq!(
        serde_json::json!({ "id": 7, "amount": 1200 }),
        serde_json::from_slice::<serde_json::Value>(&published[0].publishing.body).unwrap()
    );
    assert_eq!(vec![fixture.queue.name().to_owned()], published[0].routed_to);
}

#[tokio::test]
async fn an_explicit_content_type_is_kept_for_json_payloads() {
    // Arrange
    let fixture = bound_queue().await;
    let publisher = fixture
        .client
        .create_publisher::<WITHOUT_PUBLISHER_CONFIRMATION>(fixture.exchange.name())
        .await
        .unwrap();

    // Act
    publisher
        .publish_json(
            &OrderCreated { id: 7, amount: 1200 },
            "jobs",
            PublishConfig::default().with_content_type("application/vnd.orders+json"),
        )
        .await
        .unwrap();

    // Assert
    assert_eq!(
        Some("application/vnd.orders+json"),
        fixture.broker.published()[0]
            .publishing
            .properties
            .content_type
            .as_deref()
    );
}

#[tokio::test]
async fn encoding_failures_happen_before_publishing() {
    // Arrange
    let fixture = bound_queue().await;
    let publisher = fixture
        .client
        .create_publisher::<WITH_PUBLISHER_CONFIRMATION>(fixture.exchange.name())
        .await
        .unwrap();
    // JSON object keys must be strings.
    let payload: BTreeMap<(u8, u8), u8> = BTreeMap::from([((1, 2), 3)]);

    // Act
    let result = publisher
        .publish_json(&payload, "jobs", PublishConfig::default())
        .await;

    // Assert
    assert!(matches!(result, Err(PublishError::Encoding(_))));
    assert!(fixture.broker.published().is_empty());
}

#[tokio::test]
async fn transport_failures_are_distinct_from_confirmation_failures() {
    // Arrange
    let fixture = bound_queue().await;
    let publisher = fixture
        .client
        .create_publisher::<WITH_PUBLISHER_CONFIRMATION>(fixture.exchange.name())
        .await
        .unwrap();
    fixture.broker.fail(Operation::Publish);

    // Act
    let result = publisher
        .publish("payload", "jobs", PublishConfig::default().wait_confirmation(true))
        .await;

    // Assert
    assert!(matches!(result, Err(PublishError::Transport(_))));
}

#[tokio::test]
async fn confirmation_mode_failures_are_reported_at_creation() {
    // Arrange
    let broker = MemoryBroker::new();
    let client = Client::from_connection(broker.connection());
    broker.fail(Operation::EnableConfirmations);
    let exchange_name = random_name();

    // Act
    let result = client
        .create_publisher::<WITH_PUBLISHER_CONFIRMATION>(&exchange_name)
        .await;

    // Assert
    match result {
        Err(error @ SetupError::EnableConfirmations { .. }) => {
            assert!(error
                .to_string()
                .contains("Try using a publisher without confirmation"));
        }
        other => panic!("Unexpected result: {:?}", other),
    }
    assert!(client
        .create_publisher::<WITHOUT_PUBLISHER_CONFIRMATION>(&exchange_name)
        .await
        .is_ok());
}

#[tokio::test]
async fn properties_too_long_for_the_wire_are_rejected_before_publishing() {
    // Arrange
    let fixture = bound_queue().await;
    let publisher = fixture
        .client
        .create_publisher::<WITH_PUBLISHER_CONFIRMATION>(fixture.exchange.name())
        .await
        .unwrap();

    // Act
    let result = publisher
        .publish(
            "payload",
            "jobs",
            PublishConfig::default().with_message_id("x".repeat(300)),
        )
        .await;

    // Assert
    match result {
        Err(PublishError::InvalidMessage(e)) => {
            assert_eq!("message_id", e.field);
            assert_eq!(300, e.len);
        }
        other => panic!("Unexpected result: {:?}", other),
    }
    assert!(fixture.broker.published().is_empty());
}

#[tokio::test]
async fn routing_keys_too_long_for_the_wire_are_rejected_before_publishing() {
    // Arrange
    let fixture = bound_queue().await;
    let publisher = fixture
        .client
        .create_publisher::<WITHOUT_PUBLISHER_CONFIRMATION>(fixture.exchange.name())
        .await
        .unwrap();

    // Act
    let result = publisher
        .publish("payload", &"k".repeat(256), PublishConfig::default())
        .await;

    // Assert
    assert!(matches!(result, Err(PublishError::InvalidMessage(_))));
    assert!(fixture.broker.published().is_empty());
}
