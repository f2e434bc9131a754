use crate::helpers::{bound_queue, settled};
use amqp_relay::{
    consumers::{
        get_message_local_item, set_message_local_item, ConsumeConfig, HandleResponse,
        HandlingContext, PostHandle, PreHandle,
    },
    message::{Delivery, MessageProperties},
    table::Table,
    transport::memory::Outcome,
};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

#[derive(Clone, Debug, PartialEq)]
struct Tag(String);

#[derive(Clone, Debug, PartialEq)]
struct Verdict(&'static str);

async fn ack(_: HandlingContext, _: Delivery) -> HandleResponse {
    HandleResponse::ack()
}

#[tokio::test]
async fn poison_messages_are_requeued_and_observed_by_post_handle_middlewares() {
    // Arrange
    let fixture = bound_queue().await;
    let observed = Arc::new(Mutex::new(Vec::new()));

    // Exchange-level: tag the context from a header.
    fixture
        .exchange
        .before(|context: &mut HandlingContext, delivery: &mut Delivery| {
            if let Some(tag) = delivery.properties.headers.get_str("tag") {
                context.insert(Tag(tag.to_owned()));
            }
        });
    // Queue-level: read the tag set by the exchange-level middleware.
    let seen_by_queue = Arc::new(Mutex::new(None));
    let seen = seen_by_queue.clone();
    fixture
        .queue
        .before(move |context: &mut HandlingContext, _: &mut Delivery| {
            *seen.lock() = context.get::<Tag>().cloned();
        });
    let log = observed.clone();
    fixture.queue.after(
        move |_: HandlingContext, delivery: &Delivery, response: &HandleResponse| {
            log.lock().push((delivery.body.clone(), response.nack));
        },
    );
    // Poison messages get a single retry.
    let handler = |context: HandlingContext, delivery: Delivery| async move {
        let poison = context.get::<Tag>().map(|tag| tag.0.as_str()) == Some("poison");
        HandleResponse {
            nack: poison && !delivery.redelivered,
            error: None,
        }
    };
    let properties = MessageProperties {
        headers: Table::new().with("tag", "poison"),
        ..MessageProperties::default()
    };
    let tag = fixture
        .broker
        .deliver_with(fixture.queue.name(), properties, "payload");

    // Act
    let _handle = fixture
        .queue
        .consume(handler, ConsumeConfig::default())
        .await
        .unwrap();
    let acknowledgements = settled(&fixture.broker, 2).await;

    // Assert
    assert_eq!(tag, acknowledgements[0].delivery_tag);
    assert_eq!(Outcome::Nack { requeue: true }, acknowledgements[0].outcome);
    assert_ne!(tag, acknowledgements[1].delivery_tag);
    assert_eq!(Outcome::Ack, acknowledgements[1].outcome);
    assert_eq!(Some(Tag("poison".into())), *seen_by_queue.lock());
    assert_eq!(
        vec![(b"payload".to_vec(), true), (b"payload".to_vec(), false)],
        *observed.lock()
    );
}

#[tokio::test]
async fn middlewares_registered_while_consuming_apply_to_later_deliveries() {
    // Arrange
    let fixture = bound_queue().await;
    let _handle = fixture
        .queue
        .consume(ack, ConsumeConfig::default())
        .await
        .unwrap();
    fixture.broker.deliver(fixture.queue.name(), "before registration");
    settled(&fixture.broker, 1).await;

    // Act
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let counting: Arc<dyn PreHandle> =
        Arc::new(move |_: &mut HandlingContext, _: &mut Delivery| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    fixture.exchange.dyn_before(counting);
    fixture.broker.deliver(fixture.queue.name(), "after registration");
    settled(&fixture.broker, 2).await;

    // Assert
    assert_eq!(1, calls.load(Ordering::SeqCst));
    assert_eq!(1, fixture.exchange.pre_handle_middleware().len());
}

#[tokio::test]
async fn exchange_post_handle_middlewares_see_the_pre_handle_context() {
    // Arrange
    let fixture = bound_queue().await;
    let seen_by_exchange = Arc::new(Mutex::new(None));

    fixture
        .queue
        .before(|context: &mut HandlingContext, _: &mut Delivery| {
            context.insert(Tag("pre-handle".into()));
        });
    // Queue-level post-handle middleware tampering with its own copy.
    fixture
        .queue
        .after(|mut context: HandlingContext, _: &Delivery, _: &HandleResponse| {
            context.insert(Tag("tampered".into()));
        });
    let seen = seen_by_exchange.clone();
    fixture
        .exchange
        .after(move |context: HandlingContext, _: &Delivery, _: &HandleResponse| {
            *seen.lock() = context.get::<Tag>().cloned();
        });
    let handler = |mut context: HandlingContext, _: Delivery| async move {
        context.insert(Tag("handler".into()));
        HandleResponse::ack()
    };
    fixture.broker.deliver(fixture.queue.name(), "payload");

    // Act
    let _handle = fixture
        .queue
        .consume(handler, ConsumeConfig::default())
        .await
        .unwrap();
    settled(&fixture.broker, 1).await;

    // Assert
    assert_eq!(Some(Tag("pre-handle".into())), *seen_by_exchange.lock());
}

#[tokio::test]
async fn post_handle_middlewares_run_queue_level_first() {
    // Arrange
    let fixture = bound_queue().await;
    let order = Arc::new(Mutex::new(Vec::new()));

    let record = |name: &'static str| -> Arc<dyn PostHandle> {
        let order = order.clone();
        Arc::new(move |_: HandlingContext, _: &Delivery, _: &HandleResponse| {
            order.lock().push(name);
        })
    };
    fixture
        .exchange
        .after_many(vec![record("exchange-1"), record("exchange-2")]);
    fixture
        .queue
        .after_many(vec![record("queue-1"), record("queue-2")]);
    fixture.broker.deliver(fixture.queue.name(), "payload");

    // Act
    let _handle = fixture
        .queue
        .consume(ack, ConsumeConfig::default())
        .await
        .unwrap();
    settled(&fixture.broker, 1).await;

    // Assert
    assert_eq!(
        vec!["queue-1", "queue-2", "exchange-1", "exchange-2"],
        *order.lock()
    );
}

#[tokio::test]
async fn message_local_items_flow_from_the_handler_to_post_handle_middlewares() {
    // Arrange
    let fixture = bound_queue().await;
    let seen = Arc::new(Mutex::new(Vec::new()));

    let log = seen.clone();
    fixture
        .exchange
        .after(move |_: HandlingContext, _: &Delivery, _: &HandleResponse| {
            log.lock().push(get_message_local_item::<Verdict>());
        });
    let handler = |_: HandlingContext, delivery: Delivery| async move {
        if delivery.body_str() == Some("first") {
            set_message_local_item(Verdict("rejected by business rules"));
        }
        HandleResponse::ack()
    };
    fixture.broker.deliver(fixture.queue.name(), "first");
    fixture.broker.deliver(fixture.queue.name(), "second");

    // Act
    let _handle = fixture
        .queue
        .consume(handler, ConsumeConfig::default())
        .await
        .unwrap();
    settled(&fixture.broker, 2).await;

    // Assert
    assert_eq!(
        vec![Some(Verdict("rejected by business rules")), None],
        *seen.lock()
    );
}

#[tokio::test]
async fn the_context_is_cancelled_once_the_delivery_is_processed() {
    // Arrange
    let fixture = bound_queue().await;
    let contexts = Arc::new(Mutex::new(Vec::new()));

    let captured = contexts.clone();
    let handler = move |context: HandlingContext, _: Delivery| {
        let captured = captured.clone();
        async move {
            assert!(!context.is_cancelled());
            captured.lock().push(context);
            HandleResponse::ack()
        }
    };
    fixture.broker.deliver(fixture.queue.name(), "payload");

    // Act
    let _handle = fixture
        .queue
        .consume(handler, ConsumeConfig::default())
        .await
        .unwrap();
    settled(&fixture.broker, 1).await;

    // Assert
    let contexts = contexts.lock();
    assert_eq!(1, contexts.len());
    assert!(contexts[0].is_cancelled());
}
