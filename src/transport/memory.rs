//! An in-process broker implementing the transport traits.
//!
//! `MemoryBroker` routes publishes through the exchanges and bindings it has been told
//! about, pushes deliveries to consumers in arrival order and records every ack/nack, so
//! that the consumption pipeline and the publish path can be exercised without RabbitMq.
//!
//! Deliveries pushed to a consumer stay unsettled until they are acked or nacked. A nack with
//! `requeue = true` puts the message back at the head of its queue, flagged as redelivered and
//! with a new delivery tag. As with RabbitMQ, cancelling a consumer does not requeue what it
//! already received; closing the connection does.
//!
//! It is deliberately small:
//! - deliveries are spread round-robin across the consumers of a queue;
//! - the headers exchange routes like a fanout exchange.
//!
//! Only available with the `test-util` feature.
use crate::{
    consumers::ConsumeConfig,
    message::{Delivery, MessageProperties, Publishing},
    topology::{ExchangeConfig, ExchangeKind, QueueBindConfig},
    transport::{
        Acknowledger, Channel, Confirmation, Connection, DeliveryStream, HealthStatus,
        InboundDelivery, PendingConfirmation, PublishFlags, ReturnedMessage, NO_ROUTE,
    },
};
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::sync::{mpsc, oneshot, Notify};

/// A broker operation that can be made to fail with [`MemoryBroker::fail`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    OpenChannel,
    DeclareExchange,
    DeclareQueue,
    BindQueue,
    SetPrefetch,
    Consume,
    Cancel,
    EnableConfirmations,
    Publish,
    Acknowledge,
}

/// How the broker answers messages published on a channel in confirmation mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConfirmPolicy {
    /// Confirm right away.
    #[default]
    Ack,
    /// Reject right away.
    Nack,
    /// Keep the confirmation pending until [`MemoryBroker::release_held`] is called.
    Hold,
    /// Close the confirmation slot without answering.
    Drop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Ack,
    Nack { requeue: bool },
}

/// An ack or nack received by the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Acknowledgement {
    pub delivery_tag: u64,
    pub outcome: Outcome,
}

/// A message accepted by the broker, with the queues it was routed to.
#[derive(Clone, Debug, PartialEq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub flags: PublishFlags,
    pub publishing: Publishing,
    pub routed_to: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

type DeliverySender = mpsc::UnboundedSender<Result<Delivery, anyhow::Error>>;

struct Subscriber {
    consumer_tag: String,
    /// Deliveries pushed to this subscriber are settled on the spot.
    auto_ack: bool,
    sender: DeliverySender,
}

/// A delivery pushed to a consumer and not settled yet.
struct Unacked {
    queue: String,
    delivery: Delivery,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Delivery>,
    subscribers: Vec<Subscriber>,
    next_subscriber: usize,
}

struct BrokerState {
    exchanges: HashMap<String, ExchangeKind>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<Binding>,
    published: Vec<PublishedMessage>,
    acknowledgements: Vec<Acknowledgement>,
    unacked: HashMap<u64, Unacked>,
    next_delivery_tag: u64,
    confirm_policy: ConfirmPolicy,
    held: VecDeque<oneshot::Sender<Confirmation>>,
    failures: HashSet<Operation>,
    prefetch_count: Option<u16>,
    closed: bool,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            exchanges: HashMap::new(),
            queues: HashMap::new(),
            bindings: Vec::new(),
            published: Vec::new(),
            acknowledgements: Vec::new(),
            unacked: HashMap::new(),
            next_delivery_tag: 1,
            confirm_policy: ConfirmPolicy::default(),
            held: VecDeque::new(),
            failures: HashSet::new(),
            prefetch_count: None,
            closed: false,
        }
    }
}

impl BrokerState {
    fn check(&self, operation: Operation) -> Result<(), anyhow::Error> {
        if self.closed {
            anyhow::bail!("The connection to the broker is closed");
        }
        if self.failures.contains(&operation) {
            anyhow::bail!("The broker rejected the {:?} operation", operation);
        }
        Ok(())
    }

    fn next_tag(&mut self) -> u64 {
        let delivery_tag = self.next_delivery_tag;
        self.next_delivery_tag += 1;
        delivery_tag
    }

    /// Assign the next delivery tag and append the message to the queue.
    fn enqueue(&mut self, queue: &str, mut delivery: Delivery) -> u64 {
        let delivery_tag = self.next_tag();
        delivery.delivery_tag = delivery_tag;

        let state = self.queues.entry(queue.to_owned()).or_default();
        state.pending.push_back(delivery);
        delivery_tag
    }

    /// Put an unsettled delivery back at the head of its queue, under a new tag.
    fn requeue(&mut self, unacked: Unacked) {
        let Unacked {
            queue,
            mut delivery,
        } = unacked;
        delivery.delivery_tag = self.next_tag();
        delivery.redelivered = true;
        delivery.consumer_tag.clear();
        if let Some(state) = self.queues.get_mut(&queue) {
            state.pending.push_front(delivery);
        }
    }

    fn route(&self, exchange: &str, routing_key: &str) -> Result<Vec<String>, anyhow::Error> {
        if exchange.is_empty() {
            return Ok(self
                .queues
                .contains_key(routing_key)
                .then(|| vec![routing_key.to_owned()])
                .unwrap_or_default());
        }
        let kind = self
            .exchanges
            .get(exchange)
            .ok_or_else(|| anyhow::anyhow!("NOT_FOUND - no exchange '{}'", exchange))?;
        let mut queues: Vec<String> = self
            .bindings
            .iter()
            .filter(|binding| binding.exchange == exchange)
            .filter(|binding| match kind {
                ExchangeKind::Fanout | ExchangeKind::Headers => true,
                ExchangeKind::Topic => topic_matches(&binding.routing_key, routing_key),
                ExchangeKind::Direct | ExchangeKind::Custom(_) => {
                    binding.routing_key == routing_key
                }
            })
            .map(|binding| binding.queue.clone())
            .collect();
        // A queue bound with several matching keys still gets a single copy.
        let mut seen = HashSet::new();
        queues.retain(|queue| seen.insert(queue.clone()));
        Ok(queues)
    }
}

/// An in-memory broker. Clones share the same state.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    acknowledged: Arc<Notify>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            acknowledged: Arc::new(Notify::new()),
        }
    }

    /// A new connection to this broker.
    pub fn connection(&self) -> MemoryConnection {
        MemoryConnection {
            broker: self.clone(),
        }
    }

    /// Put a message straight into a queue, bypassing exchanges. Returns its delivery tag.
    pub fn deliver(&self, queue: &str, body: impl Into<Vec<u8>>) -> u64 {
        self.deliver_with(queue, MessageProperties::default(), body)
    }

    pub fn deliver_with(
        &self,
        queue: &str,
        properties: MessageProperties,
        body: impl Into<Vec<u8>>,
    ) -> u64 {
        let delivery = Delivery {
            routing_key: queue.to_owned(),
            properties,
            body: body.into(),
            ..Delivery::default()
        };
        let mut state = self.state.lock();
        let delivery_tag = state.enqueue(queue, delivery);
        dispatch(&mut state, queue);
        delivery_tag
    }

    /// End the delivery stream of every consumer of `queue`.
    pub fn close_queue(&self, queue: &str) {
        if let Some(state) = self.state.lock().queues.get_mut(queue) {
            state.subscribers.clear();
        }
    }

    /// Push a transport error into the delivery stream of every consumer of `queue`, then
    /// end their streams.
    pub fn fail_stream(&self, queue: &str) {
        if let Some(state) = self.state.lock().queues.get_mut(queue) {
            for subscriber in state.subscribers.drain(..) {
                let _ = subscriber
                    .sender
                    .send(Err(anyhow::anyhow!("The channel was closed by the broker")));
            }
        }
    }

    /// Close every connection: channels turn unhealthy, delivery streams end and unsettled
    /// deliveries go back to their queues.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        for queue in state.queues.values_mut() {
            queue.subscribers.clear();
        }
        state.held.clear();

        let mut unacked: Vec<Unacked> = state.unacked.drain().map(|(_, unacked)| unacked).collect();
        // Highest tag first, so that every queue ends up in its original order.
        unacked.sort_by_key(|unacked| std::cmp::Reverse(unacked.delivery.delivery_tag));
        for unacked in unacked {
            state.requeue(unacked);
        }
    }

    /// Make every future call to `operation` fail.
    pub fn fail(&self, operation: Operation) {
        self.state.lock().failures.insert(operation);
    }

    pub fn recover(&self, operation: Operation) {
        self.state.lock().failures.remove(&operation);
    }

    pub fn set_confirm_policy(&self, policy: ConfirmPolicy) {
        self.state.lock().confirm_policy = policy;
    }

    /// Answer the oldest confirmation held back by [`ConfirmPolicy::Hold`].
    /// Returns `false` if no confirmation was pending.
    pub fn release_held(&self, confirmation: Confirmation) -> bool {
        let sender = self.state.lock().held.pop_front();
        match sender {
            Some(sender) => sender.send(confirmation).is_ok(),
            None => false,
        }
    }

    pub fn held_confirmations(&self) -> usize {
        self.state.lock().held.len()
    }

    pub fn acknowledgements(&self) -> Vec<Acknowledgement> {
        self.state.lock().acknowledgements.clone()
    }

    /// Wait until at least `count` acks/nacks have been received, then return all of them.
    pub async fn wait_for_acknowledgements(&self, count: usize) -> Vec<Acknowledgement> {
        loop {
            let notified = self.acknowledged.notified();
            {
                let state = self.state.lock();
                if state.acknowledgements.len() >= count {
                    return state.acknowledgements.clone();
                }
            }
            notified.await;
        }
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().published.clone()
    }

    pub fn exchange_kind(&self, exchange: &str) -> Option<ExchangeKind> {
        self.state.lock().exchanges.get(exchange).cloned()
    }

    pub fn has_queue(&self, queue: &str) -> bool {
        self.state.lock().queues.contains_key(queue)
    }

    pub fn bindings(&self) -> Vec<Binding> {
        self.state.lock().bindings.clone()
    }

    /// Messages waiting in `queue` for a consumer.
    pub fn pending(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|state| state.pending.len())
            .unwrap_or_default()
    }

    /// Messages of `queue` pushed to a consumer and neither acked nor nacked yet.
    pub fn unsettled(&self, queue: &str) -> usize {
        self.state
            .lock()
            .unacked
            .values()
            .filter(|unacked| unacked.queue == queue)
            .count()
    }

    pub fn consumer_tags(&self, queue: &str) -> Vec<String> {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|state| {
                state
                    .subscribers
                    .iter()
                    .map(|subscriber| subscriber.consumer_tag.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The last prefetch count requested on any channel.
    pub fn prefetch_count(&self) -> Option<u16> {
        self.state.lock().prefetch_count
    }

    fn record_acknowledgement(&self, acknowledgement: Acknowledgement) -> Result<(), anyhow::Error> {
        {
            let mut state = self.state.lock();
            state.check(Operation::Acknowledge)?;
            let unacked = state
                .unacked
                .remove(&acknowledgement.delivery_tag)
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "PRECONDITION_FAILED - unknown delivery tag {}",
                        acknowledgement.delivery_tag
                    )
                })?;
            state.acknowledgements.push(acknowledgement);
            if acknowledgement.outcome == (Outcome::Nack { requeue: true }) {
                let queue = unacked.queue.clone();
                state.requeue(unacked);
                dispatch(&mut state, &queue);
            }
        }
        self.acknowledged.notify_waiters();
        Ok(())
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryBroker")
            .field("exchanges", &state.exchanges.len())
            .field("queues", &state.queues.len())
            .field("published", &state.published.len())
            .field("acknowledgements", &state.acknowledgements.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// Hand pending messages of `queue` to its consumers, round-robin.
/// Consumers whose stream has been dropped are forgotten.
fn dispatch(state: &mut BrokerState, queue: &str) {
    let Some(queue_state) = state.queues.get_mut(queue) else {
        return;
    };
    while !queue_state.subscribers.is_empty() {
        let Some(mut delivery) = queue_state.pending.pop_front() else {
            return;
        };
        let index = queue_state.next_subscriber % queue_state.subscribers.len();
        let subscriber = &queue_state.subscribers[index];
        delivery.consumer_tag = subscriber.consumer_tag.clone();
        let unacked = (!subscriber.auto_ack).then(|| Unacked {
            queue: queue.to_owned(),
            delivery: delivery.clone(),
        });
        match subscriber.sender.send(Ok(delivery)) {
            Ok(()) => {
                queue_state.next_subscriber = index + 1;
                if let Some(unacked) = unacked {
                    state.unacked.insert(unacked.delivery.delivery_tag, unacked);
                }
            }
            Err(mpsc::error::SendError(rejected)) => {
                queue_state.subscribers.remove(index);
                if let Ok(rejected) = rejected {
                    queue_state.pending.push_front(rejected);
                }
            }
        }
    }
}

pub struct MemoryConnection {
    broker: MemoryBroker,
}

#[async_trait::async_trait]
impl Connection for MemoryConnection {
    async fn open_channel(&self) -> Result<Arc<dyn Channel>, anyhow::Error> {
        self.broker.state.lock().check(Operation::OpenChannel)?;
        Ok(Arc::new(MemoryChannel {
            broker: self.broker.clone(),
            confirms: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), anyhow::Error> {
        self.broker.shutdown();
        Ok(())
    }

    fn status(&self) -> HealthStatus {
        health(&self.broker)
    }
}

fn health(broker: &MemoryBroker) -> HealthStatus {
    if broker.state.lock().closed {
        HealthStatus::Unhealthy
    } else {
        HealthStatus::Healthy
    }
}

pub struct MemoryChannel {
    broker: MemoryBroker,
    confirms: AtomicBool,
}

#[async_trait::async_trait]
impl Channel for MemoryChannel {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: &ExchangeKind,
        _config: &ExchangeConfig,
    ) -> Result<(), anyhow::Error> {
        let mut state = self.broker.state.lock();
        state.check(Operation::DeclareExchange)?;
        if let Some(existing) = state.exchanges.get(name) {
            if existing != kind {
                anyhow::bail!(
                    "PRECONDITION_FAILED - inequivalent arg 'type' for exchange '{}'",
                    name
                );
            }
        }
        state.exchanges.insert(name.to_owned(), kind.clone());
        Ok(())
    }

    async fn declare_queue(&self, name: &str, _config: &QueueBindConfig) -> Result<(), anyhow::Error> {
        let mut state = self.broker.state.lock();
        state.check(Operation::DeclareQueue)?;
        state.queues.entry(name.to_owned()).or_default();
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        _config: &QueueBindConfig,
    ) -> Result<(), anyhow::Error> {
        let mut state = self.broker.state.lock();
        state.check(Operation::BindQueue)?;
        if !state.exchanges.contains_key(exchange) {
            anyhow::bail!("NOT_FOUND - no exchange '{}'", exchange);
        }
        if !state.queues.contains_key(queue) {
            anyhow::bail!("NOT_FOUND - no queue '{}'", queue);
        }
        let binding = Binding {
            queue: queue.to_owned(),
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
        };
        if !state.bindings.contains(&binding) {
            state.bindings.push(binding);
        }
        Ok(())
    }

    async fn set_prefetch(&self, prefetch_count: u16) -> Result<(), anyhow::Error> {
        let mut state = self.broker.state.lock();
        state.check(Operation::SetPrefetch)?;
        state.prefetch_count = Some(prefetch_count);
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        config: &ConsumeConfig,
    ) -> Result<DeliveryStream, anyhow::Error> {
        let (sender, receiver) = mpsc::unbounded_channel();
        {
            let mut state = self.broker.state.lock();
            state.check(Operation::Consume)?;
            let queue_state = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| anyhow::anyhow!("NOT_FOUND - no queue '{}'", queue))?;
            queue_state.subscribers.push(Subscriber {
                consumer_tag: consumer_tag.to_owned(),
                auto_ack: config.auto_ack,
                sender,
            });
            dispatch(&mut state, queue);
        }

        let broker = self.broker.clone();
        let stream = futures_util::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|item| (item, receiver))
        })
        .map(move |item| {
            item.map(|delivery| InboundDelivery {
                acker: Box::new(MemoryAcker {
                    broker: broker.clone(),
                    delivery_tag: delivery.delivery_tag,
                }),
                delivery,
            })
        });
        Ok(stream.boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), anyhow::Error> {
        let mut state = self.broker.state.lock();
        state.check(Operation::Cancel)?;
        // Dropping the sender ends the stream once the buffered deliveries are consumed.
        for queue in state.queues.values_mut() {
            queue
                .subscribers
                .retain(|subscriber| subscriber.consumer_tag != consumer_tag);
        }
        Ok(())
    }

    async fn enable_confirmations(&self) -> Result<(), anyhow::Error> {
        self.broker.state.lock().check(Operation::EnableConfirmations)?;
        self.confirms.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        flags: PublishFlags,
        publishing: Publishing,
    ) -> Result<PendingConfirmation, anyhow::Error> {
        let mut state = self.broker.state.lock();
        state.check(Operation::Publish)?;
        let routed_to = state.route(exchange, routing_key)?;

        for queue in &routed_to {
            let delivery = Delivery {
                exchange: exchange.to_owned(),
                routing_key: routing_key.to_owned(),
                properties: publishing.properties.clone(),
                body: publishing.body.clone(),
                ..Delivery::default()
            };
            state.enqueue(queue, delivery);
            dispatch(&mut state, queue);
        }

        let returned = (flags.mandatory && routed_to.is_empty()).then(|| ReturnedMessage {
            reply_code: NO_ROUTE,
            reply_text: "NO_ROUTE".into(),
        });
        state.published.push(PublishedMessage {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            flags,
            publishing,
            routed_to,
        });

        if !self.confirms.load(Ordering::SeqCst) {
            return Ok(PendingConfirmation::resolved(Confirmation::NotRequested));
        }
        let pending = match state.confirm_policy {
            ConfirmPolicy::Ack => PendingConfirmation::resolved(Confirmation::Ack(returned)),
            ConfirmPolicy::Nack => PendingConfirmation::resolved(Confirmation::Nack(returned)),
            ConfirmPolicy::Hold => {
                let (sender, receiver) = oneshot::channel();
                state.held.push_back(sender);
                PendingConfirmation::from_receiver(receiver)
            }
            ConfirmPolicy::Drop => {
                let (_, receiver) = oneshot::channel();
                PendingConfirmation::from_receiver(receiver)
            }
        };
        Ok(pending)
    }

    fn status(&self) -> HealthStatus {
        health(&self.broker)
    }
}

struct MemoryAcker {
    broker: MemoryBroker,
    delivery_tag: u64,
}

impl MemoryAcker {
    fn settle(&self, outcome: Outcome) -> Result<(), anyhow::Error> {
        self.broker.record_acknowledgement(Acknowledgement {
            delivery_tag: self.delivery_tag,
            outcome,
        })
    }
}

#[async_trait::async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<(), anyhow::Error> {
        self.settle(Outcome::Ack)
    }

    async fn nack(&self, requeue: bool) -> Result<(), anyhow::Error> {
        self.settle(Outcome::Nack { requeue })
    }
}

/// AMQP topic matching: `*` matches exactly one word, `#` matches zero or more words.
fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.split_first(), key.split_first()) {
            (None, None) => true,
            (Some((&"#", rest)), _) => {
                matches(rest, key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some((&"*", rest)), Some((_, key_rest))) => matches(rest, key_rest),
            (Some((word, rest)), Some((key_word, key_rest))) => {
                word == key_word && matches(rest, key_rest)
            }
            _ => false,
        }
    }
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches(&pattern, &key)
}
