use crate::{
    consumers::{
        consume_loop::{self, Pipeline},
        ConsumeConfig, ConsumerHandle, Handler, MiddlewareChain, PostHandle, PreHandle,
    },
    error::SetupError,
    table::check_short_string,
    topology::Exchange,
};
use std::sync::Arc;
use uuid::Uuid;

/// A queue bound to an [`Exchange`], with its queue-level middlewares.
///
/// `Queue` is a cheap handle: clones share the middleware lists. The queue keeps a live
/// reference to its exchange, so exchange-level middlewares registered after a consumer has
/// started also apply to it.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    name: String,
    routing_key: String,
    exchange: Exchange,
    middleware: Arc<MiddlewareChain>,
}

impl Queue {
    pub(crate) fn new(name: &str, routing_key: &str, exchange: Exchange) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name: name.to_owned(),
                routing_key: routing_key.to_owned(),
                exchange,
                middleware: Arc::new(MiddlewareChain::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The routing key used to bind the queue to its exchange.
    pub fn routing_key(&self) -> &str {
        &self.inner.routing_key
    }

    pub fn exchange(&self) -> &Exchange {
        &self.inner.exchange
    }

    /// Start consuming messages from the queue with `handler`.
    ///
    /// The consumption loop runs in the background: use the returned [`ConsumerHandle`] to
    /// stop it or wait for it. Every call starts a new, independent loop.
    pub async fn consume<H: Handler>(
        &self,
        handler: H,
        config: ConsumeConfig,
    ) -> Result<ConsumerHandle, SetupError> {
        self.consume_dyn(Arc::new(handler), config).await
    }

    /// Start consuming with a dynamic handler, see [`Queue::consume`].
    #[tracing::instrument(
        name = "rabbitmq_consume",
        skip_all,
        fields(queue_name = %self.inner.name)
    )]
    pub async fn consume_dyn(
        &self,
        handler: Arc<dyn Handler>,
        config: ConsumeConfig,
    ) -> Result<ConsumerHandle, SetupError> {
        let consumer_tag = config.consumer_name.clone().unwrap_or_else(|| {
            format!(
                "{}-{}-{}-consumer-{}",
                self.inner.exchange.name(),
                self.inner.name,
                self.inner.routing_key,
                Uuid::new_v4().simple()
            )
        });
        check_short_string("consumer_tag", &consumer_tag)?;
        config.args.check_keys("arguments")?;

        let channel = self.inner.exchange.channel();
        let consume_error = |source| SetupError::Consume {
            queue: self.inner.name.clone(),
            source,
        };

        if let Some(prefetch_count) = config.prefetch_count {
            channel
                .set_prefetch(prefetch_count)
                .await
                .map_err(consume_error)?;
        }
        let stream = channel
            .consume(&self.inner.name, &consumer_tag, &config)
            .await
            .map_err(consume_error)?;

        let pipeline = Pipeline {
            exchange_middleware: self.inner.exchange.middleware().clone(),
            queue_middleware: self.inner.middleware.clone(),
            handler,
            queue_name: self.inner.name.clone(),
            auto_ack: config.auto_ack,
        };
        Ok(consume_loop::spawn(
            pipeline,
            channel.clone(),
            stream,
            consumer_tag,
            config.exit_after,
        ))
    }

    /// Append a pre-handle middleware. It runs after the exchange-level ones.
    pub fn before<M: PreHandle>(&self, middleware: M) -> &Self {
        self.dyn_before(Arc::new(middleware))
    }

    /// Append a dynamic pre-handle middleware, see [`Queue::before`].
    pub fn dyn_before(&self, middleware: Arc<dyn PreHandle>) -> &Self {
        self.before_many(std::iter::once(middleware))
    }

    pub fn before_many<I>(&self, middlewares: I) -> &Self
    where
        I: IntoIterator<Item = Arc<dyn PreHandle>>,
    {
        self.inner.middleware.append_before(middlewares);
        self
    }

    /// Append a post-handle middleware. It runs before the exchange-level ones.
    pub fn after<M: PostHandle>(&self, middleware: M) -> &Self {
        self.dyn_after(Arc::new(middleware))
    }

    /// Append a dynamic post-handle middleware, see [`Queue::after`].
    pub fn dyn_after(&self, middleware: Arc<dyn PostHandle>) -> &Self {
        self.after_many(std::iter::once(middleware))
    }

    pub fn after_many<I>(&self, middlewares: I) -> &Self
    where
        I: IntoIterator<Item = Arc<dyn PostHandle>>,
    {
        self.inner.middleware.append_after(middlewares);
        self
    }

    pub fn pre_handle_middleware(&self) -> Vec<Arc<dyn PreHandle>> {
        self.inner.middleware.before().to_vec()
    }

    pub fn post_handle_middleware(&self) -> Vec<Arc<dyn PostHandle>> {
        self.inner.middleware.after().to_vec()
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.inner.name)
            .field("routing_key", &self.inner.routing_key)
            .field("exchange", &self.inner.exchange.name())
            .field("middleware", &self.inner.middleware)
            .finish()
    }
}
