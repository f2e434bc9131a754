use crate::{
    consumers::{MiddlewareChain, PostHandle, PreHandle},
    error::SetupError,
    table::check_short_string,
    topology::{ExchangeConfig, ExchangeKind, Queue, QueueBindConfig},
    transport::{Channel, HealthStatus},
};
use std::sync::Arc;

/// A declared exchange, with its own channel and its exchange-level middlewares.
///
/// `Exchange` is a cheap handle: clones share the channel and the middleware lists.
/// Middlewares registered on an exchange run for the deliveries of every queue bound through
/// [`Exchange::bind_queue`], outside of the queue-level ones. They can be registered at any
/// time, including after consumers have been started.
#[derive(Clone)]
pub struct Exchange {
    inner: Arc<ExchangeInner>,
}

struct ExchangeInner {
    name: String,
    kind: ExchangeKind,
    channel: Arc<dyn Channel>,
    middleware: Arc<MiddlewareChain>,
}

impl Exchange {
    #[tracing::instrument(
        name = "rabbitmq_declare_exchange",
        skip(channel, kind, config),
        fields(kind = %kind)
    )]
    pub(crate) async fn declare(
        channel: Arc<dyn Channel>,
        name: &str,
        kind: ExchangeKind,
        config: &ExchangeConfig,
    ) -> Result<Self, SetupError> {
        channel
            .declare_exchange(name, &kind, config)
            .await
            .map_err(|source| SetupError::DeclareExchange {
                exchange: name.to_owned(),
                source,
            })?;
        Ok(Self {
            inner: Arc::new(ExchangeInner {
                name: name.to_owned(),
                kind,
                channel,
                middleware: Arc::new(MiddlewareChain::default()),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> &ExchangeKind {
        &self.inner.kind
    }

    pub fn status(&self) -> HealthStatus {
        self.inner.channel.status()
    }

    /// Declare a queue and bind it to this exchange with `routing_key`.
    ///
    /// The queue shares this exchange's channel.
    #[tracing::instrument(
        name = "rabbitmq_bind_queue",
        skip(self, config),
        fields(exchange = %self.inner.name)
    )]
    pub async fn bind_queue(
        &self,
        queue_name: &str,
        routing_key: &str,
        config: QueueBindConfig,
    ) -> Result<Queue, SetupError> {
        check_short_string("queue", queue_name)?;
        check_short_string("routing_key", routing_key)?;
        config.args.check_keys("arguments")?;
        config.binding_args.check_keys("binding_arguments")?;

        let channel = &self.inner.channel;
        channel
            .declare_queue(queue_name, &config)
            .await
            .map_err(|source| SetupError::DeclareQueue {
                queue: queue_name.to_owned(),
                source,
            })?;
        channel
            .bind_queue(queue_name, &self.inner.name, routing_key, &config)
            .await
            .map_err(|source| SetupError::BindQueue {
                queue: queue_name.to_owned(),
                exchange: self.inner.name.clone(),
                source,
            })?;
        Ok(Queue::new(queue_name, routing_key, self.clone()))
    }

    /// Append a pre-handle middleware.
    pub fn before<M: PreHandle>(&self, middleware: M) -> &Self {
        self.dyn_before(Arc::new(middleware))
    }

    /// Append a dynamic pre-handle middleware, see [`Exchange::before`].
    pub fn dyn_before(&self, middleware: Arc<dyn PreHandle>) -> &Self {
        self.before_many(std::iter::once(middleware))
    }

    /// Append multiple dynamic pre-handle middlewares, in order.
    pub fn before_many<I>(&self, middlewares: I) -> &Self
    where
        I: IntoIterator<Item = Arc<dyn PreHandle>>,
    {
        self.inner.middleware.append_before(middlewares);
        self
    }

    /// Append a post-handle middleware.
    pub fn after<M: PostHandle>(&self, middleware: M) -> &Self {
        self.dyn_after(Arc::new(middleware))
    }

    /// Append a dynamic post-handle middleware, see [`Exchange::after`].
    pub fn dyn_after(&self, middleware: Arc<dyn PostHandle>) -> &Self {
        self.after_many(std::iter::once(middleware))
    }

    /// Append multiple dynamic post-handle middlewares, in order.
    pub fn after_many<I>(&self, middlewares: I) -> &Self
    where
        I: IntoIterator<Item = Arc<dyn PostHandle>>,
    {
        self.inner.middleware.append_after(middlewares);
        self
    }

    /// The pre-handle middlewares registered so far.
    pub fn pre_handle_middleware(&self) -> Vec<Arc<dyn PreHandle>> {
        self.inner.middleware.before().to_vec()
    }

    /// The post-handle middlewares registered so far.
    pub fn post_handle_middleware(&self) -> Vec<Arc<dyn PostHandle>> {
        self.inner.middleware.after().to_vec()
    }

    pub(crate) fn channel(&self) -> &Arc<dyn Channel> {
        &self.inner.channel
    }

    pub(crate) fn middleware(&self) -> &Arc<MiddlewareChain> {
        &self.inner.middleware
    }
}

impl std::fmt::Debug for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .field("middleware", &self.inner.middleware)
            .finish()
    }
}
