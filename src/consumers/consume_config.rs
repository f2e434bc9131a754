use crate::table::Table;

/// Per-subscription settings for [`Queue::consume`](crate::topology::Queue::consume).
///
/// The default is a manually-acknowledged, non-exclusive consumer with a generated name,
/// the channel's prefetch count left untouched and no limit on the number of deliveries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumeConfig {
    /// Let the broker consider deliveries settled as soon as they are sent.
    /// The pipeline still runs for every delivery, but no ack/nack is issued.
    pub auto_ack: bool,
    /// Request exclusive consumer access to the queue.
    pub exclusive: bool,
    /// Do not receive messages published on this connection.
    pub no_local: bool,
    pub no_wait: bool,
    /// The consumer tag. Defaults to `{exchange}-{queue}-{routing_key}-consumer-{uuid}`.
    pub consumer_name: Option<String>,
    pub args: Table,
    /// Issue a `basic.qos` with this prefetch count before subscribing.
    pub prefetch_count: Option<u16>,
    /// Stop the consumption loop after this many deliveries have been processed.
    pub exit_after: Option<u64>,
}

impl ConsumeConfig {
    #[must_use]
    pub fn auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }

    #[must_use]
    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    #[must_use]
    pub fn no_local(mut self, no_local: bool) -> Self {
        self.no_local = no_local;
        self
    }

    #[must_use]
    pub fn no_wait(mut self, no_wait: bool) -> Self {
        self.no_wait = no_wait;
        self
    }

    #[must_use]
    pub fn consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn args(mut self, args: Table) -> Self {
        self.args = args;
        self
    }

    #[must_use]
    pub fn with_prefetch_count(mut self, prefetch_count: u16) -> Self {
        self.prefetch_count = Some(prefetch_count);
        self
    }

    #[must_use]
    pub fn exit_after(mut self, deliveries: u64) -> Self {
        self.exit_after = Some(deliveries);
        self
    }
}
