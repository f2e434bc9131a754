//! Exchanges and queues, the entities middlewares are registered on.
mod exchange;
mod queue;

pub use exchange::Exchange;
pub use queue::Queue;

use crate::table::Table;

/// The routing algorithm of an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    Direct,
    Fanout,
    Topic,
    Headers,
    /// A plugin-provided exchange type, e.g. `x-consistent-hash`.
    Custom(String),
}

impl ExchangeKind {
    pub fn as_str(&self) -> &str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
            ExchangeKind::Custom(kind) => kind,
        }
    }
}

impl std::fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters used to declare an exchange.
///
/// Defaults to a transient, non auto-deleted, public exchange.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExchangeConfig {
    /// Survive a broker restart.
    pub durable: bool,
    /// Delete the exchange once the last queue is unbound from it.
    pub auto_delete: bool,
    /// Refuse publishes from clients: only other exchanges can route to it.
    pub internal: bool,
    pub no_wait: bool,
    pub args: Table,
}

impl ExchangeConfig {
    #[must_use]
    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    #[must_use]
    pub fn auto_delete(mut self, auto_delete: bool) -> Self {
        self.auto_delete = auto_delete;
        self
    }

    #[must_use]
    pub fn internal(mut self, internal: bool) -> Self {
        self.internal = internal;
        self
    }

    #[must_use]
    pub fn no_wait(mut self, no_wait: bool) -> Self {
        self.no_wait = no_wait;
        self
    }

    #[must_use]
    pub fn args(mut self, args: Table) -> Self {
        self.args = args;
        self
    }
}

/// Parameters used to declare a queue and bind it to an exchange.
///
/// `args` go with the queue declaration (e.g. `x-max-priority`), `binding_args` with the
/// binding (e.g. the matching rules of a headers exchange).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueBindConfig {
    pub durable: bool,
    pub auto_delete: bool,
    /// Only the declaring connection can use the queue; it is deleted when that connection closes.
    pub exclusive: bool,
    pub no_wait: bool,
    pub args: Table,
    pub binding_args: Table,
}

impl QueueBindConfig {
    #[must_use]
    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    #[must_use]
    pub fn auto_delete(mut self, auto_delete: bool) -> Self {
        self.auto_delete = auto_delete;
        self
    }

    #[must_use]
    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    #[must_use]
    pub fn no_wait(mut self, no_wait: bool) -> Self {
        self.no_wait = no_wait;
        self
    }

    #[must_use]
    pub fn args(mut self, args: Table) -> Self {
        self.args = args;
        self
    }

    #[must_use]
    pub fn binding_args(mut self, binding_args: Table) -> Self {
        self.binding_args = binding_args;
        self
    }
}
