//! Facilities to consume messages from a queue: the [`Handler`] trait, pre-handle and
//! post-handle middlewares, and the consumption loop started by
//! [`Queue::consume`](crate::topology::Queue::consume).
//!
//! For every delivery, the consumption loop runs:
//!
//! 1. exchange-level [`PreHandle`] middlewares, in registration order;
//! 2. queue-level [`PreHandle`] middlewares, in registration order;
//! 3. the [`Handler`];
//! 4. queue-level [`PostHandle`] middlewares, in registration order;
//! 5. exchange-level [`PostHandle`] middlewares, in registration order;
//!
//! and then acks the delivery, or nacks it with requeue if the [`HandleResponse`] asks for it.
mod consume_config;
pub(crate) mod consume_loop;
mod consumer_handle;
mod context;
mod extensions;
mod handler;
mod middleware;

pub use consume_config::ConsumeConfig;
pub use consumer_handle::{ConsumeError, ConsumerHandle};
pub use context::HandlingContext;
pub use extensions::{get_message_local_item, set_message_local_item};
pub use handler::{HandleResponse, Handler};
pub(crate) use middleware::MiddlewareChain;
pub use middleware::{PostHandle, PreHandle};
