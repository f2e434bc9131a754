//! `amqp-relay` is a thin layer, built on top of [`lapin`], to consume and publish RabbitMQ
//! messages through exchange-level and queue-level middleware pipelines.
//!
//! [`Client`](crate::client::Client) is the starting point: it declares
//! [`Exchange`](crate::topology::Exchange)s, which bind [`Queue`](crate::topology::Queue)s,
//! which are consumed with a [`Handler`](crate::consumers::Handler). It also creates
//! [`Publisher`](crate::publishers::Publisher)s, with or without broker confirmation.
//!
//! The broker is only ever reached through the [`transport`] traits: [`amqp`] implements them
//! with `lapin`. With the `test-util` feature, `transport::memory` implements them with an
//! in-process broker for tests.
//!
//! ## Examples
//!
//! Check the `demos` directory to see the library in action.

pub mod amqp;
pub mod client;
pub mod consumers;
pub mod error;
pub mod message;
pub mod publishers;
pub mod table;
pub mod topology;
pub mod transport;

pub use client::Client;
pub use error::SetupError;
pub use transport::{WITHOUT_PUBLISHER_CONFIRMATION, WITH_PUBLISHER_CONFIRMATION};
