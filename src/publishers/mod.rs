//! Facilities to publish messages to an exchange. Check out [`Publisher`] as a starting point.
mod publish_config;
mod publisher;

pub use publish_config::PublishConfig;
pub use publisher::{PublishError, Publisher};
