//! Helpers for connecting to a rabbitmq broker through `lapin`.

mod channel;
pub mod configuration;
pub mod convenience;
mod factory;

pub use channel::{LapinChannel, LapinConnection};
pub use factory::ConnectionFactory;
