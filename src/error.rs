use crate::table::ShortStringTooLong;

/// Errors raised while connecting to the broker or setting up exchanges, queues,
/// publishers and consumers.
///
/// Setup errors are fatal to the call that raised them; nothing is retried.
#[derive(thiserror::Error, Debug)]
pub enum SetupError {
    #[error("Failed to connect to the RabbitMq broker")]
    Connect(#[source] anyhow::Error),
    #[error("Failed to close the connection to the RabbitMq broker")]
    Close(#[source] anyhow::Error),
    #[error("AMQP disconnected")]
    Disconnected,
    /// Nothing was sent to the broker.
    #[error("Invalid AMQP argument")]
    InvalidArgument(#[from] ShortStringTooLong),
    #[error("Failed to open a channel for exchange '{exchange}'")]
    OpenChannel {
        exchange: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to declare exchange '{exchange}'")]
    DeclareExchange {
        exchange: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(
        "Failed to put the channel for exchange '{exchange}' in confirmation mode. \
        Try using a publisher without confirmation"
    )]
    EnableConfirmations {
        exchange: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to declare queue '{queue}'")]
    DeclareQueue {
        queue: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to bind queue '{queue}' to exchange '{exchange}'")]
    BindQueue {
        queue: String,
        exchange: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to start consuming from queue '{queue}'")]
    Consume {
        queue: String,
        #[source]
        source: anyhow::Error,
    },
}
