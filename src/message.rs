//! Plain message records exchanged with the transport.
use crate::table::{check_short_string, ShortStringTooLong, Table};

/// The properties (a.k.a. "basic properties") attached to an AMQP message.
///
/// Every field is optional: `None` means the property is not sent on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageProperties {
    /// Application or exchange specific fields. The headers exchange inspects this table.
    pub headers: Table,
    /// MIME content type.
    pub content_type: Option<String>,
    /// MIME content encoding.
    pub content_encoding: Option<String>,
    /// Transient (1) or persistent (2).
    pub delivery_mode: Option<u8>,
    /// 0 to 9.
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    /// Address to reply to (e.g. RPC).
    pub reply_to: Option<String>,
    /// Message expiration spec, in milliseconds.
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    /// Seconds since the UNIX epoch.
    pub timestamp: Option<u64>,
    /// Message type name.
    pub kind: Option<String>,
    /// Creating user id - e.g. "guest".
    pub user_id: Option<String>,
    /// Creating application id.
    pub app_id: Option<String>,
}

impl MessageProperties {
    /// Check that every property sent as an AMQP short string fits in 255 bytes, header
    /// keys included.
    pub fn check_short_strings(&self) -> Result<(), ShortStringTooLong> {
        let fields = [
            ("content_type", &self.content_type),
            ("content_encoding", &self.content_encoding),
            ("correlation_id", &self.correlation_id),
            ("reply_to", &self.reply_to),
            ("expiration", &self.expiration),
            ("message_id", &self.message_id),
            ("type", &self.kind),
            ("user_id", &self.user_id),
            ("app_id", &self.app_id),
        ];
        for (field, value) in fields {
            if let Some(value) = value {
                check_short_string(field, value)?;
            }
        }
        self.headers.check_keys("headers")
    }
}

/// A message received from a queue.
///
/// `Delivery` is a snapshot: middlewares are free to mutate their working copy, but the
/// handle used to ack/nack the message with the broker is captured when the delivery
/// enters the consumption loop and never changes (see [`InboundDelivery`]).
///
/// [`InboundDelivery`]: crate::transport::InboundDelivery
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delivery {
    /// The broker-assigned delivery tag.
    pub delivery_tag: u64,
    /// The tag of the consumer that received the message.
    pub consumer_tag: String,
    /// The exchange the message was published to. Empty for the default exchange.
    pub exchange: String,
    /// The routing key the message was published with.
    pub routing_key: String,
    /// Whether the broker already tried to deliver this message.
    pub redelivered: bool,
    pub properties: MessageProperties,
    /// The payload, in binary format.
    pub body: Vec<u8>,
}

impl Delivery {
    /// Try to interpret the payload as UTF-8 text.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Deserialize a JSON payload.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// A message handed to the transport for publishing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Publishing {
    pub properties: MessageProperties,
    pub body: Vec<u8>,
}
