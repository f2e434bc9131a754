use crate::{message::MessageProperties, table::Table, transport::PublishFlags};

/// Per-call settings for [`Publisher::publish`](super::Publisher::publish): routing flags,
/// whether to wait for the broker's confirmation and the properties of the message.
///
/// The default publishes a non-mandatory message, without properties, and does not wait for
/// a confirmation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishConfig {
    /// Ask the broker to return the message if it cannot be routed to any queue.
    pub mandatory: bool,
    /// Ask the broker to return the message if no consumer can take it right away.
    ///
    /// The immediate flag was dropped in RabbitMQ 3.0 - see https://www.rabbitmq.com/blog/2012/11/19/breaking-things-with-rabbitmq-3-0/
    /// Setting `true` will cause a not-supported error.
    pub immediate: bool,
    /// Block until the broker confirms the message.
    /// Only meaningful for publishers created with confirmation: ignored otherwise.
    pub wait_confirmation: bool,
    pub properties: MessageProperties,
}

impl PublishConfig {
    pub(crate) fn flags(&self) -> PublishFlags {
        PublishFlags {
            mandatory: self.mandatory,
            immediate: self.immediate,
        }
    }

    #[must_use]
    pub fn mandatory(mut self, mandatory: bool) -> Self {
        self.mandatory = mandatory;
        self
    }

    #[must_use]
    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    #[must_use]
    pub fn wait_confirmation(mut self, wait_confirmation: bool) -> Self {
        self.wait_confirmation = wait_confirmation;
        self
    }

    #[must_use]
    pub fn with_properties(mut self, properties: MessageProperties) -> Self {
        self.properties = properties;
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Table) -> Self {
        self.properties.headers = headers;
        self
    }

    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<crate::table::TableValue>) -> Self {
        self.properties.headers.insert(key, value);
        self
    }

    #[must_use]
    pub fn with_content_type(mut self, value: impl Into<String>) -> Self {
        self.properties.content_type = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_content_encoding(mut self, value: impl Into<String>) -> Self {
        self.properties.content_encoding = Some(value.into());
        self
    }

    /// Non-persistent (1) or persistent (2).
    #[must_use]
    pub fn with_delivery_mode(mut self, value: u8) -> Self {
        self.properties.delivery_mode = Some(value);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, value: u8) -> Self {
        self.properties.priority = Some(value);
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, value: impl Into<String>) -> Self {
        self.properties.correlation_id = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_reply_to(mut self, value: impl Into<String>) -> Self {
        self.properties.reply_to = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_expiration(mut self, value: impl Into<String>) -> Self {
        self.properties.expiration = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_message_id(mut self, value: impl Into<String>) -> Self {
        self.properties.message_id = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, value: u64) -> Self {
        self.properties.timestamp = Some(value);
        self
    }

    #[must_use]
    pub fn with_kind(mut self, value: impl Into<String>) -> Self {
        self.properties.kind = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_user_id(mut self, value: impl Into<String>) -> Self {
        self.properties.user_id = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_app_id(mut self, value: impl Into<String>) -> Self {
        self.properties.app_id = Some(value.into());
        self
    }
}
