//! Conversions between the crate's own records and `lapin`'s.
//!
//! Every conversion is total: a value that has no exact counterpart on the other side is
//! mapped to the closest one (e.g. a long string which is not valid UTF-8 becomes
//! [`TableValue::Bytes`]).
//!
//! Short strings are not length-checked here: strings longer than
//! [`SHORT_STRING_MAX_LEN`](crate::table::SHORT_STRING_MAX_LEN) bytes are rejected before
//! reaching the transport (see [`check_short_string`](crate::table::check_short_string)).
use crate::{
    consumers::ConsumeConfig,
    message::{Delivery, MessageProperties},
    table::{Table, TableValue},
    topology::{ExchangeConfig, ExchangeKind, QueueBindConfig},
    transport::{Confirmation, PublishFlags, ReturnedMessage},
};
use amq_protocol_types::{AMQPValue, DecimalValue, FieldArray, FieldTable, LongString, ShortString};
use lapin::{
    message::BasicReturnMessage,
    options::{
        BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    publisher_confirm, BasicProperties,
};

pub fn table_to_field_table(table: &Table) -> FieldTable {
    let mut field_table = FieldTable::default();
    for (key, value) in table.iter() {
        field_table.insert(key.into(), table_value_to_amqp(value));
    }
    field_table
}

pub fn field_table_to_table(field_table: &FieldTable) -> Table {
    field_table
        .inner()
        .iter()
        .map(|(key, value)| (key.as_str(), amqp_to_table_value(value)))
        .collect()
}

pub fn table_value_to_amqp(value: &TableValue) -> AMQPValue {
    match value {
        TableValue::Bool(v) => AMQPValue::Boolean(*v),
        TableValue::I8(v) => AMQPValue::ShortShortInt(*v),
        TableValue::U8(v) => AMQPValue::ShortShortUInt(*v),
        TableValue::I16(v) => AMQPValue::ShortInt(*v),
        TableValue::U16(v) => AMQPValue::ShortUInt(*v),
        TableValue::I32(v) => AMQPValue::LongInt(*v),
        TableValue::U32(v) => AMQPValue::LongUInt(*v),
        TableValue::I64(v) => AMQPValue::LongLongInt(*v),
        TableValue::F32(v) => AMQPValue::Float(*v),
        TableValue::F64(v) => AMQPValue::Double(*v),
        TableValue::Decimal { scale, value } => AMQPValue::DecimalValue(DecimalValue {
            scale: *scale,
            value: *value,
        }),
        TableValue::String(v) => AMQPValue::LongString(LongString::from(v.clone())),
        TableValue::Bytes(v) => AMQPValue::ByteArray(v.clone().into()),
        TableValue::Array(values) => AMQPValue::FieldArray(FieldArray::from(
            values.iter().map(table_value_to_amqp).collect::<Vec<_>>(),
        )),
        TableValue::Timestamp(v) => AMQPValue::Timestamp(*v),
        TableValue::Table(v) => AMQPValue::FieldTable(table_to_field_table(v)),
        TableValue::Void => AMQPValue::Void,
    }
}

pub fn amqp_to_table_value(value: &AMQPValue) -> TableValue {
    match value {
        AMQPValue::Boolean(v) => TableValue::Bool(*v),
        AMQPValue::ShortShortInt(v) => TableValue::I8(*v),
        AMQPValue::ShortShortUInt(v) => TableValue::U8(*v),
        AMQPValue::ShortInt(v) => TableValue::I16(*v),
        AMQPValue::ShortUInt(v) => TableValue::U16(*v),
        AMQPValue::LongInt(v) => TableValue::I32(*v),
        AMQPValue::LongUInt(v) => TableValue::U32(*v),
        AMQPValue::LongLongInt(v) => TableValue::I64(*v),
        AMQPValue::Float(v) => TableValue::F32(*v),
        AMQPValue::Double(v) => TableValue::F64(*v),
        AMQPValue::DecimalValue(v) => TableValue::Decimal {
            scale: v.scale,
            value: v.value,
        },
        AMQPValue::ShortString(v) => TableValue::String(v.as_str().to_owned()),
        AMQPValue::LongString(v) => match std::str::from_utf8(v.as_bytes()) {
            Ok(s) => TableValue::String(s.to_owned()),
            Err(_) => TableValue::Bytes(v.as_bytes().to_vec()),
        },
        AMQPValue::FieldArray(values) => {
            TableValue::Array(values.as_slice().iter().map(amqp_to_table_value).collect())
        }
        AMQPValue::Timestamp(v) => TableValue::Timestamp(*v),
        AMQPValue::FieldTable(v) => TableValue::Table(field_table_to_table(v)),
        AMQPValue::ByteArray(v) => TableValue::Bytes(v.as_slice().to_vec()),
        AMQPValue::Void => TableValue::Void,
    }
}

pub fn properties_to_basic(properties: &MessageProperties) -> BasicProperties {
    let short = |value: &Option<String>| value.as_deref().map(ShortString::from);

    let mut basic = BasicProperties::default();
    if !properties.headers.is_empty() {
        basic = basic.with_headers(table_to_field_table(&properties.headers));
    }
    if let Some(v) = short(&properties.content_type) {
        basic = basic.with_content_type(v);
    }
    if let Some(v) = short(&properties.content_encoding) {
        basic = basic.with_content_encoding(v);
    }
    if let Some(v) = properties.delivery_mode {
        basic = basic.with_delivery_mode(v);
    }
    if let Some(v) = properties.priority {
        basic = basic.with_priority(v);
    }
    if let Some(v) = short(&properties.correlation_id) {
        basic = basic.with_correlation_id(v);
    }
    if let Some(v) = short(&properties.reply_to) {
        basic = basic.with_reply_to(v);
    }
    if let Some(v) = short(&properties.expiration) {
        basic = basic.with_expiration(v);
    }
    if let Some(v) = short(&properties.message_id) {
        basic = basic.with_message_id(v);
    }
    if let Some(v) = properties.timestamp {
        basic = basic.with_timestamp(v);
    }
    if let Some(v) = short(&properties.kind) {
        basic = basic.with_kind(v);
    }
    if let Some(v) = short(&properties.user_id) {
        basic = basic.with_user_id(v);
    }
    if let Some(v) = short(&properties.app_id) {
        basic = basic.with_app_id(v);
    }
    basic
}

pub fn basic_to_properties(basic: &BasicProperties) -> MessageProperties {
    let string = |value: &Option<ShortString>| value.as_ref().map(|v| v.as_str().to_owned());

    MessageProperties {
        headers: basic
            .headers()
            .as_ref()
            .map(field_table_to_table)
            .unwrap_or_default(),
        content_type: string(basic.content_type()),
        content_encoding: string(basic.content_encoding()),
        delivery_mode: *basic.delivery_mode(),
        priority: *basic.priority(),
        correlation_id: string(basic.correlation_id()),
        reply_to: string(basic.reply_to()),
        expiration: string(basic.expiration()),
        message_id: string(basic.message_id()),
        timestamp: *basic.timestamp(),
        kind: string(basic.kind()),
        user_id: string(basic.user_id()),
        app_id: string(basic.app_id()),
    }
}

/// Convert a delivery received by the consumer tagged `consumer_tag`.
/// The acknowledgement handle is left out.
pub fn delivery_from_lapin(delivery: &lapin::message::Delivery, consumer_tag: &str) -> Delivery {
    Delivery {
        delivery_tag: delivery.delivery_tag,
        consumer_tag: consumer_tag.to_owned(),
        exchange: delivery.exchange.as_str().to_owned(),
        routing_key: delivery.routing_key.as_str().to_owned(),
        redelivered: delivery.redelivered,
        properties: basic_to_properties(&delivery.properties),
        body: delivery.data.clone(),
    }
}

fn returned_message(message: &BasicReturnMessage) -> ReturnedMessage {
    ReturnedMessage {
        reply_code: message.reply_code,
        reply_text: message.reply_text.as_str().to_owned(),
    }
}

pub fn confirmation_from_lapin(confirmation: &publisher_confirm::Confirmation) -> Confirmation {
    match confirmation {
        publisher_confirm::Confirmation::Ack(returned) => {
            Confirmation::Ack(returned.as_deref().map(returned_message))
        }
        publisher_confirm::Confirmation::Nack(returned) => {
            Confirmation::Nack(returned.as_deref().map(returned_message))
        }
        publisher_confirm::Confirmation::NotRequested => Confirmation::NotRequested,
    }
}

pub fn exchange_kind_to_lapin(kind: &ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        ExchangeKind::Headers => lapin::ExchangeKind::Headers,
        ExchangeKind::Custom(kind) => lapin::ExchangeKind::Custom(kind.clone()),
    }
}

pub fn exchange_declare_options(config: &ExchangeConfig) -> ExchangeDeclareOptions {
    ExchangeDeclareOptions {
        passive: false,
        durable: config.durable,
        auto_delete: config.auto_delete,
        internal: config.internal,
        nowait: config.no_wait,
    }
}

pub fn queue_declare_options(config: &QueueBindConfig) -> QueueDeclareOptions {
    QueueDeclareOptions {
        passive: false,
        durable: config.durable,
        exclusive: config.exclusive,
        auto_delete: config.auto_delete,
        nowait: config.no_wait,
    }
}

pub fn queue_bind_options(config: &QueueBindConfig) -> QueueBindOptions {
    QueueBindOptions {
        nowait: config.no_wait,
    }
}

pub fn basic_consume_options(config: &ConsumeConfig) -> BasicConsumeOptions {
    BasicConsumeOptions {
        no_local: config.no_local,
        no_ack: config.auto_ack,
        exclusive: config.exclusive,
        nowait: config.no_wait,
    }
}

pub fn basic_publish_options(flags: PublishFlags) -> BasicPublishOptions {
    BasicPublishOptions {
        mandatory: flags.mandatory,
        immediate: flags.immediate,
    }
}
