//! The crate's own representation of an AMQP field table.
//!
//! Field tables show up as exchange/queue/consumer arguments and as message headers.
//! The transport adapter converts them to and from its wire types (see
//! [`amqp::convenience`](crate::amqp::convenience)); nothing else in the crate depends on
//! the transport's table types.
use std::collections::BTreeMap;

/// The longest AMQP short string, in bytes.
///
/// Table keys, names, routing keys, consumer tags and most message properties are short
/// strings on the wire: their length is encoded in a single byte.
pub const SHORT_STRING_MAX_LEN: usize = 255;

/// A value that must travel as an AMQP short string is too long.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("`{field}` is {len} bytes long, AMQP short strings are limited to 255 bytes")]
pub struct ShortStringTooLong {
    /// What the value was used for, e.g. `message_id` or `headers.x-trace`.
    pub field: String,
    pub len: usize,
}

/// Check that `value` fits in an AMQP short string.
pub fn check_short_string(field: &str, value: &str) -> Result<(), ShortStringTooLong> {
    if value.len() > SHORT_STRING_MAX_LEN {
        return Err(ShortStringTooLong {
            field: field.to_owned(),
            len: value.len(),
        });
    }
    Ok(())
}

/// A set of named AMQP values, ordered by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table(BTreeMap<String, TableValue>);

/// A value that can be stored in a [`Table`].
///
/// The variants mirror the field types RabbitMQ understands.
#[derive(Debug, Clone, PartialEq)]
pub enum TableValue {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    F32(f32),
    F64(f64),
    Decimal { scale: u8, value: u32 },
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<TableValue>),
    /// Seconds since the UNIX epoch.
    Timestamp(u64),
    Table(Table),
    Void,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous one stored under the same key, if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<TableValue>) -> Option<TableValue> {
        self.0.insert(key.into(), value.into())
    }

    /// Fluent version of [`Table::insert`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<TableValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&TableValue> {
        self.0.get(key)
    }

    /// Lookup a string value. Returns `None` if the key is missing or not a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(TableValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<TableValue> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TableValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Check that every key, including the keys of nested tables, fits in a short string.
    ///
    /// `name` prefixes the field reported on failure.
    pub fn check_keys(&self, name: &str) -> Result<(), ShortStringTooLong> {
        for (key, value) in &self.0 {
            let field = format!("{}.{}", name, truncated(key));
            check_short_string(&field, key)?;
            value.check_keys(&field)?;
        }
        Ok(())
    }
}

impl TableValue {
    fn check_keys(&self, name: &str) -> Result<(), ShortStringTooLong> {
        match self {
            TableValue::Table(table) => table.check_keys(name),
            TableValue::Array(values) => values
                .iter()
                .enumerate()
                .try_for_each(|(i, value)| value.check_keys(&format!("{}[{}]", name, i))),
            _ => Ok(()),
        }
    }
}

/// Keep error messages readable when the offending key is the long string itself.
fn truncated(key: &str) -> &str {
    match key.char_indices().nth(32) {
        Some((end, _)) => &key[..end],
        None => key,
    }
}

impl<K: Into<String>, V: Into<TableValue>> FromIterator<(K, V)> for Table {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl IntoIterator for Table {
    type Item = (String, TableValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, TableValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

macro_rules! table_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for TableValue {
                fn from(value: $ty) -> Self {
                    TableValue::$variant(value)
                }
            }
        )*
    };
}

table_value_from! {
    bool => Bool,
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    String => String,
    Vec<u8> => Bytes,
    Vec<TableValue> => Array,
    Table => Table,
}

impl From<&str> for TableValue {
    fn from(value: &str) -> Self {
        TableValue::String(value.to_owned())
    }
}
