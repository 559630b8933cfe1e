//! The attribute vocabulary carried over the wire, independent of any
//! particular socket transport.

use netlink_packet_utils::nla::Nla;

/// Mirrors the `NLA_*` scalar types the original key/value protocol
/// distinguishes; `Nested` is the recursive case that both the key-tree
/// and the value batches use to express structure.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A null-terminated string that also doubles as a collection name
    /// at the top of a key list.
    NulString(String),
    /// An ordinary string value.
    Str(String),
    /// Unsigned 16-bit scalar.
    U16(u16),
    /// Unsigned 32-bit scalar.
    U32(u32),
    /// Unsigned 64-bit scalar.
    U64(u64),
    /// Signed 16-bit scalar.
    S16(i16),
    /// Signed 32-bit scalar.
    S32(i32),
    /// Signed 64-bit scalar.
    S64(i64),
    /// A nested attribute collection.
    Nested(Vec<Attribute>),
}

/// One generic-netlink attribute: an index into the key table the
/// value is interpreted against, plus its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Index into the enclosing key table (`LN_SCALAR_ATTR_INDEX`
    /// equivalent). Index 0 is reserved for list metadata.
    pub index: u16,
    /// The attribute's payload.
    pub value: Value,
}

impl Attribute {
    /// Build a scalar or nested attribute at `index`.
    #[must_use]
    pub fn new(index: u16, value: Value) -> Self {
        Self { index, value }
    }
}

impl Nla for Attribute {
    #[allow(clippy::arithmetic_side_effects)]
    fn value_len(&self) -> usize {
        match &self.value {
            Value::NulString(s) | Value::Str(s) => s.len() + 1,
            Value::U16(_) | Value::S16(_) => 2,
            Value::U32(_) | Value::S32(_) => 4,
            Value::U64(_) | Value::S64(_) => 8,
            Value::Nested(children) => children.iter().map(Nla::buffer_len).sum(),
        }
    }

    fn kind(&self) -> u16 {
        self.index
    }

    fn is_nested(&self) -> bool {
        matches!(self.value, Value::Nested(_))
    }

    #[allow(clippy::arithmetic_side_effects)]
    fn emit_value(&self, buffer: &mut [u8]) {
        match &self.value {
            Value::NulString(s) | Value::Str(s) => {
                buffer[..s.len()].copy_from_slice(s.as_bytes());
                buffer[s.len()] = 0;
            }
            Value::U16(v) => buffer[..2].copy_from_slice(&v.to_ne_bytes()),
            Value::S16(v) => buffer[..2].copy_from_slice(&v.to_ne_bytes()),
            Value::U32(v) => buffer[..4].copy_from_slice(&v.to_ne_bytes()),
            Value::S32(v) => buffer[..4].copy_from_slice(&v.to_ne_bytes()),
            Value::U64(v) => buffer[..8].copy_from_slice(&v.to_ne_bytes()),
            Value::S64(v) => buffer[..8].copy_from_slice(&v.to_ne_bytes()),
            Value::Nested(children) => {
                let mut offset = 0;
                for child in children {
                    let len = child.buffer_len();
                    child.emit(&mut buffer[offset..offset + len]);
                    offset += len;
                }
            }
        }
    }
}
