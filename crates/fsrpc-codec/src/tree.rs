//! The arena-indexed key tree: each batch of key-describing attributes
//! (an `NLM_F_CREATE`-flagged message in the original transport) builds
//! or extends this tree, which later value batches are rendered
//! against.
//!
//! Each [`KeyNode`] owns a flat, 1-indexed array of [`KeySlot`]s (slot 0
//! is reserved, matching `lkl_list[0]` being unused in the original);
//! a slot whose type is [`NlaKind::Nested`] points at a child node
//! reached through the node's own `parent`/`first_child`/`next_sibling`
//! links, which is what actually forms the tree.

use fsrpc_core::{SecError, SecResult};
use tracing::{debug, warn};

use crate::attribute::{Attribute, Value};
use crate::format::KeyFormat;

/// Scalar attribute indices reserved for key-table metadata, mirroring
/// `LN_SCALAR_ATTR_*`.
pub mod meta {
    /// A nested list of key descriptions.
    pub const LIST: u16 = 1;
    /// How many keys the list below carries.
    pub const LIST_SIZE: u16 = 2;
    /// Which slot in the parent's key table this description fills.
    pub const INDEX: u16 = 3;
    /// The Netlink attribute type the value for this key will carry.
    pub const NLA_TYPE: u16 = 4;
    /// The key's display name.
    pub const VALUE: u16 = 5;
    /// Block/flow/sequence/mapping flags for this key.
    pub const KEY_FORMAT: u16 = 6;
}

/// The Netlink attribute type a key's value will be carried as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NlaKind {
    /// Null-terminated string; doubles as a collection name.
    NulString,
    /// Ordinary string.
    Str,
    /// Unsigned 16-bit scalar.
    U16,
    /// Unsigned 32-bit scalar.
    U32,
    /// Unsigned 64-bit scalar.
    U64,
    /// Signed 16-bit scalar.
    S16,
    /// Signed 32-bit scalar.
    S32,
    /// Signed 64-bit scalar.
    S64,
    /// A nested attribute collection.
    Nested,
}

impl NlaKind {
    fn from_wire(code: u16) -> SecResult<Self> {
        Ok(match code {
            0 => Self::NulString,
            1 => Self::Str,
            2 => Self::U16,
            3 => Self::U32,
            4 => Self::U64,
            5 => Self::S16,
            6 => Self::S32,
            7 => Self::S64,
            8 => Self::Nested,
            other => return Err(SecError::Codec(format!("unknown key attribute type {other}"))),
        })
    }
}

/// One key's description within a node's flat key array: its name,
/// value type, rendering format, and — for [`NlaKind::Nested`] keys —
/// the arena index of the child node describing the nested fields.
#[derive(Debug, Clone)]
pub struct KeySlot {
    /// The key's display name.
    pub name: Option<String>,
    /// The value type this key's data will carry.
    pub data_type: NlaKind,
    /// Block/flow/sequence/mapping flags.
    pub key_format: KeyFormat,
    /// Child node describing this key's nested fields, if any.
    pub child: Option<usize>,
}

impl KeySlot {
    fn placeholder() -> Self {
        Self {
            name: None,
            data_type: NlaKind::NulString,
            key_format: KeyFormat::none(),
            child: None,
        }
    }
}

/// One level of the key tree: a flat, 1-indexed array of key
/// descriptions (slot 0 unused), plus arena links to sibling/child
/// nodes for nested levels.
#[derive(Debug, Clone, Default)]
pub struct KeyNode {
    /// Slot 0 is a sentinel; slots `1..` describe this node's keys.
    pub slots: Vec<KeySlot>,
    parent: Option<usize>,
    first_child: Option<usize>,
    next_sibling: Option<usize>,
    last_child: Option<usize>,
}

impl KeyNode {
    #[allow(clippy::arithmetic_side_effects)]
    fn with_capacity(count: usize) -> Self {
        let mut slots = Vec::with_capacity(count + 1);
        slots.push(KeySlot::placeholder());
        Self {
            slots,
            parent: None,
            first_child: None,
            next_sibling: None,
            last_child: None,
        }
    }

    fn ensure_slot(&mut self, index: u16) -> &mut KeySlot {
        let index = index as usize;
        while self.slots.len() <= index {
            self.slots.push(KeySlot::placeholder());
        }
        &mut self.slots[index]
    }
}

/// An arena of [`KeyNode`]s built up from one or more key-table
/// attribute batches, with a cursor for the node the next value batch
/// renders against.
#[derive(Debug, Clone, Default)]
pub struct KeyTree {
    nodes: Vec<KeyNode>,
    root: Option<usize>,
    cursor: Option<usize>,
}

impl KeyTree {
    /// An empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The root node's index, if any key table has been ingested yet.
    #[must_use]
    pub fn root(&self) -> Option<usize> {
        self.root
    }

    /// Reset the render cursor to the root, as the original does after
    /// a key-table batch completes.
    pub fn reset_cursor(&mut self) {
        self.cursor = self.root;
    }

    /// The node the next value batch should render against.
    #[must_use]
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Point the cursor explicitly (used when descending into a nested
    /// value list).
    pub fn set_cursor(&mut self, index: Option<usize>) {
        self.cursor = index;
    }

    /// Borrow the node at `index`.
    #[must_use]
    pub fn node(&self, index: usize) -> &KeyNode {
        &self.nodes[index]
    }

    /// Ingest one key-table batch. `list` is a sequence of nested
    /// attributes, each describing either a new node (carrying
    /// `LIST_SIZE`) or one more slot of the node most recently started
    /// at this level, mirroring `yaml_parse_key_list`.
    ///
    /// # Errors
    ///
    /// Returns [`SecError::Codec`] if a key description is malformed:
    /// an unknown value type, a slot with no index, or a slot attached
    /// before any `LIST_SIZE` has opened a node.
    #[allow(clippy::arithmetic_side_effects)]
    pub fn ingest(&mut self, parent: Option<usize>, list: &[Attribute]) -> SecResult<()> {
        let mut current: Option<usize> = None;

        for entry in list {
            let Value::Nested(fields) = &entry.value else {
                continue;
            };

            if current.is_none() {
                if let Some(Value::U16(size)) = Self::field(fields, meta::LIST_SIZE) {
                    let new_index = self.nodes.len();
                    self.nodes.push(KeyNode::with_capacity(usize::from(*size) + 1));
                    self.nodes[new_index].parent = parent;
                    if let Some(parent_index) = parent {
                        if let Some(last) = self.nodes[parent_index].last_child {
                            self.nodes[last].next_sibling = Some(new_index);
                        } else {
                            self.nodes[parent_index].first_child = Some(new_index);
                        }
                        self.nodes[parent_index].last_child = Some(new_index);
                    }
                    if self.root.is_none() {
                        self.root = Some(new_index);
                    }
                    if self.cursor.is_none() {
                        self.cursor = Some(new_index);
                    }
                    current = Some(new_index);
                    debug!(node = new_index, parent = ?parent, "key tree node opened");
                }
            }

            let Some(node_index) = current else {
                warn!("key entry arrived before any list size opened a node");
                return Err(SecError::Codec("key entry before list size".into()));
            };

            let Some(Value::U16(slot_index)) = Self::field(fields, meta::INDEX) else {
                warn!(node = node_index, "key entry missing its slot index");
                return Err(SecError::Codec("key entry missing slot index".into()));
            };
            if *slot_index == 0 {
                warn!(node = node_index, "key entry targeted the reserved slot 0");
                return Err(SecError::Codec("key slot index 0 is reserved".into()));
            }

            let data_type = Self::field(fields, meta::NLA_TYPE)
                .map(|value| match value {
                    Value::U16(code) => NlaKind::from_wire(*code),
                    _ => Err(SecError::Codec("key nla_type must be u16".into())),
                })
                .transpose()?;
            let format = Self::field(fields, meta::KEY_FORMAT).and_then(|value| match value {
                Value::U16(bits) => u8::try_from(*bits).ok().map(KeyFormat::from_bits),
                _ => None,
            });
            let name = Self::field(fields, meta::VALUE).and_then(|value| match value {
                Value::Str(s) | Value::NulString(s) => Some(s.clone()),
                _ => None,
            });
            let nested = Self::field(fields, meta::LIST).and_then(|value| match value {
                Value::Nested(inner) => Some(inner.clone()),
                _ => None,
            });

            {
                let slot = self.nodes[node_index].ensure_slot(*slot_index);
                if let Some(data_type) = data_type {
                    slot.data_type = data_type;
                }
                if let Some(format) = format {
                    slot.key_format = format;
                }
                if let Some(name) = name {
                    slot.name = Some(name);
                }
            }

            if let Some(inner) = nested {
                self.ingest(Some(node_index), &inner)?;
                let child_index = self.nodes.len() - 1;
                self.nodes[node_index].ensure_slot(*slot_index).child = Some(child_index);
            }
        }
        Ok(())
    }

    fn field<'a>(fields: &'a [Attribute], index: u16) -> Option<&'a Value> {
        fields.iter().find(|f| f.index == index).map(|f| &f.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot_entry(index: u16, format: u16, name: &str, ty: u16) -> Attribute {
        Attribute::new(
            0,
            Value::Nested(vec![
                Attribute::new(meta::INDEX, Value::U16(index)),
                Attribute::new(meta::KEY_FORMAT, Value::U16(format)),
                Attribute::new(meta::VALUE, Value::Str(name.to_string())),
                Attribute::new(meta::NLA_TYPE, Value::U16(ty)),
            ]),
        )
    }

    fn root_opening(list_size: u16, first_name: &str, first_format: u16, first_ty: u16) -> Attribute {
        Attribute::new(
            0,
            Value::Nested(vec![
                Attribute::new(meta::LIST_SIZE, Value::U16(list_size)),
                Attribute::new(meta::INDEX, Value::U16(1)),
                Attribute::new(meta::KEY_FORMAT, Value::U16(first_format)),
                Attribute::new(meta::VALUE, Value::Str(first_name.to_string())),
                Attribute::new(meta::NLA_TYPE, Value::U16(first_ty)),
            ]),
        )
    }

    #[test]
    fn ingest_builds_root_with_flat_slots() {
        let mut tree = KeyTree::new();
        let batch = vec![
            root_opening(2, "name", 0, 1),
            slot_entry(2, KeyFormat::MAPPING.bits().into(), "age", 2),
        ];
        tree.ingest(None, &batch).unwrap();

        let root = tree.root().unwrap();
        let node = tree.node(root);
        assert_eq!(node.slots.len(), 3);
        assert_eq!(node.slots[1].name.as_deref(), Some("name"));
        assert_eq!(node.slots[2].name.as_deref(), Some("age"));
    }

    #[test]
    fn nested_list_creates_child_node_linked_from_slot() {
        let mut tree = KeyTree::new();
        let nested_batch = vec![root_opening(1, "inner", 0, 1)];
        let mut root_entry = root_opening(1, "outer", 0, 8);
        let Value::Nested(fields) = &mut root_entry.value else {
            unreachable!()
        };
        fields.push(Attribute::new(meta::LIST, Value::Nested(nested_batch)));

        tree.ingest(None, &[root_entry]).unwrap();

        let root = tree.root().unwrap();
        let child = tree.node(root).slots[1].child.unwrap();
        assert_eq!(tree.node(child).slots[1].name.as_deref(), Some("inner"));
    }

    #[test]
    fn zero_slot_index_is_rejected() {
        let mut tree = KeyTree::new();
        let batch = vec![root_opening(1, "name", 0, 1), slot_entry(0, 0, "bad", 1)];
        let err = tree.ingest(None, &batch).unwrap_err();
        assert!(matches!(err, SecError::Codec(_)));
    }

    #[test]
    fn unknown_nla_type_is_rejected() {
        let mut tree = KeyTree::new();
        let batch = vec![root_opening(1, "name", 0, 99)];
        let err = tree.ingest(None, &batch).unwrap_err();
        assert!(matches!(err, SecError::Codec(_)));
    }
}
