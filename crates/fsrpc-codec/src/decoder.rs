//! Renders value batches against an ingested key tree into YAML text,
//! exposed as a [`std::io::Read`] so a real YAML parser (or anything
//! else) can pull bytes from it exactly as `libyaml`'s `read_handler`
//! pulls from the original.

use std::io;

use fsrpc_core::{SecError, SecResult};
use tracing::{debug, warn};

use crate::attribute::{Attribute, Value};
use crate::format::KeyFormat;
use crate::tree::{KeyTree, NlaKind};

/// Tracks the caller's declared output capacity purely as a diagnostic:
/// every write against it should *decrease* the remaining count, never
/// increase it. The original's flow-form tail did the latter
/// (`*size += len`) — almost certainly a bug, since every other path
/// in the same function decrements. We always decrement.
#[derive(Debug, Clone, Copy)]
pub struct RenderBudget(i64);

impl RenderBudget {
    /// Start tracking `capacity` bytes of nominal output budget.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        #[allow(clippy::cast_possible_wrap)]
        Self(capacity as i64)
    }

    /// Remaining budget; negative once a render has overrun it.
    #[must_use]
    pub fn remaining(self) -> i64 {
        self.0
    }

    #[allow(clippy::arithmetic_side_effects)]
    fn consume(&mut self, len: usize) {
        #[allow(clippy::cast_possible_wrap)]
        let len = len as i64;
        self.0 -= len;
    }
}

/// Streams rendered YAML text, fed by alternating key-table and value
/// attribute batches.
#[derive(Debug, Default)]
pub struct Decoder {
    tree: KeyTree,
    pending: Vec<u8>,
    read_pos: usize,
}

impl Decoder {
    /// A decoder with no key table ingested yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one key-table batch (an `NLM_F_CREATE`-flagged message in
    /// the original transport), resetting the render cursor to its
    /// root once done.
    ///
    /// # Errors
    ///
    /// Propagates [`SecError::Codec`] from a malformed key description.
    pub fn ingest_key_table(&mut self, attrs: &[Attribute]) -> SecResult<()> {
        self.tree.ingest(None, attrs)?;
        self.tree.reset_cursor();
        debug!(root = ?self.tree.root(), "key table ingested, cursor reset to root");
        Ok(())
    }

    /// Render one value batch against the current cursor node, queuing
    /// the resulting YAML text for [`std::io::Read`] to drain.
    ///
    /// # Errors
    ///
    /// Returns [`SecError::Codec`] if no key table has been ingested
    /// yet, or a value's type disagrees with its key description.
    pub fn ingest_value_batch(&mut self, attrs: &[Attribute], budget: &mut RenderBudget) -> SecResult<()> {
        let node = self
            .tree
            .cursor()
            .ok_or_else(|| SecError::Codec("value batch arrived before any key table".into()))?;
        // The overall document's block/flow/mapping/sequence format is
        // carried by the first key description of the current node,
        // matching how the original seeds `yaml_parse_value_list`'s
        // `parent` argument from `keys.lkl_list[1]` rather than slot 0.
        let format = self
            .tree
            .node(node)
            .slots
            .get(1)
            .map(|slot| slot.key_format)
            .unwrap_or_default();

        let mut out = String::new();
        render_node(&self.tree, node, attrs, format, 0, budget, &mut out)?;
        if budget.remaining() < 0 {
            warn!(remaining = budget.remaining(), "render overran its declared output budget");
        }
        self.pending.extend_from_slice(out.as_bytes());
        Ok(())
    }
}

#[allow(clippy::arithmetic_side_effects)]
fn render_node(
    tree: &KeyTree,
    node_index: usize,
    attrs: &[Attribute],
    format: KeyFormat,
    indent: usize,
    budget: &mut RenderBudget,
    out: &mut String,
) -> SecResult<()> {
    let node = tree.node(node_index);

    for (slot_index, slot) in node.slots.iter().enumerate().skip(1) {
        let Ok(wire_index) = u16::try_from(slot_index) else {
            continue;
        };
        let matches: Vec<&Attribute> = attrs.iter().filter(|a| a.index == wire_index).collect();
        if matches.is_empty() {
            continue;
        }

        for attr in matches {
            if !format.contains(KeyFormat::FLOW) {
                let step = if indent == 0 { 2 } else { indent };
                let mut prefix = " ".repeat(step);
                if format.contains(KeyFormat::SEQUENCE) && step >= 2 {
                    prefix.replace_range(step - 2..step - 1, "-");
                }
                out.push_str(&prefix);
                budget.consume(step);
            }
            if format.contains(KeyFormat::MAPPING) {
                let header = format!("{}: ", slot.name.as_deref().unwrap_or(""));
                out.push_str(&header);
                budget.consume(header.len());
            }

            match slot.data_type {
                NlaKind::Nested => {
                    let child = slot
                        .child
                        .ok_or_else(|| SecError::Codec("nested slot missing child tree".into()))?;
                    let Value::Nested(inner) = &attr.value else {
                        return Err(SecError::Codec("expected nested value for nested slot".into()));
                    };

                    let mut child_indent = indent;
                    if slot.key_format.contains(KeyFormat::FLOW) {
                        let brace = if slot.key_format.contains(KeyFormat::SEQUENCE) {
                            '['
                        } else {
                            '{'
                        };
                        let header = format!("{}: {brace} ", slot.name.as_deref().unwrap_or(""));
                        out.push_str(&header);
                        budget.consume(header.len());
                    } else {
                        if slot.key_format.contains(KeyFormat::MAPPING) {
                            child_indent += 2;
                        }
                        if slot.key_format.contains(KeyFormat::SEQUENCE) {
                            child_indent += 2;
                        }
                        let header = format!("{}:\n", slot.name.as_deref().unwrap_or(""));
                        out.push_str(&header);
                        budget.consume(header.len());
                    }

                    render_node(tree, child, inner, slot.key_format, child_indent, budget, out)?;

                    if slot.key_format.contains(KeyFormat::FLOW) {
                        let closing = if slot.key_format.contains(KeyFormat::SEQUENCE) {
                            " ]\n"
                        } else {
                            " }\n"
                        };
                        if let Some(trimmed) = out.strip_suffix(", ") {
                            out.truncate(trimmed.len());
                        }
                        out.push_str(closing);
                        budget.consume(closing.len());
                    }
                    continue;
                }
                NlaKind::NulString => {
                    if let Value::NulString(name) | Value::Str(name) = &attr.value {
                        out.push_str(name);
                        budget.consume(name.len());
                    }
                }
                _ => {
                    let rendered = render_scalar(&attr.value)?;
                    out.push_str(&rendered);
                    budget.consume(rendered.len());
                }
            }

            if format.contains(KeyFormat::FLOW) {
                out.push_str(", ");
                budget.consume(2);
            } else {
                out.push('\n');
                budget.consume(1);
            }
        }
    }
    Ok(())
}

fn render_scalar(value: &Value) -> SecResult<String> {
    Ok(match value {
        Value::Str(s) | Value::NulString(s) => s.clone(),
        Value::U16(v) => v.to_string(),
        Value::U32(v) => v.to_string(),
        Value::U64(v) => v.to_string(),
        Value::S16(v) => v.to_string(),
        Value::S32(v) => v.to_string(),
        Value::S64(v) => v.to_string(),
        Value::Nested(_) => return Err(SecError::Codec("scalar slot carried a nested value".into())),
    })
}

impl io::Read for Decoder {
    #[allow(clippy::arithmetic_side_effects)]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.pending.len() - self.read_pos;
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&self.pending[self.read_pos..self.read_pos + n]);
        self.read_pos += n;
        if self.read_pos == self.pending.len() {
            self.pending.clear();
            self.read_pos = 0;
        }
        Ok(n)
    }
}
