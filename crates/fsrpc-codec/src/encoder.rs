//! Turns streamed YAML text back into Netlink attribute batches,
//! exposed as a [`std::io::Write`] the way the original registers a
//! `libyaml` `write_handler`.

use std::io::{self, Write};

use fsrpc_core::{SecError, SecResult};
use tracing::debug;

use crate::attribute::{Attribute, Value};

/// Where a finished batch of attributes is handed off. Kept separate
/// from any actual socket so the codec can be exercised, and reused by
/// a real transport, without pulling in netlink I/O here.
pub trait NetlinkSink {
    /// Resolve a first-column YAML key as a multicast group name and
    /// subscribe to it, mirroring `lustre_netlink_add_group`. Called
    /// once per top-level group key before any of that group's
    /// attributes are accepted.
    ///
    /// # Errors
    ///
    /// Implementations should fail if the named group does not exist.
    fn resolve_group(&mut self, name: &str) -> SecResult<()>;

    /// Receive one complete attribute batch built from a YAML
    /// document's top-level group or a nested list within it.
    ///
    /// # Errors
    ///
    /// Implementations may fail to enqueue or transmit the batch.
    fn emit(&mut self, attrs: Vec<Attribute>) -> SecResult<()>;
}

/// A [`NetlinkSink`] that just collects every batch it's given, for
/// tests and for callers that want to inspect output before sending.
/// Resolves any group name it's offered.
#[derive(Debug, Default)]
pub struct CollectingSink {
    /// Batches received so far, in order.
    pub batches: Vec<Vec<Attribute>>,
    /// Group names resolved so far, in order.
    pub groups: Vec<String>,
}

impl NetlinkSink for CollectingSink {
    fn resolve_group(&mut self, name: &str) -> SecResult<()> {
        self.groups.push(name.to_string());
        Ok(())
    }

    fn emit(&mut self, attrs: Vec<Attribute>) -> SecResult<()> {
        self.batches.push(attrs);
        Ok(())
    }
}

/// YAML allows `'` and `"` in documents but a fixed-width kernel-side
/// parser does not want to deal with either; both are folded onto the
/// single reserved marker character `%`, the way the original's
/// `yaml_quotation_handling` makes room for `%`-tagged values instead
/// of quoted ones (our version is a plain substitution rather than its
/// in-place two-byte buffer rewrite, which relied on padding bytes
/// around each quote that a general-purpose string can't assume it has).
#[must_use]
pub fn substitute_quotes(line: &str) -> String {
    line.chars()
        .map(|c| if c == '"' || c == '\'' { '%' } else { c })
        .collect()
}

/// How a rendered YAML line's indentation describes the attribute tree
/// being rebuilt, mirroring `LNKF_*` plus the `LNKF_END` sentinel
/// `yaml_format_type` returns when indentation decreases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFormat {
    /// Indentation decreased: the enclosing nested list is finished.
    End,
    /// The line opens a flow-style collection (`{` or `[` present).
    Flow,
    /// The line is a block sequence entry (`- `).
    Sequence,
    /// The line opens a new block mapping level.
    Mapping,
    /// A plain continuation at the same nesting level.
    Flat,
}

const BEST_INDENT: usize = 2;

fn leading_spaces(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

/// Classify one rendered line against the current indentation `offset`
/// and the previous line's format, returning the format and the
/// updated offset — the Rust analogue of `yaml_format_type`.
#[must_use]
#[allow(clippy::arithmetic_side_effects)]
pub fn classify_line(line: &str, offset: usize, prev: LineFormat) -> (LineFormat, usize) {
    if line.contains('{') || line.contains('[') {
        return (LineFormat::Flow, offset);
    }

    let new_indent = leading_spaces(line);
    if new_indent < offset {
        return (LineFormat::End, offset.saturating_sub(BEST_INDENT));
    }

    if line[new_indent..].starts_with("- ") {
        return (LineFormat::Sequence, new_indent + BEST_INDENT);
    }

    if offset != new_indent && prev != LineFormat::Mapping {
        return (LineFormat::Mapping, new_indent);
    }

    (LineFormat::Flat, offset)
}

/// Buffers incoming text, classifies each completed line, and hands
/// finished top-level groups to a [`NetlinkSink`].
pub struct Encoder<S> {
    sink: S,
    partial: String,
    indent: usize,
    format: LineFormat,
    current: Vec<Attribute>,
    next_index: u16,
    resolved_group: Option<String>,
}

impl<S: NetlinkSink> Encoder<S> {
    /// Build an encoder feeding finished attribute batches to `sink`.
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            partial: String::new(),
            indent: 0,
            format: LineFormat::Flat,
            current: Vec::new(),
            next_index: 1,
            resolved_group: None,
        }
    }

    /// Consume ownership and return the wrapped sink.
    pub fn into_sink(self) -> S {
        self.sink
    }

    fn process_line(&mut self, raw: &str) -> SecResult<()> {
        let line = substitute_quotes(raw);
        if line == "---" || line == "..." {
            return Ok(());
        }
        if line.trim().is_empty() {
            return self.flush_group();
        }

        // A first-column key (no leading space, no sequence dash) names
        // a multicast group to resolve and subscribe to, mirroring
        // `lustre_netlink_add_group`. A line with no colon is skipped
        // outright, matching the original's `continue` when `strchr`
        // finds none.
        if !line.starts_with(' ') && !line.starts_with('-') {
            let Some((name, rest)) = line.split_once(':') else {
                return Ok(());
            };
            self.sink.resolve_group(name.trim())?;
            self.resolved_group = Some(name.trim().to_string());
            let rest = rest.trim();
            if rest.is_empty() {
                return Ok(());
            }
            return self.process_body_line(rest);
        }

        if self.resolved_group.is_none() {
            return Err(SecError::Codec(
                "emitter contains no valid Netlink groups".into(),
            ));
        }

        self.process_body_line(&line)
    }

    fn process_body_line(&mut self, line: &str) -> SecResult<()> {
        let (format, offset) = classify_line(line, self.indent, self.format);
        self.indent = offset;
        self.format = format;

        if format == LineFormat::End {
            self.flush_group()?;
            return Ok(());
        }

        let trimmed = line[offset.min(line.len())..].trim_end();
        let value = trimmed.strip_prefix("- ").unwrap_or(trimmed);
        let value = value.split_once(':').map_or(value, |(_, v)| v.trim());

        self.current
            .push(Attribute::new(self.next_index, Value::Str(value.to_string())));
        self.next_index = self.next_index.wrapping_add(1);
        Ok(())
    }

    fn flush_group(&mut self) -> SecResult<()> {
        self.resolved_group = None;
        if self.current.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.current);
        debug!(attrs = batch.len(), "flushing yaml group to netlink sink");
        self.next_index = 1;
        self.sink.emit(batch)
    }

    /// Flush any buffered partial line and the current attribute group.
    ///
    /// # Errors
    ///
    /// Propagates whatever the wrapped [`NetlinkSink`] returns.
    pub fn finish(&mut self) -> SecResult<()> {
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            self.process_line(&line)?;
        }
        self.flush_group()
    }
}

impl<S: NetlinkSink> Write for Encoder<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        self.partial.push_str(&text);
        while let Some(pos) = self.partial.find('\n') {
            let line = self.partial[..pos].to_string();
            self.partial.drain(..=pos);
            self.process_line(&line)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.finish()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    }
}
