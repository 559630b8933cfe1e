//! Streams Netlink generic-attribute batches to and from YAML text.
//!
//! [`Decoder`] implements [`std::io::Read`]: key-table batches build an
//! arena-indexed key tree, and value batches render against it into
//! YAML text a real parser can pull from. [`Encoder`] implements
//! [`std::io::Write`]: YAML text is folded (quote substitution),
//! classified line by line (block/flow/sequence/mapping), and handed
//! to a [`NetlinkSink`] as attribute batches.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod attribute;
mod decoder;
mod encoder;
mod format;
mod tree;

pub use attribute::{Attribute, Value};
pub use decoder::{Decoder, RenderBudget};
pub use encoder::{classify_line, substitute_quotes, CollectingSink, Encoder, LineFormat, NetlinkSink};
pub use format::KeyFormat;
pub use tree::{meta, KeyNode, KeySlot, KeyTree, NlaKind};
