//! Per-import security instances (`Sec`) and per-user client contexts
//! (`CliCtx`).
//!
//! This crate depends on [`fsrpc_policy`] for the `Policy` contract and
//! registry, and is in turn depended on by `fsrpc-pipeline` (the request
//! wrap/unwrap loop that drives refresh) and `fsrpc-gate` (the
//! server-side flavor gate, which adapts a reverse `Sec`).

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod ctx;
mod import;
mod sec;

pub use ctx::{CliCtx, Lifecycle, RequestId};
pub use import::Import;
pub use sec::Sec;
