//! Binds a request to a security context, refreshes it if stale, and
//! performs the wire wrap/unwrap.
//!
//! Depends on `fsrpc-sec` for `Sec`/`CliCtx`/`Import` and on
//! `fsrpc-policy` for the `Policy` contract and registry; everything
//! that needs a lock crosses exactly the boundaries the concurrency
//! model in the design notes describes.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod refresh;
mod request;
mod wire;

pub use refresh::refresh;
pub use request::Request;
pub use wire::{
    finish_early_reply, unwrap_early_reply, unwrap_reply, wrap_request, EarlyReply, ReplyHeader,
    SegmentedBuffer,
};

use fsrpc_core::SecResult;
use fsrpc_policy::Policy;

/// Grow a request buffer in place to at least `newsize` bytes, delegating
/// to the policy since some mechanisms need to re-derive padding or
/// checksums rather than simply appending zero bytes.
///
/// # Errors
///
/// Propagates whatever [`Policy::enlarge_reqbuf`] returns.
pub fn enlarge_reqbuf(policy: &dyn Policy, buf: &mut Vec<u8>, newsize: usize) -> SecResult<()> {
    policy.enlarge_reqbuf(buf, newsize)
}
