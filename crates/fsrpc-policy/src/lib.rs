//! The policy registry: a process-wide table of security mechanisms
//! indexed by wire-policy number, plus the [`Policy`] contract every
//! mechanism implements.
//!
//! This crate knows nothing about `Sec` or `CliCtx` bookkeeping — that
//! lives in `fsrpc-sec`, which depends on this crate rather than the
//! other way around. See [`policy`] for how the two sides of that
//! dependency stay decoupled.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod policy;
mod registry;

pub use policy::{CtxState, Policy, ReverseSource, SecCreateCtx, SecState};
pub use registry::{NullLoader, PolicyLoader, Registry, POLICY_MAX};
