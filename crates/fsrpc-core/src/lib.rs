//! Shared vocabulary for the RPC security layer.
//!
//! This crate has no notion of policies, security contexts, or requests —
//! it only defines the wire-level [`Flavor`] type, the [`SecError`] taxonomy
//! every other crate in the layer surfaces, and the process-wide tunables in
//! [`SecurityConfig`]. Everything here is meant to be cheap to clone and
//! `Send + Sync`.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod credential;
pub mod error;
pub mod flavor;

pub use config::SecurityConfig;
pub use credential::VfsCred;
pub use error::{SecError, SecResult};
pub use flavor::{BulkService, Flavor, HashAlg, Part, ServiceClass};
