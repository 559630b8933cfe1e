//! Server-side flavor gate: accepts or rejects an incoming request
//! against an export's current and historical flavors, rotating the
//! history when a pending flavor change lands.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod export;

pub use export::{Export, GateDecision, GateRequest};
