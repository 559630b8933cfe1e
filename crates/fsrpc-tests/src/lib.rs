#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
//! Cross-crate scenario tests for the RPC security layer.
//!
//! This crate exists solely for integration testing. It is
//! `publish = false` and has no library code — all tests live in
//! `tests/`.
