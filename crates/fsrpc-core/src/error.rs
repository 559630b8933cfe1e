//! The error taxonomy surfaced across the RPC security layer.
//!
//! Every crate in the layer returns [`SecError`] (or wraps it) so callers
//! at the RPC boundary see one stable vocabulary rather than one per
//! sub-component. The variants mirror the classification in the design —
//! transient / recoverable / terminal / fatal — even though that
//! classification itself is enforced by callers (the refresh loop in
//! `fsrpc-pipeline` decides whether a given error is retried).

use thiserror::Error;

/// Result type used throughout the RPC security layer.
pub type SecResult<T> = Result<T, SecError>;

/// Errors surfaced by the policy registry, security context manager,
/// request pipeline, flavor gate, and codec.
#[derive(Debug, Error)]
pub enum SecError {
    /// A context is in an error state, a `Sec` is dying, or a requested
    /// flavor is not permitted for the target. Corresponds to `EACCES`.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Flavor adaptation failed, e.g. the replacement `Sec` could not be
    /// created. Corresponds to `EPERM`.
    #[error("adaptation failed: {0}")]
    AdaptationFailed(String),

    /// A reply violated the wire framing rules (misaligned offset, policy
    /// mismatch, early-reply size drift). Corresponds to `EPROTO`.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A refresh wait was abandoned because the import was deactivated or
    /// interrupted. Corresponds to `EINTR`.
    #[error("refresh interrupted: {0}")]
    Interrupted(String),

    /// Allocation of a request or reply buffer failed. Corresponds to
    /// `ENOMEM`.
    #[error("allocation failed: {0}")]
    NoMemory(String),

    /// A non-blocking refresh was requested while an upcall was pending.
    /// Corresponds to `EWOULDBLOCK`.
    #[error("would block: context refresh in progress")]
    WouldBlock,

    /// A refresh wait exceeded its deadline. Corresponds to `ETIMEDOUT`.
    #[error("timed out after {0:?}")]
    TimedOut(std::time::Duration),

    /// The wire-policy number named by a flavor has no registered
    /// [`Policy`](../fsrpc_policy/trait.Policy.html) and could not be
    /// loaded on demand.
    #[error("policy {0} not loaded")]
    PolicyNotLoaded(u16),

    /// A flavor name did not match any of the known base flavors.
    #[error("invalid flavor name: {0}")]
    InvalidFlavorName(String),

    /// A wire-policy number is outside the registry's valid range.
    #[error("invalid flavor: policy number {0} out of range")]
    InvalidFlavor(u16),

    /// The Netlink↔YAML codec encountered malformed input.
    #[error("codec error: {0}")]
    Codec(String),

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SecError {
    /// Whether a caller should retry the operation that produced this
    /// error (as opposed to failing the request to its caller).
    ///
    /// Matches the transient/recoverable half of the classification in
    /// the design notes; terminal and fatal errors return `false`.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WouldBlock | Self::TimedOut(_))
    }
}
