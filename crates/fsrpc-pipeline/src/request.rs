//! The per-RPC state the refresh loop and wrap/unwrap pipeline operate
//! on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use fsrpc_core::Flavor;
use fsrpc_sec::{CliCtx, RequestId};

/// One outgoing RPC's security-relevant state.
///
/// The per-request lock referenced by the design notes protects exactly
/// the flag bits below (`intr`, `err`, `timedout`, `resend`); they're
/// modeled as independent atomics instead since none of them ever need
/// to change together atomically.
pub struct Request {
    id: RequestId,
    flavor: Flavor,
    uid: u32,
    gid: u32,
    resent: bool,
    at_support: bool,
    cli_ctx: Mutex<Option<Arc<CliCtx>>>,
    intr: AtomicBool,
    err: AtomicBool,
    timedout: AtomicBool,
}

impl Request {
    /// Build a fresh request targeting `flavor`, issued by `uid`/`gid`.
    #[must_use]
    pub fn new(flavor: Flavor, uid: u32, gid: u32) -> Self {
        Self {
            id: RequestId::next(),
            flavor,
            uid,
            gid,
            resent: false,
            at_support: false,
            cli_ctx: Mutex::new(None),
            intr: AtomicBool::new(false),
            err: AtomicBool::new(false),
            timedout: AtomicBool::new(false),
        }
    }

    /// Mark this request as a resend of an earlier attempt (an LNet-level
    /// retransmit), which lets it ride an `UpToDate` context through the
    /// refresh loop without re-crossing the refresh path.
    #[must_use]
    pub fn resent(mut self, resent: bool) -> Self {
        self.resent = resent;
        self
    }

    /// Mark this request as advertising adaptive-timeout support, which
    /// makes a zero reply offset a protocol error rather than a
    /// legitimate early reply.
    #[must_use]
    pub fn at_support(mut self, at_support: bool) -> Self {
        self.at_support = at_support;
        self
    }

    /// This request's id, used to find it on a context's waiter list.
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// The flavor this request was issued under.
    #[must_use]
    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    /// The uid/gid the request was issued by, before any reverse/root-only
    /// collapsing [`fsrpc_core::VfsCred::for_flavor`] applies.
    #[must_use]
    pub fn identity(&self) -> (u32, u32) {
        (self.uid, self.gid)
    }

    /// Whether this request is a resend.
    #[must_use]
    pub fn is_resent(&self) -> bool {
        self.resent
    }

    /// Whether this request advertises adaptive-timeout support.
    #[must_use]
    pub fn has_at_support(&self) -> bool {
        self.at_support
    }

    /// The context currently bound to this request, if any.
    #[must_use]
    pub fn ctx(&self) -> Option<Arc<CliCtx>> {
        self.cli_ctx.lock().expect("request lock poisoned").clone()
    }

    /// Bind `ctx` to this request, replacing whatever was bound before.
    pub fn bind_ctx(&self, ctx: Arc<CliCtx>) {
        *self.cli_ctx.lock().expect("request lock poisoned") = Some(ctx);
    }

    /// Whether this request's interrupt flag is set.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.intr.load(Ordering::Acquire)
    }

    /// Set this request's interrupt flag, e.g. from a cancellation
    /// handler racing the refresh wait.
    pub fn interrupt(&self) {
        self.intr.store(true, Ordering::Release);
    }

    /// Whether this request has been marked errored.
    #[must_use]
    pub fn is_err(&self) -> bool {
        self.err.load(Ordering::Acquire)
    }

    /// Mark this request errored; it fails to its caller without further
    /// retry.
    pub fn set_err(&self) {
        self.err.store(true, Ordering::Release);
    }

    /// Whether this request's refresh wait timed out.
    #[must_use]
    pub fn is_timedout(&self) -> bool {
        self.timedout.load(Ordering::Acquire)
    }

    /// Mark this request's refresh wait as having timed out.
    pub fn set_timedout(&self) {
        self.timedout.store(true, Ordering::Release);
    }
}
