//! The `Policy` contract every security mechanism implements.
//!
//! A `Policy` never sees the common `Sec`/`CliCtx` bookkeeping — refcounts,
//! state machines, waiter lists all live one layer up, in `fsrpc-sec`. What
//! a `Policy` owns is *policy-private state*: whatever a concrete mechanism
//! (null, plain, a GSS mechanism, shared-key) needs to remember about one
//! security instance or one user's context. That state crosses the
//! trait boundary as `Box<dyn SecState>` / `Arc<dyn CtxState>` so this
//! crate never has to know about `fsrpc-sec`'s types — it's the other way
//! around, which is how the cyclic Sec/CliCtx/Policy ownership in the
//! design notes gets broken.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use fsrpc_core::{Flavor, Part, SecResult, VfsCred};

/// Policy-private per-`Sec` state. Downcast via [`Any`] when a policy
/// implementation needs to recover its concrete type from a `Box<dyn
/// SecState>` handed back by `fsrpc-sec`.
pub trait SecState: Any + Send + Sync {
    /// Upcast for downcasting by concrete policy implementations.
    fn as_any(&self) -> &dyn Any;
}

/// Policy-private per-`CliCtx` state.
pub trait CtxState: Any + Send + Sync + fmt::Debug {
    /// Upcast for downcasting by concrete policy implementations.
    fn as_any(&self) -> &dyn Any;

    /// Whether this context skips refresh entirely and is always ready —
    /// the `ETERNAL` bit in the `CliCtx` state machine (spec: the null
    /// policy's contexts never need an upcall).
    fn is_eternal(&self) -> bool {
        false
    }
}

/// Inputs to [`Policy::create_sec`]. Non-reverse creation leaves
/// `reverse_source` unset and the policy resolves itself from the
/// registry in the usual way; reverse creation (building a `Sec` to talk
/// back to a client) carries the source context the server received the
/// request under.
#[derive(Debug, Clone)]
pub struct SecCreateCtx {
    /// The flavor this `Sec` is being created for. For reverse creation
    /// this already carries the `REVERSE | ROOTONLY` bits.
    pub flavor: Flavor,
    /// Which role this `Sec` plays.
    pub part: Part,
    /// Set only when this `Sec` is a reverse sec, built from an incoming
    /// request's already-negotiated server-side context.
    pub reverse_source: Option<ReverseSource>,
}

/// The server-side context a reverse `Sec` is built from.
#[derive(Debug, Clone)]
pub struct ReverseSource {
    /// The uid the inbound request authenticated as.
    pub uid: u32,
    /// The gid the inbound request authenticated as.
    pub gid: u32,
}

/// A mechanism family registered under one wire-policy number.
///
/// Optional hooks (marked `?` in the data model) default to a no-op
/// `Ok(())`/`None` implementation — "absent optional hooks mean no
/// transformation", per the design notes — rather than requiring every
/// implementation to spell out a trivial body.
#[async_trait]
pub trait Policy: Send + Sync {
    /// The policy's immutable name, e.g. `"plain"` or `"krb5"`.
    fn name(&self) -> &str;

    /// The wire-policy number this policy is registered under.
    fn policy_number(&self) -> u16;

    // ---- client ops ----

    /// Build the policy-private state for a new `Sec`.
    fn create_sec(&self, ctx: &SecCreateCtx) -> SecResult<Box<dyn SecState>>;

    /// Tear down a `Sec`'s policy-private state when its refcount hits
    /// zero.
    fn destroy_sec(&self, state: &dyn SecState);

    /// Mark a `Sec` as dying: its cached contexts are about to be
    /// flushed. The `Sec` itself lives on until its last ref drops.
    fn kill_sec(&self, state: &dyn SecState);

    /// Look up (and optionally create) the `CliCtx` for `cred` under this
    /// `Sec`. `remove_dead` asks the policy to evict a cached but-dead
    /// entry rather than returning it.
    fn lookup_ctx(
        &self,
        sec: &dyn SecState,
        cred: VfsCred,
        create: bool,
        remove_dead: bool,
    ) -> SecResult<Arc<dyn CtxState>>;

    /// Release a reference obtained from `lookup_ctx`. Most policies need
    /// nothing beyond dropping the `Arc`; this exists for policies that
    /// keep a side cache keyed by credential.
    fn release_ctx(&self, _ctx: &dyn CtxState) {}

    /// Flush cached contexts for `uid` (or all users, if `uid` is
    /// `None`). `grace` lets in-flight contexts drain; `force` evicts
    /// even those still referenced elsewhere.
    fn flush_ctx_cache(&self, sec: &dyn SecState, uid: Option<u32>, grace: bool, force: bool);

    /// Optional per-`Sec` garbage collection pass.
    fn gc_ctx(&self, _sec: &dyn SecState) {}

    /// Sign (MIC, no encryption) an outgoing message in place.
    fn sign(&self, ctx: &dyn CtxState, msg: &mut Vec<u8>) -> SecResult<()>;

    /// Seal (encrypt) an outgoing message in place.
    fn seal(&self, ctx: &dyn CtxState, msg: &mut Vec<u8>) -> SecResult<()>;

    /// Verify a signed incoming message in place.
    fn verify(&self, ctx: &dyn CtxState, msg: &mut Vec<u8>) -> SecResult<()>;

    /// Unseal a sealed incoming message in place.
    fn unseal(&self, ctx: &dyn CtxState, msg: &mut Vec<u8>) -> SecResult<()>;

    /// Allocate a request buffer of at least `size` bytes.
    fn alloc_reqbuf(&self, size: usize) -> SecResult<Vec<u8>> {
        Ok(vec![0u8; size])
    }

    /// Release a request buffer obtained from `alloc_reqbuf`.
    fn free_reqbuf(&self, _buf: Vec<u8>) {}

    /// Allocate a reply buffer of at least `size` bytes.
    fn alloc_repbuf(&self, size: usize) -> SecResult<Vec<u8>> {
        Ok(vec![0u8; size])
    }

    /// Release a reply buffer obtained from `alloc_repbuf`.
    fn free_repbuf(&self, _buf: Vec<u8>) {}

    /// Grow `buf` in place to at least `newsize` bytes.
    fn enlarge_reqbuf(&self, buf: &mut Vec<u8>, newsize: usize) -> SecResult<()> {
        if buf.len() < newsize {
            buf.resize(newsize, 0);
        }
        Ok(())
    }

    /// Protect a bulk payload before it is shipped alongside the RPC
    /// body. Optional: most flavors below `priv`/`intg` bulk service
    /// leave bulk untouched.
    fn wrap_bulk(&self, _ctx: &dyn CtxState, _bulk: &mut Vec<u8>) -> SecResult<()> {
        Ok(())
    }

    /// Reverse [`Policy::wrap_bulk`] on an incoming bulk payload.
    fn unwrap_bulk(&self, _ctx: &dyn CtxState, _bulk: &mut Vec<u8>) -> SecResult<()> {
        Ok(())
    }

    /// Install a negotiated reverse context, if the mechanism needs one.
    fn install_rctx(&self, _ctx: &dyn CtxState) -> SecResult<()> {
        Ok(())
    }

    /// A short human-readable description of a `CliCtx`, for logging.
    fn display(&self, _ctx: &dyn CtxState) -> Option<String> {
        None
    }

    /// Advance a `NEW` context toward `UPTODATE`. May await an upcall.
    async fn refresh(&self, ctx: &dyn CtxState) -> SecResult<()>;

    /// Whether `ctx` is currently usable without a refresh.
    fn validate(&self, ctx: &dyn CtxState) -> bool;

    /// Tear down a context explicitly (the `die` hook), e.g. on
    /// credential expiry.
    fn die(&self, _ctx: &dyn CtxState) {}

    // ---- server ops ----

    /// Accept an incoming request under this policy, producing (or
    /// reusing) the server-side context it will be served with.
    fn accept(&self, msg: &[u8]) -> SecResult<Arc<dyn CtxState>>;

    /// Authorize an already-accepted request against server policy.
    fn authorize(&self, _ctx: &dyn CtxState) -> SecResult<()> {
        Ok(())
    }

    /// Allocate a reply-state buffer of at least `size` bytes.
    fn alloc_rs(&self, size: usize) -> SecResult<Vec<u8>> {
        Ok(vec![0u8; size])
    }

    /// Release a reply-state buffer obtained from `alloc_rs`.
    fn free_rs(&self, _buf: Vec<u8>) {}

    /// Release server-side context state explicitly.
    fn free_ctx(&self, _ctx: &dyn CtxState) {}

    /// Mark a server-side context invalid, e.g. on credential
    /// revocation.
    fn invalidate_ctx(&self, _ctx: &dyn CtxState) {}

    /// Protect an outgoing bulk reply payload.
    fn wrap_bulk_reply(&self, _ctx: &dyn CtxState, _bulk: &mut Vec<u8>) -> SecResult<()> {
        Ok(())
    }

    /// Reverse [`Policy::wrap_bulk_reply`] on the server's copy of a bulk
    /// payload.
    fn unwrap_bulk_reply(&self, _ctx: &dyn CtxState, _bulk: &mut Vec<u8>) -> SecResult<()> {
        Ok(())
    }

    /// Prepare a bulk descriptor before it is posted for transfer.
    fn prep_bulk(&self, _ctx: &dyn CtxState, _bulk: &mut Vec<u8>) -> SecResult<()> {
        Ok(())
    }
}
