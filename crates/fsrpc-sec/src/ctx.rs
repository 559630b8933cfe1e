//! Per-(Sec, user) authentication/encryption state.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use fsrpc_core::VfsCred;
use fsrpc_policy::CtxState;
use tokio::sync::Notify;
use tracing::debug;

/// Identifies one in-flight request waiting on a context refresh, so it
/// can be found and removed from the waiter list on cancellation or
/// completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    /// Allocate a fresh, process-unique request id.
    #[must_use]
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// The lifecycle state of a [`CliCtx`]. `Reverse`/`Eternal` from the data
/// model are orthogonal flags (set once at construction) rather than
/// lifecycle states, since a context can be eternal *and* currently
/// `UpToDate` at the same time; see [`CliCtx::is_eternal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Freshly created; needs a `refresh` before use.
    New,
    /// Refreshed and currently usable.
    UpToDate,
    /// Killed or expired; callers must switch to a fresh context.
    Dead,
    /// Refresh failed terminally; callers must switch to a fresh context.
    Error,
}

/// Per-(Sec, `vfs_cred`) authentication/encryption context.
///
/// The waiter mechanism required by the refresh algorithm is a
/// [`Notify`] broadcast on every lifecycle transition, plus an explicit
/// waiter list so a caller can report which requests were pending and
/// remove itself precisely, per the `cc_req_list` invariant.
pub struct CliCtx {
    cred: VfsCred,
    policy_state: Arc<dyn CtxState>,
    reverse: bool,
    lifecycle: Mutex<Lifecycle>,
    waiters: Mutex<Vec<RequestId>>,
    notify: Notify,
    refreshing: AtomicBool,
}

impl fmt::Debug for CliCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CliCtx")
            .field("cred", &self.cred)
            .field("reverse", &self.reverse)
            .field("lifecycle", &*self.lifecycle.lock().expect("ctx lock poisoned"))
            .finish_non_exhaustive()
    }
}

impl CliCtx {
    /// Build a new context in state `New`, unless the policy-private
    /// state reports itself eternal, in which case it starts `UpToDate`
    /// and never needs a refresh.
    #[must_use]
    pub fn new(cred: VfsCred, policy_state: Arc<dyn CtxState>, reverse: bool) -> Arc<Self> {
        let initial = if policy_state.is_eternal() {
            Lifecycle::UpToDate
        } else {
            Lifecycle::New
        };
        Arc::new(Self {
            cred,
            policy_state,
            reverse,
            lifecycle: Mutex::new(initial),
            waiters: Mutex::new(Vec::new()),
            notify: Notify::new(),
            refreshing: AtomicBool::new(false),
        })
    }

    /// The credential this context was looked up under.
    #[must_use]
    pub fn cred(&self) -> VfsCred {
        self.cred
    }

    /// The policy-private state backing this context.
    #[must_use]
    pub fn policy_state(&self) -> &Arc<dyn CtxState> {
        &self.policy_state
    }

    /// Whether this is a reverse-sec context (server talking back to a
    /// client using credentials taken from the inbound request).
    #[must_use]
    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    /// Whether this context is eternal: it skips refresh and is always
    /// ready, regardless of its nominal lifecycle state.
    #[must_use]
    pub fn is_eternal(&self) -> bool {
        self.policy_state.is_eternal()
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock().expect("ctx lock poisoned")
    }

    /// Whether the context is ready to wrap/unwrap without a refresh:
    /// eternal, or lifecycle `UpToDate`.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.is_eternal() || self.lifecycle() == Lifecycle::UpToDate
    }

    /// Transition the lifecycle state and wake every waiter. Eternal
    /// contexts ignore transitions away from `UpToDate` other than
    /// `Dead` (an eternal context can still be explicitly killed).
    pub fn set_lifecycle(&self, next: Lifecycle) {
        {
            let mut guard = self.lifecycle.lock().expect("ctx lock poisoned");
            *guard = next;
        }
        debug!(cred = ?self.cred, ?next, "ctx lifecycle transition");
        self.notify.notify_waiters();
    }

    /// Register `request` as waiting on this context's next transition.
    pub fn add_waiter(&self, request: RequestId) {
        self.waiters
            .lock()
            .expect("ctx lock poisoned")
            .push(request);
    }

    /// Remove `request` from the waiter list, e.g. on cancellation or
    /// once the wait resolves. No-op if it isn't present.
    pub fn remove_waiter(&self, request: RequestId) {
        self.waiters
            .lock()
            .expect("ctx lock poisoned")
            .retain(|&id| id != request);
    }

    /// The requests currently recorded as waiting on this context.
    #[must_use]
    pub fn waiters(&self) -> Vec<RequestId> {
        self.waiters.lock().expect("ctx lock poisoned").clone()
    }

    /// Attempt to become the single task responsible for driving this
    /// context's refresh upcall. Returns `true` exactly once per
    /// `New`→non-`New` cycle; every other concurrent caller gets `false`
    /// and should wait for a transition instead (step 9 of the refresh
    /// algorithm).
    pub fn try_start_refresh(&self) -> bool {
        self.refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the refresh-driver role taken by [`CliCtx::try_start_refresh`].
    pub fn finish_refresh(&self) {
        self.refreshing.store(false, Ordering::Release);
    }

    /// Wait until the next lifecycle transition, bounded by `timeout`.
    /// Returns `true` if a transition was observed before the deadline.
    pub async fn wait_for_transition(&self, timeout: std::time::Duration) -> bool {
        tokio::time::timeout(timeout, self.notify.notified())
            .await
            .is_ok()
    }
}
