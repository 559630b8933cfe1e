//! Per-import security instance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use fsrpc_core::{Flavor, Part, SecError, SecResult, VfsCred};
use fsrpc_policy::{CtxState, Policy, ReverseSource, SecCreateCtx, SecState};
use tracing::{debug, info, warn};

use crate::ctx::{CliCtx, Lifecycle};

/// Tracks when the cached SELinux policy for this `Sec` should next be
/// refreshed, so concurrent refreshers coalesce onto one helper
/// invocation.
#[derive(Debug, Default)]
struct SepolCache {
    policy: Option<String>,
    fetched_at: Option<Instant>,
    check_next: Option<Instant>,
}

/// A per-import security instance bound to one flavor.
///
/// Owns the per-user [`CliCtx`] cache for that flavor. `Sec` is always
/// held behind an `Arc`; Rust's refcounting gives us "never resurrects
/// once the last ref drops" for free, so there is no explicit `destroy`
/// call — [`Drop`] runs `Policy::destroy_sec` when the last reference
/// disappears.
pub struct Sec {
    policy: Arc<dyn Policy>,
    state: Box<dyn SecState>,
    flavor: Flavor,
    part: Part,
    gc_interval: Duration,
    dying: AtomicBool,
    rpc_count: AtomicU64,
    sepol: RwLock<SepolCache>,
    ctx_cache: RwLock<HashMap<VfsCred, Arc<CliCtx>>>,
}

impl Sec {
    /// Create a new `Sec` for a flavor resolved via `policy`, for the
    /// role `part`. `reverse` is `Some` exactly when this is a reverse
    /// sec being built on the server side to talk back to a client; in
    /// that case `flavor` must already carry the `REVERSE | ROOTONLY`
    /// bits (see [`fsrpc_core::Flavor::as_reverse`]).
    ///
    /// # Errors
    ///
    /// Propagates whatever [`Policy::create_sec`] returns.
    pub fn create(
        policy: Arc<dyn Policy>,
        flavor: Flavor,
        part: Part,
        reverse: Option<ReverseSource>,
        gc_interval: Duration,
    ) -> SecResult<Arc<Self>> {
        let create_ctx = SecCreateCtx {
            flavor,
            part,
            reverse_source: reverse,
        };
        let state = policy.create_sec(&create_ctx)?;
        info!(policy = policy.name(), flavor = %flavor, "sec created");
        Ok(Arc::new(Self {
            policy,
            state,
            flavor,
            part,
            gc_interval,
            dying: AtomicBool::new(false),
            rpc_count: AtomicU64::new(0),
            sepol: RwLock::new(SepolCache::default()),
            ctx_cache: RwLock::new(HashMap::new()),
        }))
    }

    /// The flavor this `Sec` was created for.
    #[must_use]
    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    /// Which role this `Sec` plays.
    #[must_use]
    pub fn part(&self) -> Part {
        self.part
    }

    /// How often this `Sec`'s context cache should be swept.
    #[must_use]
    pub fn gc_interval(&self) -> Duration {
        self.gc_interval
    }

    /// The registered policy this `Sec` was created under.
    #[must_use]
    pub fn policy(&self) -> &Arc<dyn Policy> {
        &self.policy
    }

    /// Whether this `Sec` is dying: no new contexts may be created under
    /// it, though existing ones may complete in-flight requests.
    #[must_use]
    pub fn is_dying(&self) -> bool {
        self.dying.load(Ordering::Acquire)
    }

    /// Number of RPCs this `Sec` has serviced since creation.
    #[must_use]
    pub fn rpc_count(&self) -> u64 {
        self.rpc_count.load(Ordering::Relaxed)
    }

    /// Record one more RPC served under this `Sec`.
    pub fn note_rpc(&self) {
        self.rpc_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Validate that this `Sec` may still hand out contexts.
    ///
    /// # Errors
    ///
    /// Returns [`SecError::AccessDenied`] if the `Sec` is dying.
    pub fn validate_get(&self) -> SecResult<()> {
        if self.is_dying() {
            return Err(SecError::AccessDenied(format!(
                "sec for flavor {} is dying",
                self.flavor
            )));
        }
        Ok(())
    }

    /// Mark this `Sec` as dying: runs the policy's `kill_sec` hook and
    /// force-flushes every cached context. The `Sec` object itself lives
    /// on until its last `Arc` reference drops.
    pub fn kill(&self) {
        if self.dying.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!(flavor = %self.flavor, "sec killed");
        self.policy.kill_sec(self.state.as_ref());
        self.flush_ctx(None, true, true);
    }

    /// Look up (and optionally create) the context for `cred`, consulting
    /// this `Sec`'s cache before delegating to `Policy::lookup_ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`SecError::AccessDenied`] if the `Sec` is dying, or
    /// whatever [`Policy::lookup_ctx`] returns.
    pub fn get_ctx(
        &self,
        cred: VfsCred,
        create: bool,
        remove_dead: bool,
    ) -> SecResult<Arc<CliCtx>> {
        self.validate_get()?;

        if let Some(ctx) = self.ctx_cache.read().expect("ctx cache poisoned").get(&cred) {
            let stale = remove_dead && ctx.lifecycle() == Lifecycle::Dead;
            if !stale {
                return Ok(Arc::clone(ctx));
            }
        }

        let policy_state: Arc<dyn CtxState> =
            self.policy.lookup_ctx(self.state.as_ref(), cred, create, remove_dead)?;
        let reverse = self.flavor.is_reverse();
        let ctx = CliCtx::new(cred, policy_state, reverse);
        self.ctx_cache
            .write()
            .expect("ctx cache poisoned")
            .insert(cred, Arc::clone(&ctx));
        debug!(?cred, "ctx cached under sec");
        Ok(ctx)
    }

    /// Evict whatever context is cached for `cred` and build a fresh one
    /// in its place, used by the refresh loop's dead-context replacement
    /// step.
    ///
    /// # Errors
    ///
    /// Returns [`SecError::AccessDenied`] if this `Sec` is dying, or
    /// whatever [`Policy::lookup_ctx`] returns.
    pub fn replace_ctx(&self, cred: VfsCred) -> SecResult<Arc<CliCtx>> {
        self.ctx_cache.write().expect("ctx cache poisoned").remove(&cred);
        self.get_ctx(cred, true, false)
    }

    /// Flush cached contexts for `uid` (`None` means every user).
    /// `grace` removes entries from the cache so future lookups build
    /// fresh ones, while letting already-referenced `Arc`s drain
    /// naturally; `force` additionally marks matching contexts dead and
    /// wakes their waiters immediately, even if still externally held.
    pub fn flush_ctx(&self, uid: Option<u32>, grace: bool, force: bool) {
        let mut cache = self.ctx_cache.write().expect("ctx cache poisoned");
        let matches = |cred: &VfsCred| uid.map_or(true, |u| cred.uid() == u);

        let matched: Vec<VfsCred> = cache.keys().copied().filter(matches).collect();
        for cred in &matched {
            if let Some(ctx) = cache.get(cred) {
                if force {
                    ctx.set_lifecycle(Lifecycle::Dead);
                }
            }
            if grace || force {
                cache.remove(cred);
            }
        }
    }

    /// Whether the cached SELinux policy needs a refresh, advancing the
    /// "check next" deadline under the Sec-level lock so concurrent
    /// refreshers coalesce onto a single fetch. `send_sepol < 0` forces
    /// every call to report due; `send_sepol == 0` disables the
    /// exchange entirely.
    #[must_use]
    pub fn sepol_due(&self, send_sepol: i64, now: Instant) -> bool {
        if send_sepol == 0 {
            return false;
        }
        if send_sepol < 0 {
            return true;
        }
        let mut cache = self.sepol.write().expect("sepol cache poisoned");
        match cache.check_next {
            Some(next) if next > now => false,
            _ => {
                cache.check_next = Some(now + Duration::from_secs(send_sepol as u64));
                true
            }
        }
    }

    /// Record a freshly fetched SELinux policy string.
    pub fn set_sepol(&self, policy: String, now: Instant) {
        let mut cache = self.sepol.write().expect("sepol cache poisoned");
        cache.policy = Some(policy);
        cache.fetched_at = Some(now);
    }

    /// The last fetched SELinux policy string, if any.
    #[must_use]
    pub fn sepol(&self) -> Option<String> {
        self.sepol.read().expect("sepol cache poisoned").policy.clone()
    }
}

impl Drop for Sec {
    fn drop(&mut self) {
        self.policy.destroy_sec(self.state.as_ref());
        debug!(flavor = %self.flavor, "sec destroyed");
    }
}
