//! The per-connection binding between an RPC client and its current
//! [`Sec`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use fsrpc_core::{Flavor, Part, SecResult};
use fsrpc_policy::{Policy, ReverseSource};
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use crate::sec::Sec;

/// An `Import` holds at most one `Sec` at a time. Swapping installs a new
/// `Sec` and kills the old one without waiting for in-flight requests —
/// they keep their own `Arc<Sec>` reference and complete normally.
pub struct Import {
    current: RwLock<Option<Arc<Sec>>>,
    /// Serializes a full adaptation (`Sec::create` + install) under this
    /// import, the `imp_sec_mutex` analogue.
    adapt_lock: AsyncMutex<()>,
    expire: RwLock<Option<Instant>>,
    deactivated: AtomicBool,
}

impl Default for Import {
    fn default() -> Self {
        Self::new()
    }
}

impl Import {
    /// Build an import with no bound `Sec`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
            adapt_lock: AsyncMutex::new(()),
            expire: RwLock::new(None),
            deactivated: AtomicBool::new(false),
        }
    }

    /// The currently bound `Sec`, if any.
    #[must_use]
    pub fn current_sec(&self) -> Option<Arc<Sec>> {
        self.current.read().expect("import lock poisoned").clone()
    }

    /// Whether this import has been deactivated (the connection is
    /// going away); refresh waits on a deactivated import fail with
    /// `EINTR` rather than retrying.
    #[must_use]
    pub fn is_deactivated(&self) -> bool {
        self.deactivated.load(Ordering::Acquire)
    }

    /// Mark this import deactivated.
    pub fn deactivate(&self) {
        self.deactivated.store(true, Ordering::Release);
    }

    /// Whether `imp_sec_expire` has elapsed, meaning the bound `Sec`
    /// should be lazily re-adapted before the next RPC.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(*self.expire.read().expect("import lock poisoned"), Some(deadline) if deadline <= now)
    }

    /// Set the deadline that triggers lazy adaptation.
    pub fn set_expire(&self, deadline: Instant) {
        *self.expire.write().expect("import lock poisoned") = Some(deadline);
    }

    /// Install `sec` as the current `Sec`, killing whatever was bound
    /// before. Installation happens under the import's own lock, as
    /// required by the data model ("installed into Import under Import
    /// lock").
    fn install(&self, sec: Arc<Sec>) -> Option<Arc<Sec>> {
        let mut guard = self.current.write().expect("import lock poisoned");
        guard.replace(sec)
    }

    /// Create a fresh `Sec` for `flavor` and install it, killing the
    /// previous one. Used both for first-use creation and for explicit
    /// configuration-driven replacement.
    ///
    /// # Errors
    ///
    /// Propagates whatever [`Sec::create`] returns.
    pub fn bind(
        &self,
        policy: Arc<dyn Policy>,
        flavor: Flavor,
        part: Part,
        gc_interval: std::time::Duration,
    ) -> SecResult<Arc<Sec>> {
        let sec = Sec::create(policy, flavor, part, None, gc_interval)?;
        if let Some(old) = self.install(Arc::clone(&sec)) {
            old.kill();
        }
        Ok(sec)
    }

    /// Adapt to `flavor` if the currently bound `Sec` doesn't already
    /// carry it byte-for-byte. No-op (and no lock contention beyond a
    /// read) when the flavor already matches.
    ///
    /// # Errors
    ///
    /// Propagates whatever [`Sec::create`] returns; the previous `Sec`
    /// remains bound if adaptation fails.
    pub async fn adapt(
        &self,
        policy: Arc<dyn Policy>,
        flavor: Flavor,
        part: Part,
        gc_interval: std::time::Duration,
        reverse: Option<ReverseSource>,
    ) -> SecResult<Arc<Sec>> {
        if let Some(current) = self.current_sec() {
            if current.flavor() == flavor {
                return Ok(current);
            }
        }

        let _guard = self.adapt_lock.lock().await;
        // Re-check after acquiring the adapt lock: another task may have
        // already raced us to the same replacement.
        if let Some(current) = self.current_sec() {
            if current.flavor() == flavor {
                return Ok(current);
            }
        }

        info!(flavor = %flavor, "adapting import to new flavor");
        let sec = Sec::create(policy, flavor, part, reverse, gc_interval)?;
        if let Some(old) = self.install(Arc::clone(&sec)) {
            old.kill();
        }
        Ok(sec)
    }
}
