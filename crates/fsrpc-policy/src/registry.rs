//! The process-wide policy table.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use fsrpc_core::flavor::policy_numbers;
use fsrpc_core::{SecError, SecResult};
use tracing::{debug, info, warn};

use crate::policy::Policy;

/// Upper bound on registered wire-policy numbers, mirroring
/// `SPTLRPC_POLICY_MAX`.
pub const POLICY_MAX: usize = 16;

/// A registered policy is resolved on demand the first time a flavor
/// referencing it is seen. This hook stands in for "try to load the GSS
/// kernel module": a deployment might dlopen a mechanism plugin, spawn a
/// helper process, or simply be a no-op if every policy is registered at
/// startup.
pub trait PolicyLoader: Send + Sync {
    /// Attempt to bring the policy registered under `policy_number` into
    /// the registry. Called at most once per process per unresolved
    /// policy number.
    fn load(&self, policy_number: u16) -> SecResult<()>;
}

/// A loader that never succeeds — the right default when every policy a
/// deployment uses is registered up front and on-demand loading isn't
/// wired to anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLoader;

impl PolicyLoader for NullLoader {
    fn load(&self, policy_number: u16) -> SecResult<()> {
        Err(SecError::PolicyNotLoaded(policy_number))
    }
}

/// Fixed-size table of registered policies, indexed by wire-policy
/// number. Mirrors `policies[SPTLRPC_POLICY_MAX]` guarded by a single
/// `policy_lock`.
pub struct Registry {
    slots: RwLock<[Option<Arc<dyn Policy>>; POLICY_MAX]>,
    loaded_once: AtomicBool,
    loader: Arc<dyn PolicyLoader>,
    dynamic_policy_number: u16,
}

impl Registry {
    /// Build an empty registry using `loader` for on-demand resolution,
    /// gated to firing only for `dynamic_policy_number` — the one
    /// policy number a miss on is allowed to trigger a load, mirroring
    /// the original condition that a resolve miss retries only when the
    /// requested policy is the GSS policy.
    #[must_use]
    pub fn new(loader: Arc<dyn PolicyLoader>, dynamic_policy_number: u16) -> Self {
        Self {
            slots: RwLock::new(std::array::from_fn(|_| None)),
            loaded_once: AtomicBool::new(false),
            loader,
            dynamic_policy_number,
        }
    }

    /// Build a registry whose on-demand loader fires only for the GSS
    /// policy number, matching the original's `flavor->sf_rpc` check.
    #[must_use]
    pub fn with_gss_loader(loader: Arc<dyn PolicyLoader>) -> Self {
        Self::new(loader, policy_numbers::GSS)
    }

    /// Build an empty registry with no on-demand loading.
    #[must_use]
    pub fn without_loader() -> Self {
        Self::new(Arc::new(NullLoader), policy_numbers::GSS)
    }

    /// Register `policy` under its own `policy_number`.
    ///
    /// # Errors
    ///
    /// Returns [`SecError::InvalidFlavor`] if the policy number is out of
    /// range, or [`SecError::AccessDenied`] if the slot is already
    /// occupied (duplicate registration).
    pub fn register(&self, policy: Arc<dyn Policy>) -> SecResult<()> {
        let number = policy.policy_number();
        let index = Self::slot_index(number)?;
        let mut slots = self.slots.write().expect("policy table lock poisoned");
        if slots[index].is_some() {
            return Err(SecError::AccessDenied(format!(
                "policy {number} already registered"
            )));
        }
        info!(policy = policy.name(), number, "registered policy");
        slots[index] = Some(policy);
        Ok(())
    }

    /// Unregister the policy at `policy_number`, asserting it is exactly
    /// `expected` (never tears down a policy another registration has
    /// since replaced).
    ///
    /// # Panics
    ///
    /// Panics if the slot does not hold `expected` — an unregister
    /// racing a registration is a bug in the caller, not a runtime
    /// condition to recover from.
    pub fn unregister(&self, expected: &Arc<dyn Policy>) {
        let number = expected.policy_number();
        let Ok(index) = Self::slot_index(number) else {
            return;
        };
        let mut slots = self.slots.write().expect("policy table lock poisoned");
        match &slots[index] {
            Some(current) if Arc::ptr_eq(current, expected) => {
                debug!(policy = expected.name(), number, "unregistered policy");
                slots[index] = None;
            }
            _ => panic!("unregister called with a policy that no longer occupies its slot"),
        }
    }

    /// Resolve the policy registered under `policy_number`, attempting a
    /// one-shot on-demand load if the slot is empty.
    ///
    /// # Errors
    ///
    /// Returns [`SecError::InvalidFlavor`] if `policy_number` is out of
    /// range, or [`SecError::PolicyNotLoaded`] if the slot is empty after
    /// the retry.
    pub fn resolve(&self, policy_number: u16) -> SecResult<Arc<dyn Policy>> {
        let index = Self::slot_index(policy_number)?;

        if let Some(policy) = self.read_slot(index) {
            return Ok(policy);
        }

        if policy_number == self.dynamic_policy_number
            && self
                .loaded_once
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            if let Err(err) = self.loader.load(policy_number) {
                warn!(policy_number, error = %err, "on-demand policy load failed");
            }
        }

        self.read_slot(index)
            .ok_or(SecError::PolicyNotLoaded(policy_number))
    }

    fn read_slot(&self, index: usize) -> Option<Arc<dyn Policy>> {
        self.slots
            .read()
            .expect("policy table lock poisoned")
            .get(index)
            .and_then(Clone::clone)
    }

    fn slot_index(policy_number: u16) -> SecResult<usize> {
        let index = usize::from(policy_number);
        if index >= POLICY_MAX {
            return Err(SecError::InvalidFlavor(policy_number));
        }
        Ok(index)
    }
}
