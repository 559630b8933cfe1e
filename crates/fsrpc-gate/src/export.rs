//! Server-side acceptance of incoming requests against an export's
//! flavor history.

use std::time::{Duration, Instant};

use fsrpc_core::{Flavor, SecError, SecResult};
use tracing::{info, warn};

/// Lifetime assigned to a pending (not yet rotated-in) flavor change —
/// long enough that it never lapses on its own; a pending change is
/// cleared by rotation, not by expiry.
const PENDING_ROTATION_HORIZON: Duration = Duration::from_secs(315_360_000);

/// A historical flavor an export still accepts, bounded by an expiry
/// past which it is zeroed and no longer honored.
#[derive(Debug, Clone, Copy)]
struct Historical {
    flavor: Flavor,
    expires_at: Instant,
}

impl Historical {
    fn remaining(self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }

    fn is_live(self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Describes the request being checked against an export's flavor set.
#[derive(Debug, Clone, Copy)]
pub struct GateRequest {
    /// The flavor the incoming request was wrapped under.
    pub flavor: Flavor,
    /// Whether this is a context-establishment RPC. Like `is_ctx_fini`,
    /// this relaxes flavor acceptance to a policy+mechanism match
    /// instead of requiring the full flavor to agree, since the init
    /// exchange itself is what negotiates the service class.
    pub is_ctx_init: bool,
    /// Whether this is a context-teardown RPC, which always passes
    /// regardless of flavor.
    pub is_ctx_fini: bool,
    /// Whether this is the root packet of a GSS context-init exchange,
    /// which may trigger installing a reverse security context.
    pub is_gss_root_init: bool,
}

/// What the caller should do after a request clears the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    /// Whether a reverse security context should now be installed (a
    /// GSS root init arriving on the current, or newly rotated, flavor).
    pub install_reverse_ctx: bool,
}

/// One export's flavor acceptance state: a current flavor, up to two
/// historical flavors with independent expiries, and the edge flags
/// that drive rotation.
#[derive(Debug, Clone)]
pub struct Export {
    has_reverse_import: bool,
    current: Flavor,
    old: [Option<Historical>; 2],
    changed: bool,
    adapt: bool,
}

impl Export {
    /// Build an export bound to `current`, with no historical flavors
    /// and no reverse import (gate checks are transparent until one is
    /// attached via [`Export::attach_reverse_import`]).
    #[must_use]
    pub fn new(current: Flavor) -> Self {
        Self {
            has_reverse_import: false,
            current,
            old: [None, None],
            changed: false,
            adapt: false,
        }
    }

    /// Attach a reverse import, enabling flavor enforcement. Exports
    /// without one are transparent (step 1 of the gate algorithm).
    pub fn attach_reverse_import(&mut self) {
        self.has_reverse_import = true;
    }

    /// The currently accepted flavor.
    #[must_use]
    pub fn current(&self) -> Flavor {
        self.current
    }

    /// The historical flavor in slot `index` (0 or 1), if still live.
    #[must_use]
    pub fn historical(&self, index: usize) -> Option<Flavor> {
        self.old[index].map(|h| h.flavor)
    }

    /// Record a configuration-driven flavor change: `new_flavor` becomes
    /// acceptable as of the next matching request, without immediately
    /// evicting the current flavor — existing connections keep working
    /// until the gate actually rotates. `adapt` marks whether the
    /// rotation itself should trigger a reverse-sec adaptation even for
    /// non-GSS-root-init traffic.
    pub fn begin_change(&mut self, new_flavor: Flavor, adapt: bool) {
        self.old[1] = Some(Historical {
            flavor: new_flavor,
            expires_at: Instant::now() + PENDING_ROTATION_HORIZON,
        });
        self.changed = true;
        self.adapt = adapt;
    }

    /// Check an incoming request against this export's flavor set,
    /// mutating the export's history if the request triggers a
    /// rotation.
    ///
    /// # Errors
    ///
    /// Returns [`SecError::AccessDenied`] if the request's flavor
    /// matches neither the current flavor nor a still-live historical
    /// one; the error message names both historical flavors and their
    /// remaining lifetimes, per the diagnostic requirement in the
    /// design.
    pub fn check(
        &mut self,
        req: &GateRequest,
        now: Instant,
        update_expire: Duration,
    ) -> SecResult<GateDecision> {
        // Step 1: no reverse import, transparent.
        if !self.has_reverse_import {
            return Ok(GateDecision {
                install_reverse_ctx: false,
            });
        }

        // Step 2: context-teardown RPCs always pass.
        if req.is_ctx_fini {
            return Ok(GateDecision {
                install_reverse_ctx: false,
            });
        }

        let negotiating = req.is_ctx_init || req.is_gss_root_init || req.is_ctx_fini;

        // Step 3: pending rotation, request matches the incoming flavor.
        if self.changed {
            if let Some(incoming) = self.old[1] {
                if incoming.flavor.accepts(req.flavor, negotiating) {
                    self.old[0] = Some(Historical {
                        flavor: self.current,
                        expires_at: now + update_expire,
                    });
                    self.old[1] = None;
                    self.current = req.flavor;
                    let trigger_adapt = self.adapt;
                    self.changed = false;
                    self.adapt = false;
                    info!(new = %self.current, "export flavor rotated");
                    return Ok(GateDecision {
                        install_reverse_ctx: req.is_gss_root_init || trigger_adapt,
                    });
                }
            }
        }

        // Step 4: request matches the current flavor.
        if self.current.accepts(req.flavor, negotiating) {
            return Ok(GateDecision {
                install_reverse_ctx: req.is_gss_root_init,
            });
        }

        // Step 5: try each historical flavor while it's still live.
        for slot in 0..2 {
            if let Some(historical) = self.old[slot] {
                if !historical.is_live(now) {
                    self.old[slot] = None;
                    continue;
                }
                if historical.flavor.accepts(req.flavor, negotiating) {
                    return Ok(GateDecision {
                        install_reverse_ctx: false,
                    });
                }
            }
        }

        // Step 6: reject, with both historical flavors' remaining
        // lifetimes in the diagnostic.
        let old0 = self.old[0].map_or("none".to_string(), |h| {
            format!("{} ({:?} left)", h.flavor, h.remaining(now))
        });
        let old1 = self.old[1].map_or("none".to_string(), |h| {
            format!("{} ({:?} left)", h.flavor, h.remaining(now))
        });
        warn!(requested = %req.flavor, current = %self.current, old0, old1, "export rejected flavor");
        Err(SecError::AccessDenied(format!(
            "flavor {} not accepted: current={}, old[0]={old0}, old[1]={old1}",
            req.flavor, self.current
        )))
    }
}
