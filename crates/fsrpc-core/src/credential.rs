//! The per-request credential used to look up a client security context.

use crate::flavor::Flavor;

/// The uid/gid pair a `CliCtx` lookup is keyed on.
///
/// Built from the caller's effective uid/gid, except when the governing
/// [`Flavor`] carries the `REVERSE` or `ROOTONLY` bit: those contexts are
/// shared by every user on the node, so the lookup always uses uid 0
/// regardless of who actually issued the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VfsCred {
    uid: u32,
    gid: u32,
}

impl VfsCred {
    /// Build the lookup credential for `flavor` from the caller's real
    /// uid/gid, collapsing to root for reverse or root-only flavors.
    #[must_use]
    pub fn for_flavor(flavor: Flavor, uid: u32, gid: u32) -> Self {
        if flavor.is_reverse() || flavor.is_root_only() {
            Self { uid: 0, gid: 0 }
        } else {
            Self { uid, gid }
        }
    }

    /// A credential for uid/gid `0`, used for reverse and root-only
    /// contexts and for the well-known root lookup during `Sec` creation.
    #[must_use]
    pub const fn root() -> Self {
        Self { uid: 0, gid: 0 }
    }

    /// The effective uid.
    #[must_use]
    pub const fn uid(self) -> u32 {
        self.uid
    }

    /// The effective gid.
    #[must_use]
    pub const fn gid(self) -> u32 {
        self.gid
    }

    /// Whether this credential identifies root.
    #[must_use]
    pub const fn is_root(self) -> bool {
        self.uid == 0
    }
}
