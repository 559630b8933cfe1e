//! Process-wide tunables for the RPC security layer.
//!
//! Loaded once at startup from a TOML file (or [`SecurityConfig::default`]
//! if none is given) and then shared read-only via `Arc` by every other
//! crate — nothing here changes at runtime.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{SecError, SecResult};

/// Config files larger than this are rejected outright rather than parsed.
const MAX_CONFIG_FILE_SIZE: u64 = 65_536;

/// Process-wide security tunables, loaded once and shared read-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SecurityConfig {
    /// Whether to attach the caller's SELinux policy info to outgoing
    /// requests (`send_sepol`). Disabled by default since most deployments
    /// don't run SELinux-aware servers.
    pub send_sepol: bool,

    /// Default timeout for a blocking context refresh, in seconds.
    pub rpc_timeout_secs: u64,

    /// How often the security-context garbage collector sweeps dead and
    /// expired contexts, in seconds.
    pub gc_interval_secs: u64,

    /// How long an export's just-replaced flavor stays valid as a fallback
    /// after a flavor change, in seconds. Mirrors `EXP_FLVR_UPDATE_EXPIRE`.
    pub flavor_update_expire_secs: u64,

    /// Maximum number of client contexts cached per `Sec` before the
    /// least-recently-used ones are reclaimed.
    pub ctx_cache_max: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            send_sepol: false,
            rpc_timeout_secs: 30,
            gc_interval_secs: 60,
            flavor_update_expire_secs: 120,
            ctx_cache_max: 256,
        }
    }
}

impl SecurityConfig {
    /// The default refresh timeout as a [`Duration`].
    #[must_use]
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// The context GC sweep interval as a [`Duration`].
    #[must_use]
    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }

    /// The flavor-update grace period as a [`Duration`].
    #[must_use]
    pub fn flavor_update_expire(&self) -> Duration {
        Duration::from_secs(self.flavor_update_expire_secs)
    }

    /// Load configuration from a TOML file, falling back to defaults for
    /// any field the file does not set.
    ///
    /// # Errors
    ///
    /// Returns [`SecError::Config`] if the file cannot be read, exceeds
    /// [`MAX_CONFIG_FILE_SIZE`], or fails to parse.
    pub fn load_file(path: &Path) -> SecResult<Self> {
        let metadata = std::fs::metadata(path)
            .map_err(|e| SecError::Config(format!("{}: {e}", path.display())))?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(SecError::Config(format!(
                "{} is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                path.display(),
                metadata.len()
            )));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| SecError::Config(format!("{}: {e}", path.display())))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| SecError::Config(format!("{}: {e}", path.display())))?;

        debug!(path = %path.display(), "loaded security config");
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants that `serde`'s per-field defaults
    /// can't express.
    ///
    /// # Errors
    ///
    /// Returns [`SecError::Config`] if the GC interval is zero (that would
    /// busy-loop the context reaper) or the timeout is zero.
    pub fn validate(&self) -> SecResult<()> {
        if self.gc_interval_secs == 0 {
            return Err(SecError::Config(
                "gc_interval_secs must be nonzero".to_string(),
            ));
        }
        if self.rpc_timeout_secs == 0 {
            return Err(SecError::Config(
                "rpc_timeout_secs must be nonzero".to_string(),
            ));
        }
        if self.send_sepol {
            warn!("send_sepol is enabled; outgoing requests will carry SELinux policy info");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(SecurityConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_gc_interval_is_rejected() {
        let cfg = SecurityConfig {
            gc_interval_secs: 0,
            ..SecurityConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(SecError::Config(_))));
    }

    #[test]
    fn load_file_applies_partial_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("security.toml");
        std::fs::write(&path, "rpc_timeout_secs = 5\n").unwrap();

        let config = SecurityConfig::load_file(&path).unwrap();
        assert_eq!(config.rpc_timeout_secs, 5);
        assert_eq!(config.gc_interval_secs, SecurityConfig::default().gc_interval_secs);
    }

    #[test]
    fn oversized_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.toml");
        let data = format!("# {}", "a".repeat(100_000));
        std::fs::write(&path, data).unwrap();

        assert!(matches!(
            SecurityConfig::load_file(&path),
            Err(SecError::Config(_))
        ));
    }

    #[test]
    fn missing_file_is_config_error() {
        assert!(matches!(
            SecurityConfig::load_file(Path::new("/nonexistent/security.toml")),
            Err(SecError::Config(_))
        ));
    }
}
