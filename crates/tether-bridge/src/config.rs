//! Bridge configuration
//!
//! Installed once together with the native interface. Can be built in code or
//! loaded from a RON file:
//!
//! ```ron
//! (
//!     compat_policy: Strict,
//!     track_freed_rids: true,
//!     freed_rid_capacity: 4096,
//!     check_instance_liveness: false,
//! )
//! ```

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What to do when the native side does not know a method's exact hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CompatPolicy {
    /// Only exact hash matches resolve
    Strict,
    /// Accept compatibility shims the native side registered for older hashes
    #[default]
    Compatible,
    /// Also re-resolve against the native side's current hash, with a warning
    Lenient,
}

pub const DEFAULT_FREED_RID_CAPACITY: usize = 4096;

/// Knobs that change how the bridge enforces its contracts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Hash fallback behaviour during method resolution
    pub compat_policy: CompatPolicy,
    /// Remember freed resource ids so reuse is caught at the call site
    pub track_freed_rids: bool,
    /// How many freed ids to remember; the oldest are forgotten first
    pub freed_rid_capacity: usize,
    /// Check a proxy's instance id against the native side before each use
    pub check_instance_liveness: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            compat_policy: CompatPolicy::default(),
            track_freed_rids: true,
            freed_rid_capacity: DEFAULT_FREED_RID_CAPACITY,
            check_instance_liveness: cfg!(debug_assertions),
        }
    }
}

impl BridgeConfig {
    /// Parse a config from RON text; missing fields keep their defaults
    pub fn from_ron_str(text: &str) -> Result<Self> {
        Ok(ron::from_str(text)?)
    }

    /// Load a config from a RON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron_str(&text)
    }

    pub fn with_compat_policy(mut self, policy: CompatPolicy) -> Self {
        self.compat_policy = policy;
        self
    }

    pub fn with_rid_tracking(mut self, enabled: bool) -> Self {
        self.track_freed_rids = enabled;
        self
    }

    pub fn with_freed_rid_capacity(mut self, capacity: usize) -> Self {
        self.freed_rid_capacity = capacity;
        self
    }

    pub fn with_liveness_checks(mut self, enabled: bool) -> Self {
        self.check_instance_liveness = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.compat_policy, CompatPolicy::Compatible);
        assert!(config.track_freed_rids);
        assert_eq!(config.freed_rid_capacity, DEFAULT_FREED_RID_CAPACITY);
    }

    #[test]
    fn test_parse_partial_ron() {
        let config = BridgeConfig::from_ron_str("(compat_policy: Lenient)").unwrap();
        assert_eq!(config.compat_policy, CompatPolicy::Lenient);
        assert!(config.track_freed_rids);
    }

    #[test]
    fn test_parse_full_ron() {
        let text = r#"(
            compat_policy: Strict,
            track_freed_rids: false,
            freed_rid_capacity: 128,
            check_instance_liveness: true,
        )"#;
        let config = BridgeConfig::from_ron_str(text).unwrap();
        assert_eq!(
            config,
            BridgeConfig::default()
                .with_compat_policy(CompatPolicy::Strict)
                .with_rid_tracking(false)
                .with_freed_rid_capacity(128)
                .with_liveness_checks(true)
        );
    }

    #[test]
    fn test_ron_roundtrip() {
        let config = BridgeConfig::default().with_compat_policy(CompatPolicy::Strict);
        let text = ron::to_string(&config).unwrap();
        assert_eq!(BridgeConfig::from_ron_str(&text).unwrap(), config);
    }

    #[test]
    fn test_bad_ron_is_config_error() {
        let err = BridgeConfig::from_ron_str("(compat_policy: Sometimes)").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = BridgeConfig::load("/nonexistent/tether.ron").unwrap_err();
        assert!(matches!(err, BridgeError::Io(_)));
    }
}
