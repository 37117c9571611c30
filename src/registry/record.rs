// src/registry/record.rs

//! Per-module record and lifecycle state

use crate::manifest::Manifest;
use crate::registry::ModuleId;
use crate::resolver::Wiring;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum_macros::Display;

/// Module lifecycle states
///
/// `Uninstalled` is terminal. A fragment's state mirrors its attachment: it
/// is `Resolved` exactly while attached to a resolved host and never enters
/// the start states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleState {
    Installed,
    Resolved,
    Starting,
    Active,
    Stopping,
    Uninstalled,
}

impl ModuleState {
    /// Returns true if `start` may begin from this state
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Installed | Self::Resolved)
    }

    /// Returns true if the module is in a start state and `stop` applies
    pub fn can_stop(&self) -> bool {
        matches!(self, Self::Active | Self::Starting)
    }
}

/// Snapshot record for one installed module
///
/// Records are immutable once published; mutations go through the
/// registry's copy-on-write `update`.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    pub id: ModuleId,
    /// Opaque installation source identifier
    pub location: String,
    pub manifest: Manifest,
    pub state: ModuleState,
    /// For attached fragments, the host module
    pub host: Option<ModuleId>,
    /// For hosts, the currently attached fragments
    pub fragments: Vec<ModuleId>,
    /// Current resolved wiring; replaced wholesale, never patched
    pub wiring: Option<Arc<Wiring>>,
    /// Set once the module's old exports survive an update/uninstall and a
    /// refresh is needed before it participates in resolution again
    pub removal_pending: bool,
    /// Lazily started and waiting for a triggering class load
    pub lazy_pending: bool,
}

impl ModuleRecord {
    pub(crate) fn new(id: ModuleId, location: String, manifest: Manifest) -> Self {
        Self {
            id,
            location,
            manifest,
            state: ModuleState::Installed,
            host: None,
            fragments: Vec::new(),
            wiring: None,
            removal_pending: false,
            lazy_pending: false,
        }
    }

    pub fn symbolic_name(&self) -> &str {
        &self.manifest.symbolic_name
    }

    pub fn version(&self) -> &Version {
        &self.manifest.version
    }

    pub fn is_fragment(&self) -> bool {
        self.manifest.is_fragment()
    }

    /// A module participates in resolution unless it is gone or carries
    /// stale exports awaiting refresh
    pub fn is_resolvable(&self) -> bool {
        self.state != ModuleState::Uninstalled && !self.removal_pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions_guards() {
        assert!(ModuleState::Installed.can_start());
        assert!(ModuleState::Resolved.can_start());
        assert!(!ModuleState::Active.can_start());
        assert!(!ModuleState::Uninstalled.can_start());

        assert!(ModuleState::Active.can_stop());
        assert!(ModuleState::Starting.can_stop());
        assert!(!ModuleState::Resolved.can_stop());
    }

    #[test]
    fn test_state_display_matches_event_vocabulary() {
        assert_eq!(ModuleState::Installed.to_string(), "INSTALLED");
        assert_eq!(ModuleState::Uninstalled.to_string(), "UNINSTALLED");
    }
}
