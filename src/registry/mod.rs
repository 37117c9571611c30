// src/registry/mod.rs

//! Authoritative module table
//!
//! The registry owns the `ModuleId -> ModuleRecord` map. Ids are assigned
//! monotonically and never reused, including across uninstall. Records are
//! immutable snapshots behind `Arc`: mutations clone the record, apply the
//! change, and swap the `Arc`, so readers always observe a consistent view
//! without holding the write lock.

mod record;

pub use record::{ModuleRecord, ModuleState};

use crate::error::{Error, Result};
use crate::manifest::Manifest;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Unique module identifier, assigned at install time
pub type ModuleId = u64;

/// The authoritative table of installed modules
pub struct Registry {
    modules: RwLock<BTreeMap<ModuleId, Arc<ModuleRecord>>>,
    next_id: AtomicU64,
}

impl Registry {
    /// Create an empty registry; the first installed module gets id 1
    pub fn new() -> Self {
        Self {
            modules: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Insert a freshly installed module and return its record
    pub fn install(&self, location: &str, manifest: Manifest) -> Arc<ModuleRecord> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = Arc::new(ModuleRecord::new(id, location.to_string(), manifest));

        let mut modules = self.modules.write();
        modules.insert(id, record.clone());
        debug!(id, location, name = %record.symbolic_name(), "module installed");
        record
    }

    /// Look up a module by id
    pub fn get(&self, id: ModuleId) -> Option<Arc<ModuleRecord>> {
        self.modules.read().get(&id).cloned()
    }

    /// Look up a module by id, failing with `NotFound`
    pub fn require(&self, id: ModuleId) -> Result<Arc<ModuleRecord>> {
        self.get(id).ok_or(Error::NotFound(id))
    }

    /// Find a non-uninstalled module installed from the given location
    pub fn find_by_location(&self, location: &str) -> Option<Arc<ModuleRecord>> {
        self.modules
            .read()
            .values()
            .find(|r| r.location == location && r.state != ModuleState::Uninstalled)
            .cloned()
    }

    /// Apply a copy-on-write mutation to one record
    pub fn update<F>(&self, id: ModuleId, mutate: F) -> Result<Arc<ModuleRecord>>
    where
        F: FnOnce(&mut ModuleRecord),
    {
        let mut modules = self.modules.write();
        let current = modules.get(&id).ok_or(Error::NotFound(id))?;

        let mut next = (**current).clone();
        mutate(&mut next);
        let next = Arc::new(next);
        modules.insert(id, next.clone());
        Ok(next)
    }

    /// Remove a record entirely (only valid after uninstall + refresh)
    pub fn remove(&self, id: ModuleId) -> Option<Arc<ModuleRecord>> {
        let removed = self.modules.write().remove(&id);
        if removed.is_some() {
            debug!(id, "module record removed");
        }
        removed
    }

    /// Immutable point-in-time view of every record
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            modules: self.modules.read().clone(),
        }
    }

    /// All module ids, ascending
    pub fn ids(&self) -> Vec<ModuleId> {
        self.modules.read().keys().copied().collect()
    }

    /// Number of records (including uninstalled ones pending refresh)
    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    /// True if no modules are installed
    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// A consistent snapshot of the registry, used by the resolver
#[derive(Clone)]
pub struct RegistrySnapshot {
    pub modules: BTreeMap<ModuleId, Arc<ModuleRecord>>,
}

impl RegistrySnapshot {
    pub fn get(&self, id: ModuleId) -> Option<&Arc<ModuleRecord>> {
        self.modules.get(&id)
    }

    /// Iterate records in id order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ModuleRecord>> {
        self.modules.values()
    }

    /// Modules whose current wiring references `id` as a provider, plus
    /// fragments attached to it. These are the modules a refresh of `id`
    /// must tear down.
    pub fn dependents_of(&self, id: ModuleId) -> Vec<ModuleId> {
        let mut out = Vec::new();
        for record in self.modules.values() {
            if record.id == id {
                continue;
            }
            let wired = record.wiring.as_ref().is_some_and(|w| {
                w.imports.iter().any(|p| p.exporter == id)
                    || w.required.iter().any(|r| r.provider == id)
            });
            if wired || record.host == Some(id) {
                out.push(record.id);
            }
        }
        out
    }

    /// True if any other module's wiring references `id` as a provider
    pub fn has_importers(&self, id: ModuleId) -> bool {
        self.modules.values().any(|record| {
            record.id != id
                && record.wiring.as_ref().is_some_and(|w| {
                    w.imports.iter().any(|p| p.exporter == id)
                        || w.required.iter().any(|r| r.provider == id)
                })
        })
    }
}
