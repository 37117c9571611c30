// src/resolver/wiring.rs

//! Resolved wiring data structures
//!
//! A `Wiring` is the immutable record of how one module's requirements were
//! bound at resolution time. It is replaced wholesale on re-resolution; an
//! old wiring stays valid for modules still referencing it until a refresh
//! tears them down.

use crate::registry::{ModuleId, RegistrySnapshot};
use semver::Version;

/// One package import bound to a concrete exporter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageWire {
    pub package: String,
    /// Version actually exported by the chosen provider
    pub version: Version,
    pub exporter: ModuleId,
}

/// One required-module binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequireWire {
    pub symbolic_name: String,
    pub provider: ModuleId,
}

/// Immutable snapshot of one module's resolved dependencies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Wiring {
    pub imports: Vec<PackageWire>,
    pub required: Vec<RequireWire>,
    /// Fragments attached at resolution time
    pub fragments: Vec<ModuleId>,
}

impl Wiring {
    /// The exporter bound for a given package, if any
    pub fn exporter_of(&self, package: &str) -> Option<ModuleId> {
        self.imports
            .iter()
            .find(|w| w.package == package)
            .map(|w| w.exporter)
    }
}

/// View of one exported package with its current importers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedPackage {
    pub package: String,
    pub version: Version,
    pub exporter: ModuleId,
    pub importers: Vec<ModuleId>,
    /// True once the exporter was updated/uninstalled but old importers
    /// are still wired to it
    pub removal_pending: bool,
}

/// Compute the exported-package view for one module
///
/// Host exports merge attached fragment contributions additively (split
/// packages), attributed to the host as exporter.
pub fn exported_packages(snapshot: &RegistrySnapshot, id: ModuleId) -> Vec<ExportedPackage> {
    let Some(record) = snapshot.get(id) else {
        return Vec::new();
    };

    let mut packages: Vec<ExportedPackage> = Vec::new();
    let mut push = |package: &str, version: &Version| {
        // Same package + same version from host and fragment is one
        // additive contribution, not a duplicate entry.
        if packages
            .iter()
            .any(|p| p.package == package && p.version == *version)
        {
            return;
        }
        packages.push(ExportedPackage {
            package: package.to_string(),
            version: version.clone(),
            exporter: id,
            importers: Vec::new(),
            removal_pending: record.removal_pending,
        });
    };

    for export in &record.manifest.exports {
        push(&export.package, &export.version);
    }
    for fragment_id in &record.fragments {
        if let Some(fragment) = snapshot.get(*fragment_id) {
            for export in &fragment.manifest.exports {
                push(&export.package, &export.version);
            }
        }
    }

    for other in snapshot.iter() {
        if other.id == id {
            continue;
        }
        let Some(wiring) = other.wiring.as_ref() else {
            continue;
        };
        for wire in &wiring.imports {
            if wire.exporter != id {
                continue;
            }
            if let Some(pkg) = packages.iter_mut().find(|p| p.package == wire.package) {
                pkg.importers.push(other.id);
            }
        }
    }

    packages
}
