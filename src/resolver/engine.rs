// src/resolver/engine.rs

//! Resolver implementation
//!
//! Resolution walks the candidate modules in id order. For each module it
//! gathers the import and require requirements (merged with any attachable
//! fragment's requirements), probes the snapshot for providers, and either
//! commits a complete wiring or records the failure reason. Providers that
//! are themselves unresolved are resolved transitively in the same pass.

use crate::manifest::{ExportDeclaration, ImportDeclaration};
use crate::registry::{ModuleId, ModuleRecord, ModuleState, RegistrySnapshot};
use crate::version::VersionRange;
use semver::Version;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, trace};

use super::wiring::{PackageWire, RequireWire, Wiring};

/// Outcome of one resolution pass
#[derive(Debug, Default)]
pub struct Resolution {
    /// New wirings to commit, one per newly resolved module
    pub wirings: BTreeMap<ModuleId, Wiring>,
    /// Fragment attachments to commit (fragment id -> host id)
    pub attachments: BTreeMap<ModuleId, ModuleId>,
    /// Modules whose mandatory requirements could not be satisfied,
    /// with the first failure reason
    pub unresolved: BTreeMap<ModuleId, String>,
}

impl Resolution {
    /// True if the pass produced no new wirings
    pub fn is_empty(&self) -> bool {
        self.wirings.is_empty() && self.attachments.is_empty()
    }

    /// True if the pass resolved the given module
    pub fn resolved(&self, id: ModuleId) -> bool {
        self.wirings.contains_key(&id) || self.attachments.contains_key(&id)
    }
}

/// Pure resolver over a registry snapshot
pub struct Resolver<'a> {
    snapshot: &'a RegistrySnapshot,
}

/// One merged import requirement for a module plus its attached fragments
#[derive(Debug, Clone)]
struct ImportGroup {
    package: String,
    ranges: Vec<VersionRange>,
    /// Fragments that contributed a range to this group
    fragment_ids: Vec<ModuleId>,
}

impl<'a> Resolver<'a> {
    pub fn new(snapshot: &'a RegistrySnapshot) -> Self {
        Self { snapshot }
    }

    /// Resolve as many of the candidate modules as constraints allow
    ///
    /// Already-wired modules are skipped (wiring is sticky); failures are
    /// per module and never affect modules that did resolve.
    pub fn resolve(&self, candidates: impl IntoIterator<Item = ModuleId>) -> Resolution {
        let mut resolution = Resolution::default();
        let mut in_progress = BTreeSet::new();

        let ordered: BTreeSet<ModuleId> = candidates.into_iter().collect();
        for id in ordered {
            let Some(record) = self.snapshot.get(id) else {
                continue;
            };
            if record.is_fragment() {
                // Fragments resolve through host attachment only.
                continue;
            }
            self.try_resolve(id, &mut in_progress, &mut resolution);
        }

        debug!(
            resolved = resolution.wirings.len(),
            attached = resolution.attachments.len(),
            failed = resolution.unresolved.len(),
            "resolution pass complete"
        );
        resolution
    }

    /// Resolve one module, recursing into unresolved providers.
    /// Returns true if the module is (or becomes) resolved.
    fn try_resolve(
        &self,
        id: ModuleId,
        in_progress: &mut BTreeSet<ModuleId>,
        resolution: &mut Resolution,
    ) -> bool {
        if resolution.wirings.contains_key(&id) {
            return true;
        }
        if resolution.unresolved.contains_key(&id) {
            return false;
        }
        let Some(record) = self.snapshot.get(id) else {
            return false;
        };
        if record.wiring.is_some() {
            return true;
        }
        if !record.is_resolvable() || record.is_fragment() {
            return false;
        }
        if !in_progress.insert(id) {
            // Dependency cycle: assume the module in progress will resolve.
            return true;
        }

        let outcome = self.resolve_requirements(record, in_progress, resolution);
        in_progress.remove(&id);

        match outcome {
            Ok((wiring, fragments)) => {
                trace!(module = id, ?wiring, "module resolved");
                for fragment in &fragments {
                    resolution.attachments.insert(*fragment, id);
                }
                resolution.wirings.insert(id, wiring);
                true
            }
            Err(reason) => {
                debug!(module = id, %reason, "module left unresolved");
                resolution.unresolved.insert(id, reason);
                false
            }
        }
    }

    /// Satisfy the full requirement set of one module, including the
    /// requirements of any fragments that end up attached.
    fn resolve_requirements(
        &self,
        record: &Arc<ModuleRecord>,
        in_progress: &mut BTreeSet<ModuleId>,
        resolution: &mut Resolution,
    ) -> std::result::Result<(Wiring, Vec<ModuleId>), String> {
        // Required modules are host-only; fragments cannot add them.
        let mut required = Vec::new();
        for require in &record.manifest.requires {
            let provider = self
                .find_required_module(require.symbolic_name.as_str(), &require.range, in_progress, resolution)
                .ok_or_else(|| {
                    format!(
                        "required module {} {} not available",
                        require.symbolic_name, require.range
                    )
                })?;
            required.push(RequireWire {
                symbolic_name: require.symbolic_name.clone(),
                provider,
            });
        }

        // Start from every attachable fragment; drop fragments whose
        // constraints turn out unsatisfiable and retry without them.
        let mut fragments = self.eligible_fragments(record);

        loop {
            let groups = merge_imports(record, &fragments);
            let mut imports = Vec::new();
            let mut failed: Option<ImportGroup> = None;

            for group in &groups {
                match self.find_exporter(record.id, group, in_progress, resolution) {
                    Some((exporter, version)) => imports.push(PackageWire {
                        package: group.package.clone(),
                        version,
                        exporter,
                    }),
                    None => {
                        failed = Some(group.clone());
                        break;
                    }
                }
            }

            let Some(group) = failed else {
                let fragment_ids: Vec<ModuleId> = fragments.iter().map(|f| f.id).collect();
                let wiring = Wiring {
                    imports,
                    required,
                    fragments: fragment_ids.clone(),
                };
                return Ok((wiring, fragment_ids));
            };

            if group.fragment_ids.is_empty() {
                // The host's own requirement is unsatisfiable.
                return Err(format!(
                    "no exporter for package {} {}",
                    group.package,
                    group
                        .ranges
                        .first()
                        .map(|r| r.to_string())
                        .unwrap_or_default()
                ));
            }

            // Unattach the fragments that introduced the contradiction and
            // try again; the host may still resolve without them.
            debug!(
                host = record.id,
                package = %group.package,
                dropped = ?group.fragment_ids,
                "fragment constraints unsatisfiable, retrying without them"
            );
            fragments.retain(|f| !group.fragment_ids.contains(&f.id));
        }
    }

    /// Installed, unattached fragments whose host requirement matches this
    /// module and whose declared exports do not conflict with it.
    fn eligible_fragments(&self, host: &Arc<ModuleRecord>) -> Vec<Arc<ModuleRecord>> {
        let mut chosen: Vec<Arc<ModuleRecord>> = Vec::new();
        let mut export_versions: BTreeMap<&str, &Version> = host
            .manifest
            .exports
            .iter()
            .map(|e| (e.package.as_str(), &e.version))
            .collect();

        for candidate in self.snapshot.iter() {
            if !candidate.is_fragment()
                || candidate.host.is_some()
                || candidate.state != ModuleState::Installed
                || !candidate.is_resolvable()
            {
                continue;
            }
            let Some(requirement) = candidate.manifest.fragment_host.as_ref() else {
                continue;
            };
            if requirement.symbolic_name != host.symbolic_name()
                || !requirement.range.includes(host.version())
            {
                continue;
            }

            // A fragment exporting an already-contributed package at a
            // different version conflicts; same version is an additive
            // split-package contribution.
            let conflicts = candidate.manifest.exports.iter().any(|e| {
                export_versions
                    .get(e.package.as_str())
                    .is_some_and(|v| **v != e.version)
            });
            if conflicts {
                debug!(
                    host = host.id,
                    fragment = candidate.id,
                    "fragment export conflicts with host, left unattached"
                );
                continue;
            }

            // Disjoint version ranges for a shared import can never bind.
            let mergeable = candidate.manifest.imports.iter().all(|imp| {
                merged_ranges_overlap(&host.manifest.imports, &chosen, imp)
            });
            if !mergeable {
                debug!(
                    host = host.id,
                    fragment = candidate.id,
                    "fragment import ranges contradict host, left unattached"
                );
                continue;
            }

            for export in &candidate.manifest.exports {
                export_versions.insert(export.package.as_str(), &export.version);
            }
            chosen.push(candidate.clone());
        }

        chosen
    }

    /// Pick the best exporter for one merged import requirement
    ///
    /// Candidates are sorted highest version first, lowest id on ties. The
    /// importer itself is a valid candidate (substitutable export). An
    /// unresolved candidate must itself resolve to be chosen.
    fn find_exporter(
        &self,
        importer: ModuleId,
        group: &ImportGroup,
        in_progress: &mut BTreeSet<ModuleId>,
        resolution: &mut Resolution,
    ) -> Option<(ModuleId, Version)> {
        let mut candidates: Vec<(Version, ModuleId)> = Vec::new();

        for record in self.snapshot.iter() {
            if record.is_fragment() || !record.is_resolvable() {
                continue;
            }
            for export in self.effective_exports(record, resolution) {
                if export.package == group.package
                    && group.ranges.iter().all(|r| r.includes(&export.version))
                {
                    candidates.push((export.version.clone(), record.id));
                }
            }
        }

        candidates.sort_by(|(va, ia), (vb, ib)| vb.cmp(va).then(ia.cmp(ib)));

        for (version, exporter) in candidates {
            if exporter == importer
                || self.try_resolve(exporter, in_progress, resolution)
            {
                return Some((exporter, version));
            }
        }
        None
    }

    /// Pick the provider for a require-module requirement
    fn find_required_module(
        &self,
        symbolic_name: &str,
        range: &VersionRange,
        in_progress: &mut BTreeSet<ModuleId>,
        resolution: &mut Resolution,
    ) -> Option<ModuleId> {
        let mut candidates: Vec<(Version, ModuleId)> = self
            .snapshot
            .iter()
            .filter(|r| {
                !r.is_fragment()
                    && r.is_resolvable()
                    && r.symbolic_name() == symbolic_name
                    && range.includes(r.version())
            })
            .map(|r| (r.version().clone(), r.id))
            .collect();

        candidates.sort_by(|(va, ia), (vb, ib)| vb.cmp(va).then(ia.cmp(ib)));

        candidates
            .into_iter()
            .find(|(_, id)| self.try_resolve(*id, in_progress, resolution))
            .map(|(_, id)| id)
    }

    /// A module's exports plus the exports of fragments attached to it,
    /// either in the snapshot or earlier in this pass.
    fn effective_exports(
        &self,
        record: &Arc<ModuleRecord>,
        resolution: &Resolution,
    ) -> Vec<ExportDeclaration> {
        let mut exports = record.manifest.exports.clone();

        let attached = record.fragments.iter().copied().chain(
            resolution
                .attachments
                .iter()
                .filter(|(_, host)| **host == record.id)
                .map(|(fragment, _)| *fragment),
        );
        for fragment_id in attached {
            if let Some(fragment) = self.snapshot.get(fragment_id) {
                for export in &fragment.manifest.exports {
                    if !exports.iter().any(|e| e == export) {
                        exports.push(export.clone());
                    }
                }
            }
        }

        exports
    }
}

/// Merge host and fragment imports into per-package requirement groups
fn merge_imports(host: &Arc<ModuleRecord>, fragments: &[Arc<ModuleRecord>]) -> Vec<ImportGroup> {
    let mut groups: Vec<ImportGroup> = Vec::new();

    let mut add = |import: &ImportDeclaration, fragment: Option<ModuleId>| {
        if let Some(group) = groups.iter_mut().find(|g| g.package == import.package) {
            group.ranges.push(import.range.clone());
            if let Some(id) = fragment {
                if !group.fragment_ids.contains(&id) {
                    group.fragment_ids.push(id);
                }
            }
        } else {
            groups.push(ImportGroup {
                package: import.package.clone(),
                ranges: vec![import.range.clone()],
                fragment_ids: fragment.into_iter().collect(),
            });
        }
    };

    for import in &host.manifest.imports {
        add(import, None);
    }
    for fragment in fragments {
        for import in &fragment.manifest.imports {
            add(import, Some(fragment.id));
        }
    }

    groups
}

/// Whether a fragment import's range overlaps every already-merged range
/// for the same package
fn merged_ranges_overlap(
    host_imports: &[ImportDeclaration],
    attached: &[Arc<ModuleRecord>],
    import: &ImportDeclaration,
) -> bool {
    let host_ok = host_imports
        .iter()
        .filter(|i| i.package == import.package)
        .all(|i| i.range.overlaps(&import.range));
    let fragments_ok = attached.iter().all(|f| {
        f.manifest
            .imports
            .iter()
            .filter(|i| i.package == import.package)
            .all(|i| i.range.overlaps(&import.range))
    });
    host_ok && fragments_ok
}
