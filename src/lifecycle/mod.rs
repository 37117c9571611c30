// src/lifecycle/mod.rs

//! Module lifecycle operations
//!
//! Drives the per-module state machine
//! `Installed -> Resolved -> Starting -> Active -> Stopping -> Resolved`
//! with `Uninstalled` as the terminal state. Resolution runs under the
//! global resolution lock; synchronous events (`STARTING`, `STOPPING`,
//! `LAZY_ACTIVATION`) are delivered on the calling thread with no lock
//! held, after the registry already reflects the announced state.
//!
//! A second concurrent operation on the same module fails with
//! `IllegalState`; re-entrant operations on other modules from listener
//! code are allowed.

mod refresh;

pub use refresh::RefreshToken;
pub(crate) use refresh::refresh_packages;

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::{ModuleContent, RuntimeContext};
use crate::error::{Error, Result};
use crate::event::BundleEventKind;
use crate::manifest::Manifest;
use crate::registry::{ModuleId, ModuleState};
use crate::resolver::{Resolution, Resolver};

/// Flags accepted by `start`
#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    /// Honor a lazy activation policy instead of forcing eager activation
    pub use_activation_policy: bool,
    /// Do not record the start as persistent; carried for API parity, the
    /// runtime keeps no autostart state
    pub transient: bool,
}

impl StartOptions {
    pub fn eager() -> Self {
        Self::default()
    }

    pub fn activation_policy() -> Self {
        Self {
            use_activation_policy: true,
            transient: false,
        }
    }
}

/// Marks a module as having an operation in flight for the guard's lifetime
struct InFlightGuard<'a> {
    ctx: &'a RuntimeContext,
    id: ModuleId,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(ctx: &'a RuntimeContext, id: ModuleId) -> Result<Self> {
        if !ctx.in_flight.lock().insert(id) {
            return Err(Error::IllegalState(format!(
                "operation already in progress on module {id}"
            )));
        }
        Ok(Self { ctx, id })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.ctx.in_flight.lock().remove(&self.id);
    }
}

/// Install a module from its content
///
/// Re-installing an already-known location returns the existing id and
/// emits nothing.
pub(crate) fn install(
    ctx: &Arc<RuntimeContext>,
    location: &str,
    content: ModuleContent,
) -> Result<ModuleId> {
    if let Some(security) = &ctx.config.security {
        if !security.allows_install(location) {
            return Err(Error::SecurityDenied(format!("install of {location}")));
        }
    }
    if let Some(existing) = ctx.registry.find_by_location(location) {
        debug!(location, module = existing.id, "location already installed");
        return Ok(existing.id);
    }

    let manifest = Manifest::parse(&content.manifest)?;
    let record = ctx.registry.install(location, manifest);
    if let Some(activator) = content.activator {
        ctx.activators.lock().insert(record.id, activator);
    }
    info!(module = record.id, location, name = record.symbolic_name(), "installed");
    ctx.dispatcher
        .publish_bundle_event(BundleEventKind::Installed, record.id);
    Ok(record.id)
}

/// Resolve a module without starting it
pub(crate) fn resolve(ctx: &Arc<RuntimeContext>, id: ModuleId) -> Result<()> {
    ctx.registry.require(id)?;
    ensure_resolved(ctx, id)
}

/// Resolve `id` if it is still `Installed`; `Err(Unresolved)` when its
/// mandatory requirements cannot be satisfied
fn ensure_resolved(ctx: &Arc<RuntimeContext>, id: ModuleId) -> Result<()> {
    let (newly, failure) = {
        let _lock = ctx.resolution.lock();
        let record = ctx.registry.require(id)?;
        match record.state {
            ModuleState::Installed => {}
            ModuleState::Uninstalled => {
                return Err(Error::IllegalState(format!("module {id} is uninstalled")));
            }
            _ => return Ok(()),
        }

        let snapshot = ctx.registry.snapshot();
        // A fragment resolves only by attaching, so the candidates are the
        // unresolved hosts it could attach to.
        let candidates: Vec<ModuleId> = if record.is_fragment() {
            let host_name = record
                .manifest
                .fragment_host
                .as_ref()
                .map(|h| h.symbolic_name.clone())
                .unwrap_or_default();
            snapshot
                .iter()
                .filter(|r| {
                    !r.is_fragment()
                        && r.state == ModuleState::Installed
                        && r.symbolic_name() == host_name
                })
                .map(|r| r.id)
                .collect()
        } else {
            vec![id]
        };

        let resolution = Resolver::new(&snapshot).resolve(candidates);
        let failure = if record.is_fragment() {
            (!resolution.attachments.contains_key(&id))
                .then(|| "no resolvable host accepts the fragment".to_string())
        } else if resolution.wirings.contains_key(&id) {
            None
        } else {
            // The resolver skips removal-pending records without recording
            // a reason, so absence from the wirings is itself a failure.
            Some(resolution.unresolved.get(&id).cloned().unwrap_or_else(|| {
                if record.removal_pending {
                    "module is pending removal until the next package refresh".to_string()
                } else {
                    "module was not resolvable".to_string()
                }
            }))
        };
        (commit_resolution(ctx, resolution)?, failure)
    };

    for module in newly {
        ctx.dispatcher
            .publish_bundle_event(BundleEventKind::Resolved, module);
    }
    match failure {
        Some(reason) => Err(Error::Unresolved { module: id, reason }),
        None => Ok(()),
    }
}

/// Commit a resolver outcome to the registry; caller holds the resolution
/// lock. Returns the newly resolved module ids in id order.
pub(crate) fn commit_resolution(
    ctx: &Arc<RuntimeContext>,
    resolution: Resolution,
) -> Result<Vec<ModuleId>> {
    let mut newly = Vec::new();
    for (id, wiring) in resolution.wirings {
        let fragments = wiring.fragments.clone();
        ctx.registry.update(id, move |r| {
            if r.state == ModuleState::Installed {
                r.state = ModuleState::Resolved;
            }
            r.wiring = Some(Arc::new(wiring));
            r.fragments = fragments;
        })?;
        newly.push(id);
    }
    for (fragment, host) in resolution.attachments {
        ctx.registry.update(fragment, move |r| {
            r.state = ModuleState::Resolved;
            r.host = Some(host);
        })?;
        newly.push(fragment);
    }
    newly.sort_unstable();
    Ok(newly)
}

/// Start a module, resolving it first when needed
pub(crate) fn start(ctx: &Arc<RuntimeContext>, id: ModuleId, options: StartOptions) -> Result<()> {
    let _guard = InFlightGuard::acquire(ctx, id)?;
    let record = ctx.registry.require(id)?;
    if record.is_fragment() {
        return Err(Error::IllegalState(format!(
            "module {id} is a fragment and cannot be started"
        )));
    }

    match record.state {
        ModuleState::Uninstalled => {
            return Err(Error::IllegalState(format!("module {id} is uninstalled")));
        }
        ModuleState::Active => return Ok(()),
        ModuleState::Starting => {
            // A repeated lazy start is a no-op; an eager start completes a
            // pending lazy activation.
            if record.lazy_pending && !options.use_activation_policy {
                return activate(ctx, id);
            }
            return Ok(());
        }
        ModuleState::Stopping => {
            return Err(Error::IllegalState(format!("module {id} is stopping")));
        }
        ModuleState::Installed => ensure_resolved(ctx, id)?,
        ModuleState::Resolved => {}
    }

    let record = ctx.registry.require(id)?;
    if options.use_activation_policy && record.manifest.activation.is_lazy() {
        ctx.registry.update(id, |r| {
            r.state = ModuleState::Starting;
            r.lazy_pending = true;
        })?;
        debug!(module = id, "lazy activation pending");
        ctx.dispatcher
            .publish_bundle_event(BundleEventKind::LazyActivation, id);
        Ok(())
    } else {
        activate(ctx, id)
    }
}

/// Run the eager activation path: `STARTING`, entry point, `Active`; a
/// failing entry point rolls back to `Resolved` via the stop path
fn activate(ctx: &Arc<RuntimeContext>, id: ModuleId) -> Result<()> {
    ctx.registry.update(id, |r| {
        r.state = ModuleState::Starting;
        r.lazy_pending = false;
    })?;
    ctx.dispatcher
        .publish_bundle_event(BundleEventKind::Starting, id);

    let outcome = match ctx.activator_of(id) {
        Some(activator) => activator.start(id),
        None => Ok(()),
    };

    match outcome {
        Ok(()) => {
            ctx.registry.update(id, |r| r.state = ModuleState::Active)?;
            info!(module = id, "started");
            ctx.dispatcher
                .publish_bundle_event(BundleEventKind::Started, id);
            Ok(())
        }
        Err(source) => {
            warn!(module = id, error = %source, "entry point failed, rolling back");
            ctx.registry.update(id, |r| r.state = ModuleState::Stopping)?;
            ctx.dispatcher
                .publish_bundle_event(BundleEventKind::Stopping, id);
            ctx.registry.update(id, |r| r.state = ModuleState::Resolved)?;
            ctx.dispatcher
                .publish_bundle_event(BundleEventKind::Stopped, id);
            Err(Error::ActivationFailed { module: id, source })
        }
    }
}

/// Record a class load; completes a pending lazy activation when the class
/// matches the module's activation policy
pub(crate) fn load_class(ctx: &Arc<RuntimeContext>, id: ModuleId, class_name: &str) -> Result<()> {
    let record = ctx.registry.require(id)?;
    if record.state != ModuleState::Starting
        || !record.lazy_pending
        || !record.manifest.activation.triggers_on(class_name)
    {
        return Ok(());
    }

    let _guard = InFlightGuard::acquire(ctx, id)?;
    let record = ctx.registry.require(id)?;
    if record.state == ModuleState::Starting && record.lazy_pending {
        debug!(module = id, class_name, "class load triggers activation");
        activate(ctx, id)
    } else {
        Ok(())
    }
}

pub(crate) fn stop(ctx: &Arc<RuntimeContext>, id: ModuleId) -> Result<()> {
    let _guard = InFlightGuard::acquire(ctx, id)?;
    stop_locked(ctx, id)
}

/// Stop path shared by `stop`, `update`, `uninstall`, and refresh; the
/// caller holds the in-flight guard
fn stop_locked(ctx: &Arc<RuntimeContext>, id: ModuleId) -> Result<()> {
    let record = ctx.registry.require(id)?;
    if record.state == ModuleState::Uninstalled {
        return Err(Error::IllegalState(format!("module {id} is uninstalled")));
    }
    if !record.state.can_stop() {
        // Idempotent no-op on Installed / Resolved modules.
        return Ok(());
    }
    let was_active = record.state == ModuleState::Active;

    ctx.registry.update(id, |r| {
        r.state = ModuleState::Stopping;
        r.lazy_pending = false;
    })?;
    ctx.dispatcher
        .publish_bundle_event(BundleEventKind::Stopping, id);

    // The entry point only ran for modules that reached Active.
    let outcome = if was_active {
        match ctx.activator_of(id) {
            Some(activator) => activator.stop(id),
            None => Ok(()),
        }
    } else {
        Ok(())
    };

    ctx.services.release_module(id);
    ctx.registry.update(id, |r| r.state = ModuleState::Resolved)?;
    info!(module = id, "stopped");
    ctx.dispatcher
        .publish_bundle_event(BundleEventKind::Stopped, id);

    outcome.map_err(|source| Error::ActivationFailed { module: id, source })
}

/// Replace a module's content
///
/// The module is stopped if needed, its wiring is discarded, and it
/// returns to `Installed`; re-resolution happens on the next start or
/// refresh. Exports still wired by other modules become removal pending.
pub(crate) fn update(ctx: &Arc<RuntimeContext>, id: ModuleId, content: ModuleContent) -> Result<()> {
    let _guard = InFlightGuard::acquire(ctx, id)?;
    let record = ctx.registry.require(id)?;
    if record.state == ModuleState::Uninstalled {
        return Err(Error::IllegalState(format!("module {id} is uninstalled")));
    }
    if let Some(security) = &ctx.config.security {
        if !security.allows_install(&record.location) {
            return Err(Error::SecurityDenied(format!("update of {}", record.location)));
        }
    }
    let manifest = Manifest::parse(&content.manifest)?;

    if let Err(err) = stop_locked(ctx, id) {
        warn!(module = id, %err, "stop during update failed");
    }

    let was_resolved = {
        let _lock = ctx.resolution.lock();
        let snapshot = ctx.registry.snapshot();
        let still_wired = snapshot.has_importers(id);
        let record = ctx.registry.require(id)?;
        let was_resolved = record.state != ModuleState::Installed || record.wiring.is_some();
        ctx.registry.update(id, move |r| {
            r.manifest = manifest;
            r.state = ModuleState::Installed;
            r.wiring = None;
            r.host = None;
            r.fragments.clear();
            r.lazy_pending = false;
            r.removal_pending = still_wired;
        })?;
        was_resolved
    };

    match content.activator {
        Some(activator) => {
            ctx.activators.lock().insert(id, activator);
        }
        None => {
            ctx.activators.lock().remove(&id);
        }
    }

    info!(module = id, "updated");
    if was_resolved {
        ctx.dispatcher
            .publish_bundle_event(BundleEventKind::Unresolved, id);
    }
    ctx.dispatcher
        .publish_bundle_event(BundleEventKind::Updated, id);
    Ok(())
}

/// Uninstall a module
///
/// The record lingers, removal pending, until a refresh with no remaining
/// importers purges it.
pub(crate) fn uninstall(ctx: &Arc<RuntimeContext>, id: ModuleId) -> Result<()> {
    let _guard = InFlightGuard::acquire(ctx, id)?;
    let record = ctx.registry.require(id)?;
    if record.state == ModuleState::Uninstalled {
        return Err(Error::IllegalState(format!(
            "module {id} is already uninstalled"
        )));
    }

    if let Err(err) = stop_locked(ctx, id) {
        warn!(module = id, %err, "stop during uninstall failed");
    }

    {
        let _lock = ctx.resolution.lock();
        ctx.registry.update(id, |r| {
            r.state = ModuleState::Uninstalled;
            r.wiring = None;
            r.lazy_pending = false;
            r.removal_pending = true;
        })?;
    }
    ctx.activators.lock().remove(&id);
    ctx.services.release_module(id);

    info!(module = id, "uninstalled");
    ctx.dispatcher
        .publish_bundle_event(BundleEventKind::Uninstalled, id);
    Ok(())
}
