// src/lifecycle/refresh.rs

//! Package refresh
//!
//! The only operation allowed to change an existing importer's exporter
//! binding. Teardown covers every removal-pending module, every explicitly
//! named module, and all their transitive dependents, in leaves-first order
//! (importers fully stopped and unwired before their exporters). Uninstalled
//! records with no remaining importers are purged, the survivors are
//! re-resolved in one pass, and modules that were active beforehand are
//! restarted against the new wiring.
//!
//! The pass runs on a background thread; completion is observable through
//! the returned [`RefreshToken`] and a framework `PACKAGES_REFRESHED` event.

use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::context::RuntimeContext;
use crate::event::{BundleEventKind, FrameworkEventKind};
use crate::registry::{ModuleId, ModuleState, RegistrySnapshot};
use crate::resolver::Resolver;

use super::StartOptions;

/// Completion handle for an in-flight refresh
#[derive(Clone)]
pub struct RefreshToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    done: Mutex<bool>,
    signal: Condvar,
}

impl RefreshToken {
    fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                done: Mutex::new(false),
                signal: Condvar::new(),
            }),
        }
    }

    fn complete(&self) {
        let mut done = self.inner.done.lock();
        *done = true;
        self.inner.signal.notify_all();
    }

    pub fn is_complete(&self) -> bool {
        *self.inner.done.lock()
    }

    /// Block until the refresh pass has finished
    pub fn wait(&self) {
        let mut done = self.inner.done.lock();
        while !*done {
            self.inner.signal.wait(&mut done);
        }
    }

    /// Block up to `timeout`; returns whether the pass finished in time
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut done = self.inner.done.lock();
        while !*done {
            if self.inner.signal.wait_until(&mut done, deadline).timed_out() {
                break;
            }
        }
        *done
    }
}

pub(crate) fn refresh_packages(
    ctx: Arc<RuntimeContext>,
    subset: Option<BTreeSet<ModuleId>>,
) -> RefreshToken {
    let token = RefreshToken::new();
    let thread_token = token.clone();
    std::thread::Builder::new()
        .name("girder-refresh".to_string())
        .spawn(move || {
            let _serial = ctx.refresh_serial.lock();
            run_refresh(&ctx, subset);
            ctx.dispatcher
                .publish_framework_event(FrameworkEventKind::PackagesRefreshed, None, None);
            thread_token.complete();
        })
        .expect("spawn refresh thread");
    token
}

fn run_refresh(ctx: &Arc<RuntimeContext>, subset: Option<BTreeSet<ModuleId>>) {
    // Phase 1: decide what to tear down and in what order.
    let (order, restart) = {
        let _lock = ctx.resolution.lock();
        let snapshot = ctx.registry.snapshot();

        let mut affected: BTreeSet<ModuleId> = snapshot
            .iter()
            .filter(|r| r.removal_pending || r.state == ModuleState::Uninstalled)
            .map(|r| r.id)
            .collect();
        if let Some(named) = subset {
            affected.extend(named.into_iter().filter(|id| snapshot.get(*id).is_some()));
        }

        let mut queue: Vec<ModuleId> = affected.iter().copied().collect();
        while let Some(id) = queue.pop() {
            for dependent in snapshot.dependents_of(id) {
                if affected.insert(dependent) {
                    queue.push(dependent);
                }
            }
            // Refreshing an attached fragment tears down its host too.
            if let Some(host) = snapshot.get(id).and_then(|r| r.host) {
                if affected.insert(host) {
                    queue.push(host);
                }
            }
        }

        let mut restart: BTreeMap<ModuleId, StartOptions> = BTreeMap::new();
        for &id in &affected {
            if let Some(record) = snapshot.get(id) {
                if record.state == ModuleState::Active {
                    restart.insert(id, StartOptions::eager());
                } else if record.state == ModuleState::Starting && record.lazy_pending {
                    restart.insert(id, StartOptions::activation_policy());
                }
            }
        }

        (teardown_order(&snapshot, &affected), restart)
    };

    if order.is_empty() {
        debug!("refresh found nothing to tear down");
        return;
    }
    info!(modules = ?order, "refresh teardown");

    // Phase 2: stop and unwire, listeners running outside the lock. The
    // in-flight guard is held across both steps so a concurrent start or
    // stop cannot land between the stop and the unwire; a module already
    // mid-operation on another thread is left wired rather than torn out
    // from under it.
    for &id in &order {
        let _guard = match super::InFlightGuard::acquire(ctx, id) {
            Ok(guard) => guard,
            Err(err) => {
                warn!(module = id, %err, "module busy, left untouched by refresh");
                ctx.dispatcher.publish_framework_event(
                    FrameworkEventKind::Error,
                    Some(id),
                    Some(err.to_string()),
                );
                continue;
            }
        };
        let state = match ctx.registry.get(id) {
            Some(record) => record.state,
            None => continue,
        };
        if state.can_stop() {
            if let Err(err) = super::stop_locked(ctx, id) {
                warn!(module = id, %err, "stop during refresh failed");
                ctx.dispatcher.publish_framework_event(
                    FrameworkEventKind::Error,
                    Some(id),
                    Some(err.to_string()),
                );
            }
        }

        let was_resolved = {
            let _lock = ctx.resolution.lock();
            let record = match ctx.registry.get(id) {
                Some(record) => record,
                None => continue,
            };
            let was_resolved =
                record.wiring.is_some() || record.host.is_some();
            let purge = record.state == ModuleState::Uninstalled;
            if purge {
                ctx.registry.remove(id);
            } else if let Err(err) = ctx.registry.update(id, |r| {
                r.state = ModuleState::Installed;
                r.wiring = None;
                r.host = None;
                r.fragments.clear();
                r.lazy_pending = false;
                r.removal_pending = false;
            }) {
                warn!(module = id, %err, "unwire during refresh failed");
            }
            was_resolved
        };
        if was_resolved {
            ctx.dispatcher
                .publish_bundle_event(BundleEventKind::Unresolved, id);
        }
    }

    // Phase 3: one re-resolution pass over the survivors.
    let newly = {
        let _lock = ctx.resolution.lock();
        let snapshot = ctx.registry.snapshot();
        let candidates: Vec<ModuleId> = order
            .iter()
            .copied()
            .filter(|id| snapshot.get(*id).is_some())
            .collect();
        let resolution = Resolver::new(&snapshot).resolve(candidates);
        match super::commit_resolution(ctx, resolution) {
            Ok(newly) => newly,
            Err(err) => {
                warn!(%err, "commit during refresh failed");
                Vec::new()
            }
        }
    };
    for id in newly {
        ctx.dispatcher
            .publish_bundle_event(BundleEventKind::Resolved, id);
    }

    // Phase 4: bring previously running modules back up.
    for (id, options) in restart {
        if ctx.registry.get(id).is_none() {
            continue;
        }
        if let Err(err) = super::start(ctx, id, options) {
            warn!(module = id, %err, "restart after refresh failed");
            ctx.dispatcher.publish_framework_event(
                FrameworkEventKind::Error,
                Some(id),
                Some(err.to_string()),
            );
        }
    }
}

/// Order the affected set leaves-first: a module is torn down only after
/// every affected module depending on it has been torn down
fn teardown_order(snapshot: &RegistrySnapshot, affected: &BTreeSet<ModuleId>) -> Vec<ModuleId> {
    let mut remaining = affected.clone();
    let mut order = Vec::with_capacity(affected.len());
    while !remaining.is_empty() {
        let ready: Vec<ModuleId> = remaining
            .iter()
            .copied()
            .filter(|&id| {
                snapshot
                    .dependents_of(id)
                    .iter()
                    .all(|d| *d == id || !remaining.contains(d))
            })
            .collect();
        if ready.is_empty() {
            // Dependency cycle within the affected set; break it at the
            // lowest id.
            if let Some(&first) = remaining.iter().next() {
                remaining.remove(&first);
                order.push(first);
            }
            continue;
        }
        for id in ready {
            remaining.remove(&id);
            order.push(id);
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_completes() {
        let token = RefreshToken::new();
        assert!(!token.is_complete());
        assert!(!token.wait_timeout(Duration::from_millis(10)));

        let waiter = token.clone();
        let handle = std::thread::spawn(move || waiter.wait());
        token.complete();
        handle.join().unwrap();
        assert!(token.is_complete());
        assert!(token.wait_timeout(Duration::from_millis(10)));
    }
}
