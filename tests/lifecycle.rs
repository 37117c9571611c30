// tests/lifecycle.rs

//! Integration tests for the module state machine.
//!
//! These tests verify that:
//! 1. Lifecycle transitions follow the documented edges and event order
//! 2. Activation failures roll back to Resolved before the error returns
//! 3. Lazy activation defers the entry point until a matching class load
//! 4. stop/start are idempotent where the contract says so

mod common;

use common::{EventLog, ManifestBuilder, TestActivator, framework};
use girder::{BundleEventKind, Error, ModuleState, StartOptions};

#[test]
fn test_install_start_stop_event_order() {
    let fw = framework();
    let log = EventLog::new();
    fw.add_bundle_listener(log.listener());

    let activator = TestActivator::ok();
    let id = fw
        .install(
            "mem:app",
            ManifestBuilder::new("app", "1.0.0").content_with(activator.clone()),
        )
        .unwrap();
    assert_eq!(fw.get_state(id).unwrap(), ModuleState::Installed);

    fw.start_module(id, StartOptions::eager()).unwrap();
    assert_eq!(fw.get_state(id).unwrap(), ModuleState::Active);
    assert_eq!(activator.start_count(), 1);

    fw.stop_module(id).unwrap();
    assert_eq!(fw.get_state(id).unwrap(), ModuleState::Resolved);
    assert_eq!(activator.stop_count(), 1);

    fw.flush_events();
    assert_eq!(
        log.bundle_kinds(id),
        vec![
            BundleEventKind::Installed,
            BundleEventKind::Resolved,
            BundleEventKind::Started,
            BundleEventKind::Stopped,
        ]
    );
    fw.shutdown();
}

#[test]
fn test_duplicate_location_returns_existing_id() {
    let fw = framework();
    let first = fw
        .install("mem:app", ManifestBuilder::new("app", "1.0.0").content())
        .unwrap();
    let second = fw
        .install("mem:app", ManifestBuilder::new("app", "2.0.0").content())
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(fw.module_ids().len(), 1);
    fw.shutdown();
}

#[test]
fn test_start_unresolved_fails_without_state_change() {
    let fw = framework();
    let id = fw
        .install(
            "mem:app",
            ManifestBuilder::new("app", "1.0.0")
                .import("lib.missing", "")
                .content(),
        )
        .unwrap();

    let err = fw.start_module(id, StartOptions::eager()).unwrap_err();
    assert!(matches!(err, Error::Unresolved { module, .. } if module == id));
    assert_eq!(fw.get_state(id).unwrap(), ModuleState::Installed);
    fw.shutdown();
}

#[test]
fn test_activation_failure_rolls_back_to_resolved() {
    let fw = framework();
    let log = EventLog::new();
    fw.add_bundle_listener(log.listener());

    let id = fw
        .install(
            "mem:app",
            ManifestBuilder::new("app", "1.0.0").content_with(TestActivator::failing()),
        )
        .unwrap();

    let err = fw.start_module(id, StartOptions::eager()).unwrap_err();
    assert!(matches!(err, Error::ActivationFailed { module, .. } if module == id));
    assert_eq!(fw.get_state(id).unwrap(), ModuleState::Resolved);

    fw.flush_events();
    let kinds = log.bundle_kinds(id);
    assert!(kinds.contains(&BundleEventKind::Stopped));
    assert!(!kinds.contains(&BundleEventKind::Started));
    fw.shutdown();
}

#[test]
fn test_lazy_start_defers_entry_point() {
    let fw = framework();
    let activator = TestActivator::ok();
    let id = fw
        .install(
            "mem:app",
            ManifestBuilder::new("app", "1.0.0")
                .lazy("com.app.*", "com.app.internal.*")
                .content_with(activator.clone()),
        )
        .unwrap();

    fw.start_module(id, StartOptions::activation_policy()).unwrap();
    assert_eq!(fw.get_state(id).unwrap(), ModuleState::Starting);
    assert_eq!(activator.start_count(), 0);

    // An excluded class leaves the module Starting.
    fw.load_class(id, "com.app.internal.Helper").unwrap();
    assert_eq!(fw.get_state(id).unwrap(), ModuleState::Starting);
    assert_eq!(activator.start_count(), 0);

    // An included class completes activation.
    fw.load_class(id, "com.app.Main").unwrap();
    assert_eq!(fw.get_state(id).unwrap(), ModuleState::Active);
    assert_eq!(activator.start_count(), 1);
    fw.shutdown();
}

#[test]
fn test_repeated_lazy_start_emits_no_duplicate_events() {
    let fw = framework();
    let log = EventLog::new();
    fw.add_synchronous_bundle_listener(log.listener());

    let id = fw
        .install(
            "mem:app",
            ManifestBuilder::new("app", "1.0.0").lazy("", "").content(),
        )
        .unwrap();

    fw.start_module(id, StartOptions::activation_policy()).unwrap();
    fw.start_module(id, StartOptions::activation_policy()).unwrap();

    let lazy_events = log
        .bundle_kinds(id)
        .iter()
        .filter(|k| **k == BundleEventKind::LazyActivation)
        .count();
    assert_eq!(lazy_events, 1);
    fw.shutdown();
}

#[test]
fn test_eager_start_completes_pending_lazy_activation() {
    let fw = framework();
    let activator = TestActivator::ok();
    let id = fw
        .install(
            "mem:app",
            ManifestBuilder::new("app", "1.0.0")
                .lazy("", "")
                .content_with(activator.clone()),
        )
        .unwrap();

    fw.start_module(id, StartOptions::activation_policy()).unwrap();
    assert_eq!(fw.get_state(id).unwrap(), ModuleState::Starting);

    fw.start_module(id, StartOptions::eager()).unwrap();
    assert_eq!(fw.get_state(id).unwrap(), ModuleState::Active);
    assert_eq!(activator.start_count(), 1);
    fw.shutdown();
}

#[test]
fn test_stop_is_idempotent_except_on_uninstalled() {
    let fw = framework();
    let id = fw
        .install("mem:app", ManifestBuilder::new("app", "1.0.0").content())
        .unwrap();

    // Not started yet: no-op success.
    fw.stop_module(id).unwrap();
    assert_eq!(fw.get_state(id).unwrap(), ModuleState::Installed);

    fw.uninstall(id).unwrap();
    assert!(matches!(
        fw.stop_module(id).unwrap_err(),
        Error::IllegalState(_)
    ));
    fw.shutdown();
}

#[test]
fn test_double_start_is_noop() {
    let fw = framework();
    let activator = TestActivator::ok();
    let id = fw
        .install(
            "mem:app",
            ManifestBuilder::new("app", "1.0.0").content_with(activator.clone()),
        )
        .unwrap();

    fw.start_module(id, StartOptions::eager()).unwrap();
    fw.start_module(id, StartOptions::eager()).unwrap();
    assert_eq!(activator.start_count(), 1);
    fw.shutdown();
}

#[test]
fn test_update_resets_to_installed_and_emits_updated() {
    let fw = framework();
    let log = EventLog::new();
    fw.add_bundle_listener(log.listener());

    let id = fw
        .install(
            "mem:app",
            ManifestBuilder::new("app", "1.0.0").content_with(TestActivator::ok()),
        )
        .unwrap();
    fw.start_module(id, StartOptions::eager()).unwrap();

    fw.update(id, ManifestBuilder::new("app", "2.0.0").content())
        .unwrap();
    assert_eq!(fw.get_state(id).unwrap(), ModuleState::Installed);

    fw.flush_events();
    let kinds = log.bundle_kinds(id);
    let updated_at = kinds
        .iter()
        .position(|k| *k == BundleEventKind::Updated)
        .unwrap();
    let unresolved_at = kinds
        .iter()
        .position(|k| *k == BundleEventKind::Unresolved)
        .unwrap();
    assert!(unresolved_at < updated_at);

    // The new manifest is what resolves afterwards.
    fw.start_module(id, StartOptions::eager()).unwrap();
    assert_eq!(fw.get_state(id).unwrap(), ModuleState::Active);
    fw.shutdown();
}

#[test]
fn test_uninstalled_record_lingers_until_refresh() {
    let fw = framework();
    let log = EventLog::new();
    fw.add_bundle_listener(log.listener());

    let id = fw
        .install("mem:app", ManifestBuilder::new("app", "1.0.0").content())
        .unwrap();
    fw.uninstall(id).unwrap();

    assert_eq!(fw.get_state(id).unwrap(), ModuleState::Uninstalled);
    assert!(matches!(
        fw.start_module(id, StartOptions::eager()).unwrap_err(),
        Error::IllegalState(_)
    ));
    assert!(matches!(fw.uninstall(id).unwrap_err(), Error::IllegalState(_)));

    fw.flush_events();
    assert!(log.bundle_kinds(id).contains(&BundleEventKind::Uninstalled));
    fw.shutdown();
}

#[test]
fn test_start_of_removal_pending_module_fails_unresolved() {
    let fw = framework();

    let lib = fw
        .install(
            "mem:lib",
            ManifestBuilder::new("lib", "1.0.0")
                .export("lib.api", "1.0.0")
                .content(),
        )
        .unwrap();
    let app = fw
        .install(
            "mem:app",
            ManifestBuilder::new("app", "1.0.0").import("lib.api", "").content(),
        )
        .unwrap();
    fw.resolve(app).unwrap();

    // The importer stays wired to the old content, so the updated exporter
    // is removal pending and must not start until a refresh rewires it.
    fw.update(
        lib,
        ManifestBuilder::new("lib", "2.0.0")
            .export("lib.api", "2.0.0")
            .content(),
    )
    .unwrap();

    assert!(matches!(
        fw.start_module(lib, StartOptions::eager()).unwrap_err(),
        Error::Unresolved { module, .. } if module == lib
    ));
    assert_eq!(fw.get_state(lib).unwrap(), ModuleState::Installed);

    fw.refresh_packages(Some([lib].into())).wait();
    fw.start_module(lib, StartOptions::eager()).unwrap();
    assert_eq!(fw.get_state(lib).unwrap(), ModuleState::Active);
    fw.shutdown();
}

#[test]
fn test_unknown_module_is_not_found() {
    let fw = framework();
    assert!(fw.get_state(99).unwrap_err().is_not_found());
    assert!(fw.stop_module(99).unwrap_err().is_not_found());
    fw.shutdown();
}
