// tests/services.rs

//! Integration tests for the service registry.
//!
//! These tests verify that:
//! 1. Using-bundle snapshots track get/unget exactly
//! 2. UNREGISTERING is delivered synchronously before the purge
//! 3. Service listeners honor LDAP-style filters and MODIFIED_ENDMATCH
//! 4. Stopping a module releases everything it published or held

mod common;

use common::{EventLog, ManifestBuilder, TestActivator, framework};
use girder::{Event, Listener, ServiceEventKind, StartOptions};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[test]
fn test_register_get_unget_using_bundles() {
    let fw = framework();
    let provider = fw
        .install("mem:provider", ManifestBuilder::new("provider", "1.0.0").content())
        .unwrap();
    let consumer = fw
        .install("mem:consumer", ManifestBuilder::new("consumer", "1.0.0").content())
        .unwrap();

    let service = fw
        .register_service(
            provider,
            vec!["log.Logger".to_string()],
            BTreeMap::new(),
            Arc::new("logger".to_string()),
        )
        .unwrap();

    assert_eq!(fw.get_using_bundles(service), None);
    let object = fw.get_service(service, consumer).unwrap();
    assert_eq!(*object.downcast::<String>().unwrap(), "logger");
    assert_eq!(fw.get_using_bundles(service), Some(vec![consumer]));

    fw.unget_service(service, consumer);
    assert_eq!(fw.get_using_bundles(service), None);
    fw.shutdown();
}

#[test]
fn test_unregistering_delivered_before_purge() {
    let fw = framework();
    let provider = fw
        .install("mem:provider", ManifestBuilder::new("provider", "1.0.0").content())
        .unwrap();
    let service = fw
        .register_service(
            provider,
            vec!["log.Logger".to_string()],
            BTreeMap::new(),
            Arc::new(()),
        )
        .unwrap();

    // With the default configuration a listener may still get the service
    // during UNREGISTERING delivery.
    let inner = fw.clone();
    let got: Arc<Mutex<Option<bool>>> = Arc::new(Mutex::new(None));
    let sink = got.clone();
    let listener: Listener = Arc::new(move |event: &Event| {
        if let Event::Service(e) = event {
            if e.kind == ServiceEventKind::Unregistering {
                *sink.lock().unwrap() = Some(inner.get_service(e.service, 99).is_ok());
            }
        }
    });
    fw.add_service_listener(None, listener).unwrap();

    fw.unregister_service(service).unwrap();
    assert_eq!(*got.lock().unwrap(), Some(true));
    assert!(fw.get_service(service, 1).is_err());
    fw.shutdown();
}

#[test]
fn test_service_listener_filter_restricts_visibility() {
    let fw = framework();
    let provider = fw
        .install("mem:provider", ManifestBuilder::new("provider", "1.0.0").content())
        .unwrap();

    let filtered = EventLog::new();
    fw.add_service_listener("(&(vendor=acme)(tier=prod))".into(), filtered.listener())
        .unwrap();
    let all = EventLog::new();
    fw.add_all_service_listener(all.listener());

    let mut matching = BTreeMap::new();
    matching.insert("vendor".to_string(), json!("acme"));
    matching.insert("tier".to_string(), json!("prod"));
    fw.register_service(provider, vec!["a.B".to_string()], matching, Arc::new(()))
        .unwrap();

    let mut other = BTreeMap::new();
    other.insert("vendor".to_string(), json!("elsewhere"));
    fw.register_service(provider, vec!["a.B".to_string()], other, Arc::new(()))
        .unwrap();

    fw.flush_events();
    assert_eq!(filtered.service_kinds(), vec![ServiceEventKind::Registered]);
    assert_eq!(
        all.service_kinds(),
        vec![ServiceEventKind::Registered, ServiceEventKind::Registered]
    );
    fw.shutdown();
}

#[test]
fn test_objectclass_matches_interface_names() {
    let fw = framework();
    let provider = fw
        .install("mem:provider", ManifestBuilder::new("provider", "1.0.0").content())
        .unwrap();

    let log = EventLog::new();
    fw.add_service_listener("(objectClass=log.Logger)".into(), log.listener())
        .unwrap();

    fw.register_service(
        provider,
        vec!["log.Logger".to_string(), "io.Closeable".to_string()],
        BTreeMap::new(),
        Arc::new(()),
    )
    .unwrap();
    fw.register_service(provider, vec!["io.Store".to_string()], BTreeMap::new(), Arc::new(()))
        .unwrap();

    fw.flush_events();
    assert_eq!(log.service_kinds(), vec![ServiceEventKind::Registered]);
    fw.shutdown();
}

#[test]
fn test_modified_endmatch_on_property_change() {
    let fw = framework();
    let provider = fw
        .install("mem:provider", ManifestBuilder::new("provider", "1.0.0").content())
        .unwrap();

    let log = EventLog::new();
    fw.add_service_listener("(tier=prod)".into(), log.listener())
        .unwrap();

    let mut props = BTreeMap::new();
    props.insert("tier".to_string(), json!("prod"));
    let service = fw
        .register_service(provider, vec!["a.B".to_string()], props, Arc::new(()))
        .unwrap();
    fw.flush_events();
    log.clear();

    // Still matching: plain MODIFIED.
    let mut props = BTreeMap::new();
    props.insert("tier".to_string(), json!("prod"));
    props.insert("extra".to_string(), json!(1));
    fw.modify_service_properties(service, props).unwrap();
    fw.flush_events();
    assert_eq!(log.service_kinds(), vec![ServiceEventKind::Modified]);
    log.clear();

    // No longer matching: MODIFIED_ENDMATCH.
    let mut props = BTreeMap::new();
    props.insert("tier".to_string(), json!("dev"));
    fw.modify_service_properties(service, props).unwrap();
    fw.flush_events();
    assert_eq!(log.service_kinds(), vec![ServiceEventKind::ModifiedEndmatch]);
    fw.shutdown();
}

#[test]
fn test_invalid_filter_is_rejected() {
    let fw = framework();
    let log = EventLog::new();
    assert!(fw.add_service_listener("(unclosed".into(), log.listener()).is_err());
    assert!(fw.get_service_references("a.B", Some("(((")).is_err());
    fw.shutdown();
}

#[test]
fn test_stop_releases_published_services_and_gets() {
    let fw = framework();
    let provider = fw
        .install(
            "mem:provider",
            ManifestBuilder::new("provider", "1.0.0").content_with(TestActivator::ok()),
        )
        .unwrap();
    let other = fw
        .install("mem:other", ManifestBuilder::new("other", "1.0.0").content())
        .unwrap();
    fw.start_module(provider, StartOptions::eager()).unwrap();

    let published = fw
        .register_service(provider, vec!["a.B".to_string()], BTreeMap::new(), Arc::new(()))
        .unwrap();
    let held = fw
        .register_service(other, vec!["c.D".to_string()], BTreeMap::new(), Arc::new(()))
        .unwrap();
    fw.get_service(held, provider).unwrap();
    assert_eq!(fw.get_using_bundles(held), Some(vec![provider]));

    fw.stop_module(provider).unwrap();

    assert!(fw.get_service(published, other).is_err());
    assert_eq!(fw.get_using_bundles(held), None);
    fw.shutdown();
}

#[test]
fn test_service_references_lookup() {
    let fw = framework();
    let provider = fw
        .install("mem:provider", ManifestBuilder::new("provider", "1.0.0").content())
        .unwrap();

    let mut props = BTreeMap::new();
    props.insert("vendor".to_string(), json!("acme"));
    let service = fw
        .register_service(provider, vec!["a.B".to_string()], props, Arc::new(()))
        .unwrap();
    fw.register_service(provider, vec!["a.B".to_string()], BTreeMap::new(), Arc::new(()))
        .unwrap();

    let all = fw.get_service_references("a.B", None).unwrap();
    assert_eq!(all.len(), 2);

    let filtered = fw
        .get_service_references("a.B", Some("(vendor=acme)"))
        .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].id, service);
    assert_eq!(filtered[0].owner, provider);
    fw.shutdown();
}

#[test]
fn test_register_on_uninstalled_module_fails() {
    let fw = framework();
    let id = fw
        .install("mem:app", ManifestBuilder::new("app", "1.0.0").content())
        .unwrap();
    fw.uninstall(id).unwrap();
    assert!(
        fw.register_service(id, vec!["a.B".to_string()], BTreeMap::new(), Arc::new(()))
            .is_err()
    );
    fw.shutdown();
}
