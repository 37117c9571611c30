// src/service/mod.rs

//! Service registry
//!
//! Modules publish service objects under one or more interface names with a
//! property map. The registry tracks per-module use counts so a module's
//! outstanding gets can be released when it stops. `UNREGISTERING` is
//! delivered synchronously on the unregistering caller's thread, before the
//! registration is purged; whether `get_service` still succeeds during that
//! window is a registry-wide configuration toggle.

use parking_lot::Mutex;
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::error::{Error, Result};
use crate::event::{EventDispatcher, ServiceEvent, ServiceEventKind, ServiceFilter};
use crate::registry::ModuleId;

/// Monotonic service registration id, never reused
pub type ServiceId = u64;

/// Property map attached to a registration
pub type ServiceProperties = BTreeMap<String, Value>;

/// The published object; callers downcast to the concrete interface type
pub type ServiceObject = Arc<dyn Any + Send + Sync>;

/// Read-only snapshot of one registration, as returned by lookups
#[derive(Debug, Clone)]
pub struct ServiceReference {
    pub id: ServiceId,
    pub owner: ModuleId,
    pub interfaces: Arc<Vec<String>>,
    pub properties: Arc<ServiceProperties>,
}

struct ServiceRecord {
    id: ServiceId,
    owner: ModuleId,
    interfaces: Arc<Vec<String>>,
    properties: Arc<ServiceProperties>,
    object: ServiceObject,
    use_counts: BTreeMap<ModuleId, u64>,
    unregistering: bool,
}

impl ServiceRecord {
    fn event(&self, kind: ServiceEventKind) -> ServiceEvent {
        ServiceEvent {
            kind,
            service: self.id,
            owner: self.owner,
            interfaces: self.interfaces.clone(),
            properties: self.properties.clone(),
        }
    }

    fn reference(&self) -> ServiceReference {
        ServiceReference {
            id: self.id,
            owner: self.owner,
            interfaces: self.interfaces.clone(),
            properties: self.properties.clone(),
        }
    }
}

/// Published services, keyed by registration id
pub struct ServiceRegistry {
    services: Mutex<BTreeMap<ServiceId, ServiceRecord>>,
    next_id: AtomicU64,
    dispatcher: Arc<EventDispatcher>,
    /// Whether `get_service` still succeeds while `UNREGISTERING` is being
    /// delivered for the registration
    usable_while_unregistering: bool,
}

impl ServiceRegistry {
    pub fn new(dispatcher: Arc<EventDispatcher>, usable_while_unregistering: bool) -> Self {
        Self {
            services: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            dispatcher,
            usable_while_unregistering,
        }
    }

    /// Publish a service; fires `REGISTERED`
    pub fn register(
        &self,
        owner: ModuleId,
        interfaces: Vec<String>,
        properties: ServiceProperties,
        object: ServiceObject,
    ) -> ServiceId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = ServiceRecord {
            id,
            owner,
            interfaces: Arc::new(interfaces),
            properties: Arc::new(properties),
            object,
            use_counts: BTreeMap::new(),
            unregistering: false,
        };
        let event = record.event(ServiceEventKind::Registered);
        self.services.lock().insert(id, record);
        debug!(service = id, owner, "service registered");
        self.dispatcher.publish_service_event(event);
        id
    }

    /// Obtain the service object, recording the caller in the using set
    pub fn get_service(&self, service: ServiceId, caller: ModuleId) -> Result<ServiceObject> {
        let mut services = self.services.lock();
        let record = services
            .get_mut(&service)
            .ok_or(Error::ServiceNotFound(service))?;
        if record.unregistering && !self.usable_while_unregistering {
            return Err(Error::ServiceNotFound(service));
        }
        *record.use_counts.entry(caller).or_insert(0) += 1;
        Ok(record.object.clone())
    }

    /// Release one outstanding get; a no-op when the caller holds none
    pub fn unget_service(&self, service: ServiceId, caller: ModuleId) {
        let mut services = self.services.lock();
        if let Some(record) = services.get_mut(&service) {
            if let Some(count) = record.use_counts.get_mut(&caller) {
                *count -= 1;
                if *count == 0 {
                    record.use_counts.remove(&caller);
                }
            }
        }
    }

    /// Remove a registration
    ///
    /// `UNREGISTERING` is delivered synchronously before the record is
    /// purged, with the registry lock released so a listener may still call
    /// back into the registry.
    pub fn unregister(&self, service: ServiceId) -> Result<()> {
        let event = {
            let mut services = self.services.lock();
            let record = services
                .get_mut(&service)
                .ok_or(Error::ServiceNotFound(service))?;
            if record.unregistering {
                return Err(Error::ServiceNotFound(service));
            }
            record.unregistering = true;
            record.event(ServiceEventKind::Unregistering)
        };

        self.dispatcher.deliver_unregistering(event);
        self.services.lock().remove(&service);
        debug!(service, "service unregistered");
        Ok(())
    }

    /// Replace the property map; fires `MODIFIED`, and `MODIFIED_ENDMATCH`
    /// to listeners whose filter matched the old properties only
    pub fn modify_properties(
        &self,
        service: ServiceId,
        properties: ServiceProperties,
    ) -> Result<()> {
        let (old, new) = {
            let mut services = self.services.lock();
            let record = services
                .get_mut(&service)
                .ok_or(Error::ServiceNotFound(service))?;
            let old = record.event(ServiceEventKind::Modified);
            record.properties = Arc::new(properties);
            (old, record.event(ServiceEventKind::Modified))
        };
        self.dispatcher.publish_service_modified(old, new);
        Ok(())
    }

    /// Modules holding an outstanding get for the registration; `None` when
    /// the using set is empty or the registration is unknown
    pub fn get_using_bundles(&self, service: ServiceId) -> Option<Vec<ModuleId>> {
        let services = self.services.lock();
        let record = services.get(&service)?;
        if record.use_counts.is_empty() {
            None
        } else {
            Some(record.use_counts.keys().copied().collect())
        }
    }

    /// Registrations implementing an interface, optionally narrowed by a
    /// filter over the property map, in registration order
    pub fn get_service_references(
        &self,
        interface: &str,
        filter: Option<&ServiceFilter>,
    ) -> Vec<ServiceReference> {
        let services = self.services.lock();
        services
            .values()
            .filter(|record| !record.unregistering)
            .filter(|record| record.interfaces.iter().any(|i| i == interface))
            .filter(|record| match filter {
                Some(filter) => filter.matches(&record.interfaces, &record.properties),
                None => true,
            })
            .map(ServiceRecord::reference)
            .collect()
    }

    pub fn properties(&self, service: ServiceId) -> Option<Arc<ServiceProperties>> {
        self.services
            .lock()
            .get(&service)
            .map(|record| record.properties.clone())
    }

    /// Registrations owned by a module, in registration order
    pub fn services_of(&self, owner: ModuleId) -> Vec<ServiceId> {
        self.services
            .lock()
            .values()
            .filter(|record| record.owner == owner)
            .map(|record| record.id)
            .collect()
    }

    /// Release a stopping module: unregister everything it published and
    /// drop its outstanding gets on other modules' services
    pub fn release_module(&self, module: ModuleId) {
        for service in self.services_of(module) {
            // Unregister can only fail if a listener raced us to it.
            let _ = self.unregister(service);
        }
        let mut services = self.services.lock();
        for record in services.values_mut() {
            record.use_counts.remove(&module);
        }
    }

    pub fn len(&self) -> usize {
        self.services.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.lock().is_empty()
    }
}
