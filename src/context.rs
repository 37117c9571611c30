// src/context.rs

//! Runtime context and public facade
//!
//! All mutable runtime state lives in one explicitly constructed
//! [`RuntimeContext`]: the module registry, the service registry, the event
//! dispatcher, the global resolution lock, and the per-module in-flight
//! operation guard. [`Framework`] is a cheaply cloneable handle over that
//! context and carries the whole public operation surface.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;

use crate::error::{Error, Result};
use crate::event::{
    EventDispatcher, FrameworkEventKind, Listener, ListenerId, ListenerKind, ServiceFilter,
};
use crate::lifecycle::{self, RefreshToken, StartOptions};
use crate::registry::{ModuleId, ModuleState, Registry};
use crate::resolver::{self, ExportedPackage};
use crate::service::{
    ServiceId, ServiceObject, ServiceProperties, ServiceReference, ServiceRegistry,
};

/// Module entry point, supplied with the module's content at install time
pub trait ModuleActivator: Send + Sync {
    fn start(&self, module: ModuleId) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn stop(&self, module: ModuleId) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// External permission check consulted before install and update
pub trait SecurityPolicy: Send + Sync {
    fn allows_install(&self, location: &str) -> bool;
}

/// Installable module content: manifest text plus an optional entry point
pub struct ModuleContent {
    pub manifest: String,
    pub activator: Option<Arc<dyn ModuleActivator>>,
}

impl ModuleContent {
    pub fn new(manifest: impl Into<String>) -> Self {
        Self {
            manifest: manifest.into(),
            activator: None,
        }
    }

    pub fn with_activator(manifest: impl Into<String>, activator: Arc<dyn ModuleActivator>) -> Self {
        Self {
            manifest: manifest.into(),
            activator: Some(activator),
        }
    }
}

/// Runtime-wide configuration
pub struct RuntimeConfig {
    /// Whether `get_service` still succeeds while `UNREGISTERING` is being
    /// delivered for a registration
    pub usable_while_unregistering: bool,
    pub security: Option<Arc<dyn SecurityPolicy>>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            usable_while_unregistering: true,
            security: None,
        }
    }
}

pub(crate) struct RuntimeContext {
    pub(crate) registry: Registry,
    pub(crate) services: ServiceRegistry,
    pub(crate) dispatcher: Arc<EventDispatcher>,
    pub(crate) config: RuntimeConfig,
    /// Held for resolver computation and registry mutation only, never
    /// while listener code runs
    pub(crate) resolution: Mutex<()>,
    /// Serializes whole refresh passes against each other
    pub(crate) refresh_serial: Mutex<()>,
    /// Modules with a lifecycle operation currently in flight
    pub(crate) in_flight: Mutex<BTreeSet<ModuleId>>,
    pub(crate) activators: Mutex<BTreeMap<ModuleId, Arc<dyn ModuleActivator>>>,
}

impl RuntimeContext {
    pub(crate) fn activator_of(&self, id: ModuleId) -> Option<Arc<dyn ModuleActivator>> {
        self.activators.lock().get(&id).cloned()
    }
}

/// Handle to a running module runtime
///
/// Clones share the same underlying context.
#[derive(Clone)]
pub struct Framework {
    ctx: Arc<RuntimeContext>,
}

impl Framework {
    /// Construct and start a runtime; emits framework `STARTED`
    pub fn start(config: RuntimeConfig) -> Self {
        let dispatcher = Arc::new(EventDispatcher::new());
        let services =
            ServiceRegistry::new(dispatcher.clone(), config.usable_while_unregistering);
        let framework = Self {
            ctx: Arc::new(RuntimeContext {
                registry: Registry::new(),
                services,
                dispatcher: dispatcher.clone(),
                config,
                resolution: Mutex::new(()),
                refresh_serial: Mutex::new(()),
                in_flight: Mutex::new(BTreeSet::new()),
                activators: Mutex::new(BTreeMap::new()),
            }),
        };
        info!("framework started");
        dispatcher.publish_framework_event(FrameworkEventKind::Started, None, None);
        framework
    }

    /// Stop every active module in reverse install order, emit framework
    /// `STOPPED`, and drain the event queue
    pub fn shutdown(&self) {
        let mut ids = self.ctx.registry.ids();
        ids.reverse();
        for id in ids {
            let stoppable = self
                .ctx
                .registry
                .get(id)
                .is_some_and(|r| r.state.can_stop());
            if stoppable {
                if let Err(err) = lifecycle::stop(&self.ctx, id) {
                    tracing::warn!(module = id, %err, "stop during shutdown failed");
                }
            }
        }
        self.ctx
            .dispatcher
            .publish_framework_event(FrameworkEventKind::Stopped, None, None);
        info!("framework stopped");
        self.ctx.dispatcher.shutdown();
    }

    // ----- module lifecycle ------------------------------------------------

    /// Install a module; returns the existing id when the location is
    /// already installed
    pub fn install(&self, location: &str, content: ModuleContent) -> Result<ModuleId> {
        lifecycle::install(&self.ctx, location, content)
    }

    /// Resolve a module without starting it
    pub fn resolve(&self, id: ModuleId) -> Result<()> {
        lifecycle::resolve(&self.ctx, id)
    }

    pub fn start_module(&self, id: ModuleId, options: StartOptions) -> Result<()> {
        lifecycle::start(&self.ctx, id, options)
    }

    pub fn stop_module(&self, id: ModuleId) -> Result<()> {
        lifecycle::stop(&self.ctx, id)
    }

    /// Record a class load against a lazily starting module, completing its
    /// activation when the class matches the activation policy
    pub fn load_class(&self, id: ModuleId, class_name: &str) -> Result<()> {
        lifecycle::load_class(&self.ctx, id, class_name)
    }

    pub fn update(&self, id: ModuleId, content: ModuleContent) -> Result<()> {
        lifecycle::update(&self.ctx, id, content)
    }

    pub fn uninstall(&self, id: ModuleId) -> Result<()> {
        lifecycle::uninstall(&self.ctx, id)
    }

    /// Tear down and re-resolve removal-pending wiring on a background
    /// thread; completion is observable via the returned token and a
    /// framework `PACKAGES_REFRESHED` event
    pub fn refresh_packages(&self, subset: Option<BTreeSet<ModuleId>>) -> RefreshToken {
        lifecycle::refresh_packages(self.ctx.clone(), subset)
    }

    // ----- introspection ---------------------------------------------------

    pub fn get_state(&self, id: ModuleId) -> Result<ModuleState> {
        Ok(self.ctx.registry.require(id)?.state)
    }

    pub fn get_exported_packages(&self, id: ModuleId) -> Result<Vec<ExportedPackage>> {
        self.ctx.registry.require(id)?;
        Ok(resolver::exported_packages(
            &self.ctx.registry.snapshot(),
            id,
        ))
    }

    pub fn module_ids(&self) -> Vec<ModuleId> {
        self.ctx.registry.ids()
    }

    // ----- listeners -------------------------------------------------------

    pub fn add_bundle_listener(&self, listener: Listener) -> ListenerId {
        self.ctx.dispatcher.add_listener(ListenerKind::Bundle, listener)
    }

    pub fn add_synchronous_bundle_listener(&self, listener: Listener) -> ListenerId {
        self.ctx
            .dispatcher
            .add_listener(ListenerKind::SynchronousBundle, listener)
    }

    pub fn add_service_listener(
        &self,
        filter: Option<&str>,
        listener: Listener,
    ) -> Result<ListenerId> {
        let filter = match filter {
            Some(text) => Some(ServiceFilter::parse(text)?),
            None => None,
        };
        Ok(self
            .ctx
            .dispatcher
            .add_listener(ListenerKind::Service(filter), listener))
    }

    pub fn add_all_service_listener(&self, listener: Listener) -> ListenerId {
        self.ctx
            .dispatcher
            .add_listener(ListenerKind::AllService, listener)
    }

    pub fn add_framework_listener(&self, listener: Listener) -> ListenerId {
        self.ctx
            .dispatcher
            .add_listener(ListenerKind::Framework, listener)
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.ctx.dispatcher.remove_listener(id);
    }

    /// Block until all queued asynchronous events have been delivered
    pub fn flush_events(&self) {
        self.ctx.dispatcher.flush();
    }

    // ----- services --------------------------------------------------------

    pub fn register_service(
        &self,
        owner: ModuleId,
        interfaces: Vec<String>,
        properties: ServiceProperties,
        object: ServiceObject,
    ) -> Result<ServiceId> {
        let record = self.ctx.registry.require(owner)?;
        if record.state == ModuleState::Uninstalled {
            return Err(Error::IllegalState(format!(
                "module {owner} is uninstalled"
            )));
        }
        Ok(self.ctx.services.register(owner, interfaces, properties, object))
    }

    pub fn get_service(&self, service: ServiceId, caller: ModuleId) -> Result<ServiceObject> {
        self.ctx.services.get_service(service, caller)
    }

    pub fn unget_service(&self, service: ServiceId, caller: ModuleId) {
        self.ctx.services.unget_service(service, caller);
    }

    pub fn unregister_service(&self, service: ServiceId) -> Result<()> {
        self.ctx.services.unregister(service)
    }

    pub fn modify_service_properties(
        &self,
        service: ServiceId,
        properties: ServiceProperties,
    ) -> Result<()> {
        self.ctx.services.modify_properties(service, properties)
    }

    pub fn get_using_bundles(&self, service: ServiceId) -> Option<Vec<ModuleId>> {
        self.ctx.services.get_using_bundles(service)
    }

    pub fn get_service_references(
        &self,
        interface: &str,
        filter: Option<&str>,
    ) -> Result<Vec<ServiceReference>> {
        let filter = match filter {
            Some(text) => Some(ServiceFilter::parse(text)?),
            None => None,
        };
        Ok(self
            .ctx
            .services
            .get_service_references(interface, filter.as_ref()))
    }
}
