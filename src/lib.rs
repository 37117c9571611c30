// src/lib.rs

//! Girder Module Runtime
//!
//! Dynamic module lifecycle and dependency resolution: modules are
//! installed from manifests, wired to the packages and modules they
//! import, started and stopped through a strict state machine, and
//! observed through lifecycle, service, and framework events.
//!
//! # Architecture
//!
//! - Registry-first: one record per installed module, mutated copy-on-write
//! - Sticky wiring: resolution never silently migrates an importer; only
//!   an explicit package refresh rebinds existing wiring
//! - Fragments: attach to a host when their combined constraints hold,
//!   contributing exports additively
//! - Single delivery thread: asynchronous events in production order,
//!   synchronous events on the operation's own thread
//! - No global state: everything hangs off an explicit `Framework` handle

pub mod context;
mod error;
pub mod event;
pub mod lifecycle;
pub mod manifest;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod version;

pub use context::{Framework, ModuleActivator, ModuleContent, RuntimeConfig, SecurityPolicy};
pub use error::{Error, Result};
pub use event::{
    BundleEvent, BundleEventKind, Event, EventDispatcher, FrameworkEvent, FrameworkEventKind,
    Listener, ListenerId, ListenerKind, ServiceEvent, ServiceEventKind, ServiceFilter,
};
pub use lifecycle::{RefreshToken, StartOptions};
pub use manifest::{ActivationPolicy, Manifest};
pub use registry::{ModuleId, ModuleRecord, ModuleState, Registry, RegistrySnapshot};
pub use resolver::{ExportedPackage, PackageWire, RequireWire, Resolution, Resolver, Wiring};
pub use service::{
    ServiceId, ServiceObject, ServiceProperties, ServiceReference, ServiceRegistry,
};
pub use version::{VersionRange, parse_version};
