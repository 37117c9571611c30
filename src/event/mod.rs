// src/event/mod.rs

//! Lifecycle, service, and framework events
//!
//! Three event families with a fixed kind vocabulary. The bundle kinds
//! `STARTING`, `STOPPING` and `LAZY_ACTIVATION` are delivered only to
//! synchronous listeners, on the thread running the triggering operation;
//! every other kind is queued to the single background delivery thread.

mod dispatcher;
mod filter;

pub use dispatcher::{EventDispatcher, ListenerId};
pub use filter::ServiceFilter;

use crate::registry::ModuleId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use strum_macros::{Display, EnumIter};

/// Bundle (module lifecycle) event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BundleEventKind {
    Installed,
    Resolved,
    Starting,
    Started,
    Stopping,
    Stopped,
    Updated,
    Unresolved,
    Uninstalled,
    LazyActivation,
}

impl BundleEventKind {
    /// Kinds delivered synchronously, before the operation returns
    pub fn is_synchronous(&self) -> bool {
        matches!(self, Self::Starting | Self::Stopping | Self::LazyActivation)
    }
}

/// Service event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceEventKind {
    Registered,
    Modified,
    Unregistering,
    ModifiedEndmatch,
}

/// Framework event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameworkEventKind {
    Started,
    Error,
    PackagesRefreshed,
    StartlevelChanged,
    Warning,
    Info,
    Stopped,
    WaitTimeout,
}

/// A module lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEvent {
    pub kind: BundleEventKind,
    pub module: ModuleId,
}

/// A service registry event
///
/// Carries the interface list and a property snapshot so listener filters
/// can be evaluated at dispatch time.
#[derive(Debug, Clone)]
pub struct ServiceEvent {
    pub kind: ServiceEventKind,
    pub service: u64,
    pub owner: ModuleId,
    pub interfaces: Arc<Vec<String>>,
    pub properties: Arc<BTreeMap<String, Value>>,
}

/// A framework-level event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameworkEvent {
    pub kind: FrameworkEventKind,
    pub module: Option<ModuleId>,
    pub message: Option<String>,
}

/// Any event deliverable to a listener
#[derive(Debug, Clone)]
pub enum Event {
    Bundle(BundleEvent),
    Service(ServiceEvent),
    Framework(FrameworkEvent),
}

/// What a registered listener observes
///
/// One tagged variant per listener class; a single enum-matched delivery
/// path decides eligibility per event.
#[derive(Clone)]
pub enum ListenerKind {
    /// Asynchronous bundle events
    Bundle,
    /// Synchronous-only bundle events (STARTING, STOPPING, LAZY_ACTIVATION)
    SynchronousBundle,
    /// Service events, optionally restricted by a filter
    Service(Option<ServiceFilter>),
    /// Service events regardless of filter visibility
    AllService,
    /// Framework events
    Framework,
}

impl std::fmt::Debug for ListenerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bundle => write!(f, "Bundle"),
            Self::SynchronousBundle => write!(f, "SynchronousBundle"),
            Self::Service(None) => write!(f, "Service"),
            Self::Service(Some(filter)) => write!(f, "Service({})", filter),
            Self::AllService => write!(f, "AllService"),
            Self::Framework => write!(f, "Framework"),
        }
    }
}

/// Listener callback type; invoked from the caller's thread for
/// synchronous kinds and from the delivery thread otherwise
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync + 'static>;
