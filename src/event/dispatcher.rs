// src/event/dispatcher.rs

//! Event delivery
//!
//! Synchronous bundle events run on the calling thread, inside the
//! triggering operation. Everything else is queued to a single delivery
//! thread, which preserves production order across all general listeners.
//! Eligible listeners are snapshotted at enqueue time, so a listener added
//! later never sees events queued before its registration.
//!
//! A listener panic is caught, logged, and never aborts delivery to the
//! remaining listeners.

use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread::JoinHandle;
use tracing::{debug, error, trace};

use super::{
    BundleEvent, BundleEventKind, Event, FrameworkEvent, FrameworkEventKind, Listener,
    ListenerKind, ServiceEvent, ServiceEventKind,
};
use crate::registry::ModuleId;

/// Handle for removing a registered listener
pub type ListenerId = u64;

struct ListenerEntry {
    id: ListenerId,
    kind: ListenerKind,
    callback: Listener,
}

enum QueueItem {
    Deliver {
        event: Event,
        targets: Vec<(ListenerId, Listener)>,
    },
    /// Ack once every previously queued item has been delivered
    Flush(Sender<()>),
    Shutdown,
}

/// Dispatches lifecycle, service, and framework events
pub struct EventDispatcher {
    listeners: Mutex<Vec<ListenerEntry>>,
    next_id: AtomicU64,
    tx: Mutex<Option<Sender<QueueItem>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventDispatcher {
    /// Create a dispatcher and spawn its delivery thread
    pub fn new() -> Self {
        let (tx, rx) = channel();
        let worker = std::thread::Builder::new()
            .name("girder-events".to_string())
            .spawn(move || delivery_loop(rx))
            .expect("spawn event delivery thread");

        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Register a listener; delivery order within a listener class follows
    /// registration order
    pub fn add_listener(&self, kind: ListenerKind, callback: Listener) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().push(ListenerEntry {
            id,
            kind,
            callback,
        });
        debug!(listener = id, "listener added");
        id
    }

    /// Remove a listener; queued deliveries it was snapshotted into are
    /// still delivered
    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|entry| entry.id != id);
    }

    /// Publish a bundle event
    ///
    /// Synchronous kinds are delivered inline to synchronous listeners and
    /// never queued; the remaining kinds are queued to general bundle
    /// listeners.
    pub fn publish_bundle_event(&self, kind: BundleEventKind, module: ModuleId) {
        let event = Event::Bundle(BundleEvent { kind, module });

        if kind.is_synchronous() {
            let targets = self.snapshot_targets(&event);
            trace!(%kind, module, listeners = targets.len(), "sync bundle delivery");
            for (listener, callback) in targets {
                invoke(listener, &callback, &event);
            }
        } else {
            self.enqueue(event);
        }
    }

    /// Queue a service event to matching service listeners
    pub fn publish_service_event(&self, event: ServiceEvent) {
        self.enqueue(Event::Service(event));
    }

    /// Publish MODIFIED, and MODIFIED_ENDMATCH to listeners whose filter
    /// matched the old property set but not the new one
    pub fn publish_service_modified(&self, old: ServiceEvent, new: ServiceEvent) {
        debug_assert_eq!(new.kind, ServiceEventKind::Modified);
        let modified = Event::Service(new.clone());
        let modified_targets = self.snapshot_targets(&modified);

        let endmatch_event = Event::Service(ServiceEvent {
            kind: ServiceEventKind::ModifiedEndmatch,
            properties: new.properties.clone(),
            ..old.clone()
        });
        let old_event = Event::Service(old);
        let endmatch_targets: Vec<_> = self
            .snapshot_targets(&old_event)
            .into_iter()
            .filter(|(id, _)| !modified_targets.iter().any(|(m, _)| m == id))
            .collect();

        self.enqueue_targets(modified, modified_targets);
        if !endmatch_targets.is_empty() {
            self.enqueue_targets(endmatch_event, endmatch_targets);
        }
    }

    /// Deliver UNREGISTERING synchronously on the caller's thread, before
    /// the service registration is purged
    pub fn deliver_unregistering(&self, event: ServiceEvent) {
        debug_assert_eq!(event.kind, ServiceEventKind::Unregistering);
        let event = Event::Service(event);
        for (listener, callback) in self.snapshot_targets(&event) {
            invoke(listener, &callback, &event);
        }
    }

    /// Queue a framework event
    pub fn publish_framework_event(
        &self,
        kind: FrameworkEventKind,
        module: Option<ModuleId>,
        message: Option<String>,
    ) {
        self.enqueue(Event::Framework(FrameworkEvent {
            kind,
            module,
            message,
        }));
    }

    /// Block until every previously queued event has been delivered
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = channel();
        let sent = {
            let tx = self.tx.lock();
            match tx.as_ref() {
                Some(tx) => tx.send(QueueItem::Flush(ack_tx)).is_ok(),
                None => false,
            }
        };
        if sent {
            let _ = ack_rx.recv();
        }
    }

    /// Stop the delivery thread after draining the queue
    pub fn shutdown(&self) {
        let tx = self.tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(QueueItem::Shutdown);
        }
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }

    /// Snapshot the listeners eligible for an event, in registration order
    fn snapshot_targets(&self, event: &Event) -> Vec<(ListenerId, Listener)> {
        self.listeners
            .lock()
            .iter()
            .filter(|entry| eligible(&entry.kind, event))
            .map(|entry| (entry.id, entry.callback.clone()))
            .collect()
    }

    fn enqueue(&self, event: Event) {
        let targets = self.snapshot_targets(&event);
        self.enqueue_targets(event, targets);
    }

    fn enqueue_targets(&self, event: Event, targets: Vec<(ListenerId, Listener)>) {
        if targets.is_empty() {
            return;
        }
        let tx = self.tx.lock();
        if let Some(tx) = tx.as_ref() {
            let _ = tx.send(QueueItem::Deliver { event, targets });
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Single enum-matched eligibility decision for every listener class
fn eligible(kind: &ListenerKind, event: &Event) -> bool {
    match (kind, event) {
        (ListenerKind::SynchronousBundle, Event::Bundle(e)) => e.kind.is_synchronous(),
        (ListenerKind::Bundle, Event::Bundle(e)) => !e.kind.is_synchronous(),
        (ListenerKind::AllService, Event::Service(_)) => true,
        (ListenerKind::Service(None), Event::Service(_)) => true,
        (ListenerKind::Service(Some(filter)), Event::Service(e)) => {
            filter.matches(&e.interfaces, &e.properties)
        }
        (ListenerKind::Framework, Event::Framework(_)) => true,
        _ => false,
    }
}

fn delivery_loop(rx: Receiver<QueueItem>) {
    for item in rx {
        match item {
            QueueItem::Deliver { event, targets } => {
                for (listener, callback) in targets {
                    invoke(listener, &callback, &event);
                }
            }
            QueueItem::Flush(ack) => {
                let _ = ack.send(());
            }
            QueueItem::Shutdown => break,
        }
    }
}

/// Invoke one listener, containing panics so a misbehaving listener never
/// aborts delivery to the rest
fn invoke(listener: ListenerId, callback: &Listener, event: &Event) {
    let result = catch_unwind(AssertUnwindSafe(|| callback(event)));
    if result.is_err() {
        error!(listener, ?event, "listener panicked during delivery");
    }
}
