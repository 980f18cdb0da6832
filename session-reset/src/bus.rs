use dashmap::DashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info};

/// Process-wide invalidation signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvalidationEvent {
    /// Discard recent-activity history
    RecentActivityCleared,
    /// All application data was cleared; reinitialize session-dependent
    /// state, including open real-time connections
    AppDataCleared,
}

impl InvalidationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            InvalidationEvent::RecentActivityCleared => "recent-activity-cleared",
            InvalidationEvent::AppDataCleared => "app-data-cleared",
        }
    }
}

impl fmt::Display for InvalidationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

type Handler = Arc<dyn Fn(InvalidationEvent) + Send + Sync>;

struct Listener {
    id: u64,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    listeners: DashMap<InvalidationEvent, Vec<Listener>>,
    next_id: AtomicU64,
}

/// Publish/subscribe registry for invalidation signals.
///
/// Cloning shares the registry; components receive it by injection. Delivery
/// is synchronous fan-out to listeners registered at emit time, with no
/// queueing or replay.
#[derive(Clone, Default)]
pub struct InvalidationBus {
    registry: Arc<Registry>,
}

/// Keeps a listener registered; dropping it unsubscribes
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    registry: Weak<Registry>,
    event: InvalidationEvent,
    id: u64,
}

impl Subscription {
    pub fn event(&self) -> InvalidationEvent {
        self.event
    }

    /// Unsubscribe now
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            // Drop the handler only after the shard lock is released
            let removed = registry
                .listeners
                .get_mut(&self.event)
                .and_then(|mut listeners| {
                    let idx = listeners.iter().position(|l| l.id == self.id)?;
                    Some(listeners.remove(idx))
                });
            drop(removed);
        }
    }
}

impl InvalidationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, event: InvalidationEvent, handler: F) -> Subscription
    where
        F: Fn(InvalidationEvent) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .listeners
            .entry(event)
            .or_default()
            .push(Listener {
                id,
                handler: Arc::new(handler),
            });

        debug!(event = %event, listener_id = id, "Listener subscribed");

        Subscription {
            registry: Arc::downgrade(&self.registry),
            event,
            id,
        }
    }

    pub fn listener_count(&self, event: InvalidationEvent) -> usize {
        self.registry
            .listeners
            .get(&event)
            .map(|listeners| listeners.len())
            .unwrap_or(0)
    }

    /// Deliver `event` to current listeners and return how many ran to completion.
    ///
    /// Handlers are invoked outside the registry lock, so a handler may
    /// subscribe or unsubscribe. A panicking handler is logged and skipped.
    pub fn emit(&self, event: InvalidationEvent) -> usize {
        let handlers: Vec<Handler> = self
            .registry
            .listeners
            .get(&event)
            .map(|listeners| listeners.iter().map(|l| Arc::clone(&l.handler)).collect())
            .unwrap_or_default();

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => delivered += 1,
                Err(_) => error!(event = %event, "Invalidation listener panicked"),
            }
        }

        debug!(event = %event, delivered, "Invalidation event emitted");
        delivered
    }
}

impl fmt::Debug for InvalidationBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationBus")
            .field(
                "recent_activity_listeners",
                &self.listener_count(InvalidationEvent::RecentActivityCleared),
            )
            .field(
                "app_data_listeners",
                &self.listener_count(InvalidationEvent::AppDataCleared),
            )
            .finish()
    }
}

/// Emits the reset signals once local state is fully purged
#[derive(Debug, Clone)]
pub struct InvalidationBroadcaster {
    bus: InvalidationBus,
}

impl InvalidationBroadcaster {
    pub fn new(bus: InvalidationBus) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &InvalidationBus {
        &self.bus
    }

    /// Narrow signal first, then the broad one
    pub fn broadcast_reset(&self) {
        let history = self.bus.emit(InvalidationEvent::RecentActivityCleared);
        let app_data = self.bus.emit(InvalidationEvent::AppDataCleared);
        info!(
            history_listeners = history,
            app_data_listeners = app_data,
            "Reset broadcast delivered"
        );
    }
}
