//! In-process event bus for automation-relevant events.
//!
//! The bus is created once at startup and handed to whoever publishes or
//! listens. Every listener is awaited in registration order; a failing or
//! panicking listener is reported in the [`EmitReport`] and never reaches the
//! caller or the other listeners.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::types::AutomationEvent;

/// Receives events published on an [`EventBus`].
#[async_trait]
pub trait EventListener: Send + Sync {
    /// Short name used in logs and failure reports.
    fn name(&self) -> &str {
        "listener"
    }

    async fn on_event(&self, event: &AutomationEvent) -> anyhow::Result<()>;
}

/// Adapts a synchronous closure into an [`EventListener`].
pub struct FnListener<F> {
    name: String,
    f: F,
}

impl<F> FnListener<F>
where
    F: Fn(&AutomationEvent) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> EventListener for FnListener<F>
where
    F: Fn(&AutomationEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_event(&self, event: &AutomationEvent) -> anyhow::Result<()> {
        (self.f)(event)
    }
}

/// A listener failure observed during one `emit` call.
#[derive(Debug, Clone)]
pub struct ListenerFailure {
    pub listener_id: u64,
    pub listener: String,
    pub error: String,
}

/// Outcome of a single `emit` call.
#[derive(Debug, Clone, Default)]
pub struct EmitReport {
    pub delivered: usize,
    pub failures: Vec<ListenerFailure>,
}

impl EmitReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

type Registry = RwLock<Vec<(u64, Arc<dyn EventListener>)>>;

#[derive(Default)]
struct Inner {
    listeners: Registry,
    next_id: AtomicU64,
}

/// Publish/subscribe hub. Cloning shares the same listener list.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener; it stays registered until the returned
    /// subscription is explicitly unsubscribed.
    pub fn on_event(&self, listener: Arc<dyn EventListener>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(listener_id = id, listener = listener.name(), "Listener registered");
        self.inner.listeners.write().push((id, listener));
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    /// Delivers `event` to every listener registered at call time.
    pub async fn emit(&self, event: &AutomationEvent) -> EmitReport {
        let snapshot: Vec<(u64, Arc<dyn EventListener>)> = self.inner.listeners.read().clone();
        let mut report = EmitReport::default();

        for (id, listener) in snapshot {
            let outcome = AssertUnwindSafe(listener.on_event(event))
                .catch_unwind()
                .await;
            let error = match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => "listener panicked".to_string(),
            };

            warn!(
                listener_id = id,
                listener = listener.name(),
                event_type = %event.event_type,
                user_id = event.user_id,
                error = %error,
                "Event listener failed"
            );
            metrics::counter!("event_bus.listener_failures").increment(1);
            report.failures.push(ListenerFailure {
                listener_id: id,
                listener: listener.name().to_string(),
                error,
            });
        }

        report
    }
}

/// Handle returned by [`EventBus::on_event`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    bus: Weak<Inner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the listener. Returns false if the bus is gone or the
    /// listener was already removed.
    pub fn unsubscribe(self) -> bool {
        let Some(inner) = self.bus.upgrade() else {
            return false;
        };
        let mut listeners = inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != self.id);
        listeners.len() != before
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_listener(name: &str, counter: Arc<AtomicUsize>) -> Arc<dyn EventListener> {
        Arc::new(FnListener::new(name, move |_event: &AutomationEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
    }

    struct PanickingListener;

    #[async_trait]
    impl EventListener for PanickingListener {
        async fn on_event(&self, _event: &AutomationEvent) -> anyhow::Result<()> {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_block_next() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        bus.on_event(Arc::new(FnListener::new("broken", |_e: &AutomationEvent| {
            Err(anyhow::anyhow!("listener exploded"))
        })));
        bus.on_event(counting_listener("counter", counter.clone()));

        let report = bus.emit(&AutomationEvent::new("payment_succeeded", 1)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].listener, "broken");
        assert!(report.failures[0].error.contains("exploded"));
    }

    #[tokio::test]
    async fn test_panicking_listener_is_isolated() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        bus.on_event(Arc::new(PanickingListener));
        bus.on_event(counting_listener("counter", counter.clone()));

        let report = bus.emit(&AutomationEvent::new("vds_expiring", 7)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(report.failures.len(), 1);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let sub = bus.on_event(counting_listener("counter", counter.clone()));
        bus.emit(&AutomationEvent::new("a", 1)).await;
        assert!(sub.unsubscribe());
        bus.emit(&AutomationEvent::new("a", 1)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_emit_without_listeners() {
        let bus = EventBus::new();
        let report = bus.emit(&AutomationEvent::new("noop", 1)).await;
        assert_eq!(report.delivered, 0);
        assert!(report.is_clean());
    }
}
