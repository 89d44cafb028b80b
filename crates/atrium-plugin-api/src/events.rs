//! Publish/subscribe event hub shared by the host and every plugin
//!
//! Subscribers are async closures. [`EventHub::emit`] calls every current
//! subscriber of a topic in subscription order, then awaits all of the
//! returned futures together. A subscriber that fails or panics is logged
//! and does not affect delivery to the others.

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Lifecycle topics emitted by the plugin manager
pub mod topics {
    /// A plugin was installed
    pub const PLUGIN_INSTALLED: &str = "plugin:installed";
    /// A plugin was activated
    pub const PLUGIN_ACTIVATED: &str = "plugin:activated";
    /// A plugin was deactivated
    pub const PLUGIN_DEACTIVATED: &str = "plugin:deactivated";
    /// A plugin was uninstalled
    pub const PLUGIN_UNINSTALLED: &str = "plugin:uninstalled";
}

/// Boxed error a subscriber may return
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result of one subscriber invocation
pub type HandlerResult = std::result::Result<(), HandlerError>;

type Handler = Arc<dyn Fn(Event) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// An event delivered to subscribers
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Topic the event was emitted on
    pub topic: String,

    /// Event payload
    pub payload: serde_json::Value,
}

/// Identifies one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Outcome of an [`EventHub::emit`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    /// Subscribers invoked
    pub delivered: usize,

    /// Subscribers that returned an error or panicked
    pub failed: usize,
}

struct Subscriber {
    id: SubscriptionId,
    handler: Handler,
    once: bool,
}

#[derive(Default)]
struct HubInner {
    topics: Mutex<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

/// Process-wide publish/subscribe bus
///
/// Cloning is cheap; clones share the same subscriber table.
#[derive(Clone, Default)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topics = self.inner.topics.lock();
        let counts: HashMap<&str, usize> = topics
            .iter()
            .map(|(topic, subs)| (topic.as_str(), subs.len()))
            .collect();
        f.debug_struct("EventHub").field("topics", &counts).finish()
    }
}

impl EventHub {
    /// Create a new event hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a topic
    ///
    /// The returned [`Subscription`] can be used to unsubscribe; dropping it
    /// keeps the subscription alive.
    pub fn on<F, Fut>(&self, topic: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.subscribe(topic.into(), handler, false)
    }

    /// Subscribe to the next event on a topic only
    pub fn once<F, Fut>(&self, topic: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.subscribe(topic.into(), handler, true)
    }

    /// Remove one subscriber. Returns whether it was present.
    pub fn off(&self, topic: &str, id: SubscriptionId) -> bool {
        remove_subscriber(&self.inner, topic, id)
    }

    /// Emit an event to every current subscriber of `topic`
    ///
    /// Returns once every subscriber future has settled.
    pub async fn emit(&self, topic: &str, payload: serde_json::Value) -> EmitReport {
        let handlers: Vec<(SubscriptionId, Handler)> = {
            let mut topics = self.inner.topics.lock();
            let Some(subscribers) = topics.get_mut(topic) else {
                return EmitReport::default();
            };

            let snapshot = subscribers
                .iter()
                .map(|s| (s.id, Arc::clone(&s.handler)))
                .collect();

            subscribers.retain(|s| !s.once);
            if subscribers.is_empty() {
                topics.remove(topic);
            }

            snapshot
        };

        let event = Event {
            topic: topic.to_string(),
            payload,
        };

        let pending: Vec<_> = handlers
            .into_iter()
            .map(|(id, handler)| {
                let event = event.clone();
                match std::panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                    Ok(fut) => AssertUnwindSafe(fut)
                        .catch_unwind()
                        .map(move |outcome| (id, outcome))
                        .boxed(),
                    Err(panic) => futures::future::ready((id, Err(panic))).boxed(),
                }
            })
            .collect();

        let mut report = EmitReport {
            delivered: pending.len(),
            failed: 0,
        };

        for (id, outcome) in join_all(pending).await {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(topic, subscription = id.0, error = %e, "Event handler failed");
                }
                Err(panic) => {
                    report.failed += 1;
                    warn!(
                        topic,
                        subscription = id.0,
                        panic = panic_message(panic.as_ref()),
                        "Event handler panicked"
                    );
                }
            }
        }

        debug!(
            topic,
            delivered = report.delivered,
            failed = report.failed,
            "Event emitted"
        );

        report
    }

    /// Remove every subscriber of one topic, or of every topic
    pub fn clear(&self, topic: Option<&str>) {
        let mut topics = self.inner.topics.lock();
        match topic {
            Some(topic) => {
                topics.remove(topic);
            }
            None => topics.clear(),
        }
    }

    /// Number of subscribers currently attached to a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .lock()
            .get(topic)
            .map_or(0, Vec::len)
    }

    fn subscribe<F, Fut>(&self, topic: String, handler: F, once: bool) -> Subscription
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let handler: Handler = Arc::new(move |event| handler(event).boxed());

        self.inner
            .topics
            .lock()
            .entry(topic.clone())
            .or_default()
            .push(Subscriber { id, handler, once });

        Subscription {
            hub: Arc::downgrade(&self.inner),
            topic,
            id,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn remove_subscriber(inner: &HubInner, topic: &str, id: SubscriptionId) -> bool {
    let mut topics = inner.topics.lock();
    let Some(subscribers) = topics.get_mut(topic) else {
        return false;
    };

    let before = subscribers.len();
    subscribers.retain(|s| s.id != id);
    let removed = subscribers.len() != before;

    if subscribers.is_empty() {
        topics.remove(topic);
    }

    removed
}

/// Handle to one subscription
#[derive(Debug, Clone)]
pub struct Subscription {
    hub: Weak<HubInner>,
    topic: String,
    id: SubscriptionId,
}

impl Subscription {
    /// Subscription id
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Topic subscribed to
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Remove the subscription. Returns whether it was still present.
    pub fn unsubscribe(self) -> bool {
        match self.hub.upgrade() {
            Some(inner) => remove_subscriber(&inner, &self.topic, self.id),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[tokio::test]
    async fn test_failing_subscriber_does_not_block_others() {
        let hub = EventHub::new();
        let hits = counter();

        hub.on("payroll:closed", |_event| async { Err::<(), HandlerError>("boom".into()) });
        let seen = Arc::clone(&hits);
        hub.on("payroll:closed", move |_event| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                HandlerResult::Ok(())
            }
        });

        let report = hub.emit("payroll:closed", serde_json::json!({})).await;
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_subscriber_is_isolated() {
        let hub = EventHub::new();
        let hits = counter();

        hub.on(topics::PLUGIN_ACTIVATED, |event: Event| async move {
            assert!(event.payload.is_null(), "subscriber bug");
            HandlerResult::Ok(())
        });
        hub.on(
            topics::PLUGIN_ACTIVATED,
            |event: Event| -> futures::future::Ready<HandlerResult> {
                panic!("no future for {}", event.topic)
            },
        );
        let seen = Arc::clone(&hits);
        hub.on(topics::PLUGIN_ACTIVATED, move |_event| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                HandlerResult::Ok(())
            }
        });

        let report = hub
            .emit(topics::PLUGIN_ACTIVATED, serde_json::json!({}))
            .await;
        assert_eq!(report.delivered, 3);
        assert_eq!(report.failed, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Subscribers stay attached and the hub stays usable
        assert_eq!(hub.subscriber_count(topics::PLUGIN_ACTIVATED), 3);
        let report = hub
            .emit(topics::PLUGIN_ACTIVATED, serde_json::json!({}))
            .await;
        assert_eq!(report.failed, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panic_message_extraction() {
        let literal: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(literal.as_ref()), "static message");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(owned.as_ref()), "owned message");
        let other: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }

    #[tokio::test]
    async fn test_subscribers_invoked_in_subscription_order() {
        let hub = EventHub::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let order = Arc::clone(&order);
            hub.on("topic", move |_event| {
                order.lock().push(n);
                async { HandlerResult::Ok(()) }
            });
        }

        hub.emit("topic", serde_json::Value::Null).await;
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_async_work_is_awaited() {
        let hub = EventHub::new();
        let hits = counter();

        let seen = Arc::clone(&hits);
        hub.on("slow", move |_event| {
            let seen = Arc::clone(&seen);
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                seen.fetch_add(1, Ordering::SeqCst);
                HandlerResult::Ok(())
            }
        });

        hub.emit("slow", serde_json::Value::Null).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_once_removes_after_first_delivery() {
        let hub = EventHub::new();
        let hits = counter();

        let seen = Arc::clone(&hits);
        hub.once("ready", move |_event| {
            seen.fetch_add(1, Ordering::SeqCst);
            async { HandlerResult::Ok(()) }
        });

        hub.emit("ready", serde_json::Value::Null).await;
        hub.emit("ready", serde_json::Value::Null).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(hub.subscriber_count("ready"), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_and_off() {
        let hub = EventHub::new();
        let first = hub.on("a", |_event| async { HandlerResult::Ok(()) });
        let second = hub.on("a", |_event| async { HandlerResult::Ok(()) });
        assert_eq!(hub.subscriber_count("a"), 2);

        assert!(first.unsubscribe());
        assert!(hub.off("a", second.id()));
        assert!(!hub.off("a", second.id()));

        let report = hub.emit("a", serde_json::Value::Null).await;
        assert_eq!(report.delivered, 0);
    }

    #[tokio::test]
    async fn test_payload_delivered() {
        let hub = EventHub::new();
        let received = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&received);
        hub.on(topics::PLUGIN_ACTIVATED, move |event| {
            *slot.lock() = Some(event.payload);
            async { HandlerResult::Ok(()) }
        });

        hub.emit(
            topics::PLUGIN_ACTIVATED,
            serde_json::json!({ "pluginId": "hello-world" }),
        )
        .await;

        let payload = received.lock().clone().unwrap();
        assert_eq!(payload["pluginId"], "hello-world");
    }

    #[test]
    fn test_clear() {
        let hub = EventHub::new();
        hub.on("a", |_event| async { HandlerResult::Ok(()) });
        hub.on("b", |_event| async { HandlerResult::Ok(()) });

        hub.clear(Some("a"));
        assert_eq!(hub.subscriber_count("a"), 0);
        assert_eq!(hub.subscriber_count("b"), 1);

        hub.clear(None);
        assert_eq!(hub.subscriber_count("b"), 0);
    }
}
