//! Container lifecycle notifications.
//!
//! Subscribers register a [`ContainerSelector`] and a callback under a
//! [`SubscriptionKey`]. Every published container event that matches the
//! selector is queued for that subscriber and handed to the callback by a
//! dedicated worker task.
//!
//! # Delivery
//!
//! - Publishing never blocks: events are pushed onto an unbounded per-subscriber queue.
//! - Each subscriber receives events in publication order.
//! - Callbacks run on a tokio worker thread, never on the publishing thread and never
//!   while a lock of this crate is held. A slow callback delays only its own subscription,
//!   but it does occupy a runtime worker thread while it runs.
//! - The worker checks a cancellation flag before each invocation. Once
//!   [`PubSub::unsubscribe`] returns, at most one invocation is still in flight: one that
//!   already passed the check, whether or not its callback has started. It may run after
//!   `unsubscribe` returns. No later event is delivered.
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::container::{ContainerDefinition, ContainerSelector};

/// Callback invoked for every matching container event.
pub type FuncNotify = Arc<dyn Fn(PubSubEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Added,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubEvent {
    pub event_type: EventType,
    pub container: ContainerDefinition,
}

/// Identity of a subscription, used to unsubscribe later.
///
/// Keys are either caller-chosen names or process-unique tokens from
/// [`SubscriptionKey::unique`]. The two kinds never compare equal.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey(KeyKind);

#[derive(Clone, PartialEq, Eq, Hash)]
enum KeyKind {
    Named(Arc<str>),
    Unique(u64),
}

impl SubscriptionKey {
    pub fn unique() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(KeyKind::Unique(NEXT.fetch_add(1, Ordering::Relaxed)))
    }
}

impl From<&str> for SubscriptionKey {
    fn from(value: &str) -> Self {
        Self(KeyKind::Named(value.into()))
    }
}

impl From<String> for SubscriptionKey {
    fn from(value: String) -> Self {
        Self(KeyKind::Named(value.into()))
    }
}

impl fmt::Debug for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            KeyKind::Named(name) => f.write_str(name),
            KeyKind::Unique(id) => write!(f, "#{id}"),
        }
    }
}

struct Subscription {
    selector: ContainerSelector,
    tx: mpsc::UnboundedSender<PubSubEvent>,
    cancelled: Arc<AtomicBool>,
}

impl Subscription {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Fan-out of container events to selector-filtered subscribers.
pub struct PubSub {
    handle: Handle,
    subscriptions: DashMap<SubscriptionKey, Subscription>,
}

impl PubSub {
    /// Creates a notifier whose callback workers run on the given runtime.
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            subscriptions: DashMap::default(),
        }
    }

    /// Registers `callback` under `key`.
    ///
    /// A subscription already registered under the same key is cancelled and
    /// replaced; it receives nothing after this call returns.
    pub fn subscribe(
        &self,
        key: SubscriptionKey,
        selector: ContainerSelector,
        callback: FuncNotify,
    ) {
        let (tx, mut rx) = mpsc::unbounded_channel::<PubSubEvent>();
        let cancelled = Arc::new(AtomicBool::new(false));
        let subscription = Subscription {
            selector,
            tx,
            cancelled: Arc::clone(&cancelled),
        };

        if let Some(previous) = self.subscriptions.insert(key.clone(), subscription) {
            log::debug!("Replacing subscription `{}`", key);
            previous.cancel();
        } else {
            log::debug!("Adding subscription `{}`", key);
        }

        self.handle.spawn(async move {
            while let Some(event) = rx.recv().await {
                if cancelled.load(Ordering::Acquire) {
                    break;
                }
                callback(event);
            }
            log::trace!("Notification worker for subscription `{}` stopped", key);
        });
    }

    /// Removes the subscription registered under `key`. Unknown keys are ignored.
    ///
    /// Does not wait for an invocation already in flight.
    pub fn unsubscribe(&self, key: &SubscriptionKey) {
        match self.subscriptions.remove(key) {
            Some((_, subscription)) => {
                subscription.cancel();
                log::debug!("Removed subscription `{}`", key);
            }
            None => log::debug!("Removing subscription `{}`: does not exist", key),
        }
    }

    /// Queues `event_type` for `container` to every subscriber whose selector matches.
    pub fn publish(&self, event_type: EventType, container: &ContainerDefinition) {
        for entry in self.subscriptions.iter() {
            let subscription = entry.value();
            if !subscription.selector.matches(container) {
                continue;
            }
            let event = PubSubEvent {
                event_type,
                container: container.clone(),
            };
            if subscription.tx.send(event).is_err() {
                log::warn!(
                    "Dropping {:?} event for container `{}`: worker of subscription `{}` is gone",
                    event_type,
                    container.id,
                    entry.key()
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

impl Drop for PubSub {
    fn drop(&mut self) {
        for entry in self.subscriptions.iter() {
            entry.value().cancel();
        }
    }
}

impl fmt::Debug for PubSub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PubSub")
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}
