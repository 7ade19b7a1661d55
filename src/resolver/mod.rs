//! Mapping of Kubernetes container identities to kernel identifiers.
//!
//! Gadgets talk to a [`Resolver`] to turn `namespace/pod/container` triples or
//! [`ContainerSelector`]s into mount namespace inodes and PIDs, and to be told
//! when matching containers appear or disappear.
use std::collections::HashMap;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::container::{ContainerCollection, ContainerDefinition, ContainerSelector};
use crate::pubsub::{FuncNotify, SubscriptionKey};

mod error;
mod events;

pub use error::{Error, Result};
pub use events::{DEFAULT_STREAM_CAPACITY, TraceEventStreams};

/// Lookup and subscription protocol used by gadgets.
///
/// Absence is never an error: unknown containers resolve to `0`, unknown pods
/// to an empty map and unmatched selectors to an empty list.
pub trait Resolver: Send + Sync {
    /// Returns the mount namespace inode of the container, or zero if not found.
    fn lookup_mntns_by_container(&self, namespace: &str, pod: &str, container: &str) -> u64;

    /// Returns the mount namespace inodes of all containers of the pod, keyed by
    /// container name, or an empty map if not found.
    fn lookup_mntns_by_pod(&self, namespace: &str, pod: &str) -> HashMap<String, u64>;

    /// Returns the PID of the container, or zero if not found.
    fn lookup_pid_by_container(&self, namespace: &str, pod: &str, container: &str) -> u32;

    /// Returns the PIDs of all containers of the pod, keyed by container name,
    /// or an empty map if not found.
    fn lookup_pid_by_pod(&self, namespace: &str, pod: &str) -> HashMap<String, u32>;

    /// Returns the containers matching `selector`, or an empty list.
    fn get_containers_by_selector(&self, selector: &ContainerSelector) -> Vec<ContainerDefinition>;

    /// Returns the existing containers matching `selector` and registers `callback`
    /// for notifications about later additions and removals.
    fn subscribe(
        &self,
        key: SubscriptionKey,
        selector: ContainerSelector,
        callback: FuncNotify,
    ) -> Vec<ContainerDefinition>;

    /// Undoes a previous call to [`Resolver::subscribe`].
    fn unsubscribe(&self, key: &SubscriptionKey);

    /// Forwards a free-form event line to the stream of `tracer_id`.
    ///
    /// Fails only when the stream is missing or closed. A lagging reader loses
    /// the line instead of failing the call.
    fn publish_event(&self, tracer_id: &str, line: &str) -> Result<()>;
}

/// [`Resolver`] backed by an in-memory [`ContainerCollection`].
#[derive(Debug)]
pub struct ContainerResolver {
    collection: ContainerCollection,
    streams: TraceEventStreams,
}

impl ContainerResolver {
    /// Creates a resolver whose notification workers run on `handle`.
    pub fn new(handle: Handle, stream_capacity: usize) -> Self {
        Self {
            collection: ContainerCollection::new(handle),
            streams: TraceEventStreams::new(stream_capacity),
        }
    }

    /// Creates a resolver bound to the runtime of the calling context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] when called outside of a tokio runtime.
    pub fn try_current() -> Result<Self> {
        let handle = Handle::try_current().map_err(Error::NoRuntime)?;
        Ok(Self::new(handle, DEFAULT_STREAM_CAPACITY))
    }

    pub fn into_shared(self) -> Arc<dyn Resolver> {
        Arc::new(self)
    }

    /// The container registry this resolver reads from and feeds notifications for.
    pub fn collection(&self) -> &ContainerCollection {
        &self.collection
    }

    pub fn streams(&self) -> &TraceEventStreams {
        &self.streams
    }
}

impl Resolver for ContainerResolver {
    fn lookup_mntns_by_container(&self, namespace: &str, pod: &str, container: &str) -> u64 {
        self.collection.lookup_mntns_by_container(namespace, pod, container)
    }

    fn lookup_mntns_by_pod(&self, namespace: &str, pod: &str) -> HashMap<String, u64> {
        self.collection.lookup_mntns_by_pod(namespace, pod)
    }

    fn lookup_pid_by_container(&self, namespace: &str, pod: &str, container: &str) -> u32 {
        self.collection.lookup_pid_by_container(namespace, pod, container)
    }

    fn lookup_pid_by_pod(&self, namespace: &str, pod: &str) -> HashMap<String, u32> {
        self.collection.lookup_pid_by_pod(namespace, pod)
    }

    fn get_containers_by_selector(&self, selector: &ContainerSelector) -> Vec<ContainerDefinition> {
        self.collection.select(selector)
    }

    fn subscribe(
        &self,
        key: SubscriptionKey,
        selector: ContainerSelector,
        callback: FuncNotify,
    ) -> Vec<ContainerDefinition> {
        self.collection.subscribe(key, selector, callback)
    }

    fn unsubscribe(&self, key: &SubscriptionKey) {
        self.collection.unsubscribe(key)
    }

    fn publish_event(&self, tracer_id: &str, line: &str) -> Result<()> {
        self.streams.publish(tracer_id, line)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::container::ContainerID;
    use crate::pubsub::{EventType, PubSubEvent};

    fn resolver() -> ContainerResolver {
        let resolver = ContainerResolver::try_current().unwrap();
        resolver
            .collection()
            .add_container(ContainerDefinition::new(
                ContainerID::new("abc").unwrap(),
                "default",
                "p1",
                "c1",
                1234,
                99,
            ))
            .unwrap();
        resolver
    }

    #[test]
    fn test_try_current_outside_runtime() {
        assert!(matches!(
            ContainerResolver::try_current(),
            Err(Error::NoRuntime(_))
        ));
    }

    #[tokio::test]
    async fn test_lookups_through_trait() {
        let resolver = resolver().into_shared();
        assert_eq!(resolver.lookup_mntns_by_container("default", "p1", "c1"), 1234);
        assert_eq!(resolver.lookup_mntns_by_container("default", "p1", "missing"), 0);
        assert_eq!(resolver.lookup_pid_by_container("default", "p1", "c1"), 99);
        assert_eq!(resolver.lookup_mntns_by_pod("default", "p1").len(), 1);
        assert_eq!(resolver.lookup_pid_by_pod("default", "p1")["c1"], 99);
        assert_eq!(
            resolver
                .get_containers_by_selector(&ContainerSelector::all().namespace("default"))
                .len(),
            1
        );
        assert!(
            resolver
                .get_containers_by_selector(&ContainerSelector::all().name("nope"))
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_publish_event() {
        let resolver = resolver();
        assert!(matches!(
            resolver.publish_event("t1", "line"),
            Err(Error::UnknownTracer(_))
        ));
        let mut rx = resolver.streams().add_stream("t1");
        resolver.publish_event("t1", "line").unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("line"));
    }

    #[tokio::test]
    async fn test_publish_event_to_lagging_reader() {
        let resolver = ContainerResolver::new(Handle::current(), 2);
        let mut rx = resolver.streams().add_stream("t1");
        for line in ["a", "b", "c"] {
            resolver.publish_event("t1", line).unwrap();
        }
        assert_eq!(resolver.streams().dropped_lines("t1"), 1);
        assert_eq!(rx.recv().await.as_deref(), Some("a"));

        drop(rx);
        assert!(matches!(
            resolver.publish_event("t1", "d"),
            Err(Error::StreamClosed(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_callback_may_call_back_into_resolver() {
        let resolver = Arc::new(resolver());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
        let callback: FuncNotify = {
            let resolver = Arc::clone(&resolver);
            let seen = Arc::clone(&seen);
            Arc::new(move |event: PubSubEvent| {
                let c = &event.container;
                let mntns = resolver.lookup_mntns_by_container(&c.namespace, &c.podname, &c.name);
                seen.lock().unwrap().push((event.event_type, mntns));
                let _ = done_tx.send(());
            })
        };
        let snapshot = resolver.subscribe("k".into(), ContainerSelector::all(), callback);
        assert_eq!(snapshot.len(), 1);

        resolver
            .collection()
            .add_container(ContainerDefinition::new(
                ContainerID::new("def").unwrap(),
                "default",
                "p1",
                "c2",
                5678,
                100,
            ))
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(EventType::Added, 5678)]);
        resolver.unsubscribe(&"k".into());
    }
}
