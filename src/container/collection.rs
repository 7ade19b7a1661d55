use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use tokio::runtime::Handle;

use crate::pubsub::{EventType, FuncNotify, PubSub, SubscriptionKey};

use super::{ContainerDefinition, ContainerID, ContainerSelector, Error, Result};

/// Live set of known containers and the subscribers interested in them.
///
/// Reads go straight to the concurrent map. Mutations and subscriptions are
/// serialized by a single mutation lock so that a subscription snapshot and the
/// events queued for it never overlap or leave a gap.
#[derive(Debug)]
pub struct ContainerCollection {
    containers: DashMap<ContainerID, ContainerDefinition>,
    pubsub: PubSub,
    mutation: Mutex<()>,
}

impl ContainerCollection {
    /// Creates an empty collection whose notification workers run on `handle`.
    pub fn new(handle: Handle) -> Self {
        Self {
            containers: DashMap::default(),
            pubsub: PubSub::new(handle),
            mutation: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.mutation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a container and notifies matching subscribers.
    ///
    /// Re-adding a known container id replaces the old definition; subscribers of
    /// the old definition see it removed before the new one is added.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroMntns`] or [`Error::ZeroPid`] if the definition
    /// carries a zero mount namespace inode or PID. Zero is reserved as the
    /// "not found" value of the lookups.
    pub fn add_container(&self, container: ContainerDefinition) -> Result<()> {
        if container.mntns == 0 {
            return Err(Error::ZeroMntns(container.id));
        }
        if container.pid == 0 {
            return Err(Error::ZeroPid(container.id));
        }

        let _guard = self.lock();
        log::debug!(
            "Adding container `{}` ({}/{}/{}) mntns={} pid={}",
            container.id,
            container.namespace,
            container.podname,
            container.name,
            container.mntns,
            container.pid
        );
        if let Some(previous) = self.containers.insert(container.id.clone(), container.clone()) {
            self.pubsub.publish(EventType::Removed, &previous);
        }
        self.pubsub.publish(EventType::Added, &container);
        Ok(())
    }

    /// Forgets a container and notifies matching subscribers.
    ///
    /// Returns the removed definition, or `None` if the id was unknown.
    pub fn remove_container(&self, id: &str) -> Option<ContainerDefinition> {
        let _guard = self.lock();
        match self.containers.remove(id) {
            Some((_, container)) => {
                log::debug!("Removing container `{}`", container.id);
                self.pubsub.publish(EventType::Removed, &container);
                Some(container)
            }
            None => {
                log::debug!("Removing container `{}`: does not exist", id);
                None
            }
        }
    }

    pub fn get_container(&self, id: &str) -> Option<ContainerDefinition> {
        self.containers.get(id).map(|entry| entry.value().clone())
    }

    /// Returns all known containers ordered by id.
    pub fn containers(&self) -> Vec<ContainerDefinition> {
        self.select(&ContainerSelector::all())
    }

    /// Returns every known container matching `selector`, ordered by id.
    pub fn select(&self, selector: &ContainerSelector) -> Vec<ContainerDefinition> {
        let mut out: Vec<ContainerDefinition> = self
            .containers
            .iter()
            .filter(|entry| selector.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    // Several live ids can share one namespace/pod/name while a container
    // restarts. The lowest id wins so that lookups do not depend on map order.
    fn find_container<T>(
        &self,
        namespace: &str,
        pod: &str,
        name: &str,
        f: impl Fn(&ContainerDefinition) -> T,
    ) -> Option<T> {
        self.containers
            .iter()
            .filter(|entry| entry.value().is_in_pod(namespace, pod) && entry.value().name == name)
            .min_by(|a, b| a.key().cmp(b.key()))
            .map(|entry| f(entry.value()))
    }

    fn collect_pod<T>(
        &self,
        namespace: &str,
        pod: &str,
        f: impl Fn(&ContainerDefinition) -> T,
    ) -> HashMap<String, T> {
        let mut pod_containers: Vec<ContainerDefinition> = self
            .containers
            .iter()
            .filter(|entry| entry.value().is_in_pod(namespace, pod))
            .map(|entry| entry.value().clone())
            .collect();
        // highest id first, so the lowest id of a duplicated name is inserted last
        pod_containers.sort_by(|a, b| b.id.cmp(&a.id));
        pod_containers
            .iter()
            .map(|container| (container.name.clone(), f(container)))
            .collect()
    }

    /// Returns the mount namespace inode of `namespace/pod/container`, or zero if unknown.
    ///
    /// If several known ids carry that name, the one with the lowest id is used.
    pub fn lookup_mntns_by_container(&self, namespace: &str, pod: &str, container: &str) -> u64 {
        self.find_container(namespace, pod, container, |c| c.mntns)
            .unwrap_or_default()
    }

    /// Returns the mount namespace inodes of all containers of `namespace/pod`,
    /// keyed by container name.
    pub fn lookup_mntns_by_pod(&self, namespace: &str, pod: &str) -> HashMap<String, u64> {
        self.collect_pod(namespace, pod, |c| c.mntns)
    }

    /// Returns the PID of `namespace/pod/container`, or zero if unknown.
    pub fn lookup_pid_by_container(&self, namespace: &str, pod: &str, container: &str) -> u32 {
        self.find_container(namespace, pod, container, |c| c.pid)
            .unwrap_or_default()
    }

    /// Returns the PIDs of all containers of `namespace/pod`, keyed by container name.
    pub fn lookup_pid_by_pod(&self, namespace: &str, pod: &str) -> HashMap<String, u32> {
        self.collect_pod(namespace, pod, |c| c.pid)
    }

    /// Registers `callback` for future events matching `selector` and returns the
    /// containers currently matching it.
    ///
    /// Every container change is either reflected in the returned snapshot or
    /// delivered to `callback`, never both and never neither.
    pub fn subscribe(
        &self,
        key: SubscriptionKey,
        selector: ContainerSelector,
        callback: FuncNotify,
    ) -> Vec<ContainerDefinition> {
        let _guard = self.lock();
        let snapshot = self.select(&selector);
        self.pubsub.subscribe(key, selector, callback);
        snapshot
    }

    pub fn unsubscribe(&self, key: &SubscriptionKey) {
        self.pubsub.unsubscribe(key);
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}
