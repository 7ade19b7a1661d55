//! Building blocks shared by every tracing gadget.
//!
//! A gadget implements [`TraceFactory`] and keeps its per-trace state in a
//! [`BaseFactory`]. The controller hands it a [`Resolver`](crate::resolver::Resolver)
//! and a [`TraceClient`] through `initialize`, runs requested operations with
//! [`apply_operation`] and calls `delete` once a trace resource goes away.
//!
//! # Key Components
//!
//! - [`BaseFactory`] — named, lock-protected store of one trace value per name.
//! - [`TraceFactory`] — required gadget contract plus optional capability queries.
//! - [`TraceOperation`] — user-invocable action with documentation and ordering.
//! - [`Trace`] — the persisted trace resource.
mod capabilities;
mod error;
mod factory;
mod operation;
mod trace;

pub use capabilities::{
    DocumentationCapability, OutputModesCapability, Scheme, SchemeCapability, TraceFactory,
    add_to_scheme, description, supported_output_modes,
};
pub use error::{Error, Result};
pub use factory::{BaseFactory, DeleteTrace};
pub use operation::{OperationFn, TraceOperation, apply_operation, sorted_operations};
pub use trace::{
    ContainerFilter, InMemoryTraceClient, OPERATION_ANNOTATION, OutputMode, RunMode, Trace,
    TraceClient, TraceMeta, TraceSpec, TraceState, TraceStatus,
};

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::container::{ContainerDefinition, ContainerID};
    use crate::pubsub::{EventType, FuncNotify, PubSubEvent, SubscriptionKey};
    use crate::resolver::{ContainerResolver, Resolver};

    /// Tracks the mount namespaces of the containers selected by a trace.
    #[derive(Default)]
    struct MntnsTrace {
        key: Mutex<Option<SubscriptionKey>>,
        resolver: Mutex<Option<Arc<dyn Resolver>>>,
        mntns: Mutex<BTreeSet<u64>>,
    }

    impl MntnsTrace {
        fn start(self: &Arc<Self>, name: &str, resolver: Arc<dyn Resolver>, trace: &Trace) {
            let key = SubscriptionKey::from(format!("mntns/{name}"));
            let callback: FuncNotify = {
                let this = Arc::clone(self);
                Arc::new(move |event: PubSubEvent| {
                    let mut mntns = this.mntns.lock().unwrap();
                    match event.event_type {
                        EventType::Added => mntns.insert(event.container.mntns),
                        EventType::Removed => mntns.remove(&event.container.mntns),
                    };
                })
            };
            let existing = resolver.subscribe(key.clone(), trace.selector(), callback);
            self.mntns
                .lock()
                .unwrap()
                .extend(existing.iter().map(|c| c.mntns));
            *self.key.lock().unwrap() = Some(key);
            *self.resolver.lock().unwrap() = Some(resolver);
        }

        fn stop(&self) {
            let key = self.key.lock().unwrap().take();
            let resolver = self.resolver.lock().unwrap().take();
            if let (Some(key), Some(resolver)) = (key, resolver) {
                resolver.unsubscribe(&key);
            }
        }

        fn mntns(&self) -> BTreeSet<u64> {
            self.mntns.lock().unwrap().clone()
        }
    }

    struct MntnsGadget {
        base: Arc<BaseFactory<Arc<MntnsTrace>>>,
    }

    impl MntnsGadget {
        fn new() -> Self {
            let base = BaseFactory::<Arc<MntnsTrace>>::new()
                .with_delete_trace(|_: &str, trace: &Arc<MntnsTrace>| trace.stop());
            Self {
                base: Arc::new(base),
            }
        }
    }

    impl TraceFactory for MntnsGadget {
        fn initialize(
            &self,
            resolver: Arc<dyn Resolver>,
            client: Arc<dyn TraceClient>,
        ) -> Result<()> {
            self.base.initialize(resolver, client)
        }

        fn delete(&self, name: &str) {
            self.base.delete(name);
        }

        fn operations(&self) -> BTreeMap<String, TraceOperation> {
            let start = {
                let base = Arc::clone(&self.base);
                TraceOperation::new("Start tracking mount namespaces", 0, move |name, trace| {
                    let state = base
                        .lookup_or_create(name, Some(|| Arc::new(MntnsTrace::default())))
                        .unwrap();
                    let (Ok(resolver), Ok(client)) = (base.resolver(), base.client()) else {
                        trace.status.operation_error = "not initialized".to_owned();
                        return;
                    };
                    state.start(name, Arc::clone(resolver), trace);
                    trace.status.state = Some(TraceState::Started);
                    client.update_status(trace).unwrap();
                })
            };
            let stop = {
                let base = Arc::clone(&self.base);
                TraceOperation::new("Stop tracking", 1, move |name, trace| {
                    if let Some(state) = base.lookup(name) {
                        state.stop();
                    }
                    trace.status.state = Some(TraceState::Stopped);
                })
            };
            BTreeMap::from([("start".to_owned(), start), ("stop".to_owned(), stop)])
        }

        fn documentation(&self) -> Option<&dyn DocumentationCapability> {
            Some(self)
        }
    }

    impl DocumentationCapability for MntnsGadget {
        fn description(&self) -> String {
            "Tracks mount namespaces of selected containers".to_owned()
        }
    }

    fn container(id: &str, namespace: &str, name: &str, mntns: u64) -> ContainerDefinition {
        ContainerDefinition::new(ContainerID::new(id).unwrap(), namespace, "pod", name, mntns, 1)
    }

    async fn wait_for(state: &MntnsTrace, expected: &[u64]) {
        let expected: BTreeSet<u64> = expected.iter().copied().collect();
        tokio::time::timeout(Duration::from_secs(5), async {
            while state.mntns() != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("mount namespaces never converged");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_gadget_lifecycle() {
        let resolver = Arc::new(ContainerResolver::try_current().unwrap());
        let collection = resolver.collection();
        collection.add_container(container("a", "default", "web", 11)).unwrap();
        collection.add_container(container("b", "other", "web", 12)).unwrap();

        let client = Arc::new(InMemoryTraceClient::default());
        let gadget = MntnsGadget::new();
        // initialize works while an operations map still shares the factory
        let operations = gadget.operations();
        gadget.initialize(resolver.clone(), client.clone()).unwrap();
        assert_eq!(sorted_operations(&operations)[0].0, "start");
        assert_eq!(
            description(&gadget),
            "Tracks mount namespaces of selected containers"
        );
        assert_eq!(
            supported_output_modes(&gadget),
            BTreeSet::from([OutputMode::Status])
        );

        let mut trace = Trace::new("gadget", "t1", "mntns");
        trace.spec.filter = Some(ContainerFilter {
            namespace: "default".to_owned(),
            ..ContainerFilter::default()
        });
        client.insert(trace.clone());

        trace.set_operation("start");
        assert_eq!(
            apply_operation(&gadget, &mut trace).unwrap().as_deref(),
            Some("start")
        );
        assert_eq!(
            client.get("gadget", "t1").unwrap().status.state,
            Some(TraceState::Started)
        );
        let state = gadget.base.lookup("gadget/t1").unwrap();
        assert_eq!(state.mntns(), BTreeSet::from([11]));

        collection.add_container(container("c", "default", "db", 13)).unwrap();
        collection.add_container(container("d", "other", "db", 14)).unwrap();
        wait_for(&state, &[11, 13]).await;
        collection.remove_container("a");
        wait_for(&state, &[13]).await;

        gadget.delete("gadget/t1");
        assert!(gadget.base.lookup("gadget/t1").is_none());
        collection.add_container(container("e", "default", "cache", 15)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(state.mntns(), BTreeSet::from([13]));

        // deleting again is a no-op
        gadget.delete("gadget/t1");
    }
}
