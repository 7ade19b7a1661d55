use std::collections::BTreeMap;

use dashmap::DashMap;

use crate::container::ContainerSelector;

use super::{Error, Result};

/// Annotation through which users request an operation on a trace.
pub const OPERATION_ANNOTATION: &str = "gadget.kinvolk.io/operation";

/// Where a gadget writes its results.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum OutputMode {
    /// Results are written into the trace status.
    #[default]
    Status,
    Stream,
    File,
    ExternalResource,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RunMode {
    #[default]
    Auto,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TraceState {
    Started,
    Stopped,
    Completed,
}

/// Container filter as written in a trace resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContainerFilter {
    pub namespace: String,
    pub podname: String,
    pub container_name: String,
    pub labels: BTreeMap<String, String>,
}

impl From<&ContainerFilter> for ContainerSelector {
    fn from(filter: &ContainerFilter) -> Self {
        ContainerSelector {
            namespace: filter.namespace.clone(),
            podname: filter.podname.clone(),
            name: filter.container_name.clone(),
            labels: filter.labels.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TraceMeta {
    pub namespace: String,
    pub name: String,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TraceSpec {
    pub node: String,
    pub gadget: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<ContainerFilter>,
    pub run_mode: RunMode,
    pub output_mode: OutputMode,
    pub output: String,
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TraceStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TraceState>,
    pub output: String,
    pub operation_error: String,
    pub operation_warning: String,
}

/// The persisted trace resource handed to gadget operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Trace {
    pub metadata: TraceMeta,
    pub spec: TraceSpec,
    pub status: TraceStatus,
}

impl Trace {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        gadget: impl Into<String>,
    ) -> Self {
        Self {
            metadata: TraceMeta {
                namespace: namespace.into(),
                name: name.into(),
                annotations: BTreeMap::default(),
            },
            spec: TraceSpec {
                gadget: gadget.into(),
                ..TraceSpec::default()
            },
            status: TraceStatus::default(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Registry key of this trace inside a gadget factory: `namespace/name`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.metadata.namespace, self.metadata.name)
    }

    /// The operation requested through [`OPERATION_ANNOTATION`], if any.
    pub fn operation(&self) -> Option<&str> {
        self.metadata
            .annotations
            .get(OPERATION_ANNOTATION)
            .map(String::as_str)
    }

    pub fn set_operation(&mut self, operation: impl Into<String>) {
        self.metadata
            .annotations
            .insert(OPERATION_ANNOTATION.to_owned(), operation.into());
    }

    /// The selector described by the trace filter; matches every container when unset.
    pub fn selector(&self) -> ContainerSelector {
        self.spec
            .filter
            .as_ref()
            .map(ContainerSelector::from)
            .unwrap_or_default()
    }
}

/// Persistence of trace resources. Implementations must be cheap to call from
/// gadget operations and notification callbacks.
pub trait TraceClient: Send + Sync {
    fn get(&self, namespace: &str, name: &str) -> Option<Trace>;

    /// Stores the status of `trace`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TraceNotFound`] if the trace is not known to the client.
    fn update_status(&self, trace: &Trace) -> Result<()>;
}

/// [`TraceClient`] keeping traces in memory.
#[derive(Debug, Default)]
pub struct InMemoryTraceClient {
    traces: DashMap<(String, String), Trace>,
}

impl InMemoryTraceClient {
    pub fn insert(&self, trace: Trace) {
        let key = (trace.metadata.namespace.clone(), trace.metadata.name.clone());
        self.traces.insert(key, trace);
    }

    pub fn remove(&self, namespace: &str, name: &str) -> Option<Trace> {
        self.traces
            .remove(&(namespace.to_owned(), name.to_owned()))
            .map(|(_, trace)| trace)
    }
}

impl TraceClient for InMemoryTraceClient {
    fn get(&self, namespace: &str, name: &str) -> Option<Trace> {
        self.traces
            .get(&(namespace.to_owned(), name.to_owned()))
            .map(|entry| entry.value().clone())
    }

    fn update_status(&self, trace: &Trace) -> Result<()> {
        let key = (trace.metadata.namespace.clone(), trace.metadata.name.clone());
        match self.traces.get_mut(&key) {
            Some(mut stored) => {
                stored.status = trace.status.clone();
                Ok(())
            }
            None => Err(Error::TraceNotFound {
                namespace: key.0,
                name: key.1,
            }),
        }
    }
}
