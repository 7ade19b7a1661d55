use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use crate::resolver::Resolver;

use super::operation::TraceOperation;
use super::trace::TraceClient;
use super::{Error, Result};

/// Teardown hook run by [`BaseFactory::delete`] before a trace is forgotten.
///
/// The hook runs while the factory lock is held. It must not call back into
/// the same factory and should return quickly.
pub trait DeleteTrace<T>: Send + Sync {
    fn delete_trace(&self, name: &str, trace: &T);
}

impl<T, F> DeleteTrace<T> for F
where
    F: Fn(&str, &T) + Send + Sync,
{
    fn delete_trace(&self, name: &str, trace: &T) {
        self(name, trace)
    }
}

struct Collaborators {
    resolver: Arc<dyn Resolver>,
    client: Arc<dyn TraceClient>,
}

/// Per-gadget store holding one trace value per name.
///
/// Each gadget owns its own store; nothing is shared between factories. `T` is
/// the gadget's trace state and is usually an `Arc` so that lookups can hand
/// out clones of it.
pub struct BaseFactory<T> {
    collaborators: OnceLock<Collaborators>,
    delete_trace: Option<Box<dyn DeleteTrace<T>>>,
    traces: Mutex<HashMap<String, T>>,
}

impl<T> Default for BaseFactory<T> {
    fn default() -> Self {
        Self {
            collaborators: OnceLock::new(),
            delete_trace: None,
            traces: Mutex::new(HashMap::default()),
        }
    }
}

impl<T> BaseFactory<T> {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, T>> {
        self.traces.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> fmt::Debug for BaseFactory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseFactory")
            .field("initialized", &self.collaborators.get().is_some())
            .field("delete_trace", &self.delete_trace.is_some())
            .field("traces", &self.lock().len())
            .finish()
    }
}

impl<T: Clone> BaseFactory<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a teardown hook for deleted traces. Without one, deletion only
    /// removes the entry.
    pub fn with_delete_trace(mut self, hook: impl DeleteTrace<T> + 'static) -> Self {
        self.delete_trace = Some(Box::new(hook));
        self
    }

    /// Binds the shared resolver and persistence client.
    ///
    /// Works through a shared reference, so a factory already handed to
    /// operation closures can still be initialized. Both collaborators are bound
    /// together or not at all.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyInitialized`] if collaborators were bound before;
    /// the first binding is kept.
    pub fn initialize(
        &self,
        resolver: Arc<dyn Resolver>,
        client: Arc<dyn TraceClient>,
    ) -> Result<()> {
        self.collaborators
            .set(Collaborators { resolver, client })
            .map_err(|_| Error::AlreadyInitialized)
    }

    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before [`BaseFactory::initialize`] was called.
    pub fn resolver(&self) -> Result<&Arc<dyn Resolver>> {
        self.collaborators
            .get()
            .map(|collaborators| &collaborators.resolver)
            .ok_or(Error::NotInitialized("resolver"))
    }

    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before [`BaseFactory::initialize`] was called.
    pub fn client(&self) -> Result<&Arc<dyn TraceClient>> {
        self.collaborators
            .get()
            .map(|collaborators| &collaborators.client)
            .ok_or(Error::NotInitialized("client"))
    }

    /// Returns the trace stored under `name`, creating it with `new_trace` if it
    /// does not exist yet.
    ///
    /// Without a constructor, a missing trace yields `None` and nothing is
    /// stored. The constructor runs under the factory lock, so concurrent callers
    /// for the same new name construct exactly once.
    pub fn lookup_or_create<F>(&self, name: &str, new_trace: Option<F>) -> Option<T>
    where
        F: FnOnce() -> T,
    {
        let mut traces = self.lock();
        if let Some(trace) = traces.get(name) {
            return Some(trace.clone());
        }

        let trace = new_trace?();
        traces.insert(name.to_owned(), trace.clone());
        Some(trace)
    }

    /// Returns the trace stored under `name` without creating it.
    pub fn lookup(&self, name: &str) -> Option<T> {
        self.lookup_or_create(name, None::<fn() -> T>)
    }

    /// Like [`BaseFactory::lookup_or_create`] with a fallible constructor.
    ///
    /// # Errors
    ///
    /// Returns the constructor's error unchanged; no entry is stored in that case.
    pub fn try_lookup_or_create<E, F>(&self, name: &str, new_trace: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        let mut traces = self.lock();
        if let Some(trace) = traces.get(name) {
            return Ok(trace.clone());
        }

        let trace = new_trace()?;
        traces.insert(name.to_owned(), trace.clone());
        Ok(trace)
    }

    /// Forgets the trace stored under `name`, running the teardown hook first if
    /// one was declared. Unknown names are logged and ignored.
    pub fn delete(&self, name: &str) {
        log::info!("Deleting {}", name);
        let mut traces = self.lock();
        let Some(trace) = traces.get(name) else {
            log::info!("Deleting {}: does not exist", name);
            return;
        };
        if let Some(hook) = &self.delete_trace {
            hook.delete_trace(name, trace);
        }
        traces.remove(name);
    }

    /// Operations exposed by a gadget without any of its own.
    pub fn operations(&self) -> BTreeMap<String, TraceOperation> {
        BTreeMap::new()
    }

    /// Names of all stored traces, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
