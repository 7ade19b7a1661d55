//! The gadget factory contract and its optional capabilities.
//!
//! Every gadget implements [`TraceFactory`]. Optional behavior is declared by
//! returning a capability handle from the matching query method; the free
//! functions in this module apply the documented fallback when a gadget does
//! not declare a capability.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::resolver::Resolver;

use super::operation::TraceOperation;
use super::trace::{OutputMode, TraceClient};
use super::Result;

pub trait TraceFactory: Send + Sync {
    /// Hands the resolver and the persistence client to the gadget.
    ///
    /// # Errors
    ///
    /// Gadgets backed by a [`BaseFactory`](super::BaseFactory) report a repeated
    /// call as [`Error::AlreadyInitialized`](super::Error::AlreadyInitialized).
    fn initialize(&self, resolver: Arc<dyn Resolver>, client: Arc<dyn TraceClient>) -> Result<()>;

    /// Releases everything the gadget holds for the trace `name`.
    fn delete(&self, name: &str);

    /// Operations users can request through the operation annotation.
    fn operations(&self) -> BTreeMap<String, TraceOperation>;

    fn scheme(&self) -> Option<&dyn SchemeCapability> {
        None
    }

    fn output_modes(&self) -> Option<&dyn OutputModesCapability> {
        None
    }

    fn documentation(&self) -> Option<&dyn DocumentationCapability> {
        None
    }
}

/// Lets a gadget register the resource kinds it uses.
pub trait SchemeCapability {
    fn add_to_scheme(&self, scheme: &mut Scheme);
}

pub trait OutputModesCapability {
    fn output_modes_supported(&self) -> BTreeSet<OutputMode>;
}

pub trait DocumentationCapability {
    fn description(&self) -> String;
}

/// Registry of `(group/version, kind)` pairs known to the controller.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Scheme {
    kinds: BTreeSet<(String, String)>,
}

impl Scheme {
    pub fn add_known_type(&mut self, group_version: impl Into<String>, kind: impl Into<String>) {
        self.kinds.insert((group_version.into(), kind.into()));
    }

    pub fn recognizes(&self, group_version: &str, kind: &str) -> bool {
        self.kinds
            .contains(&(group_version.to_owned(), kind.to_owned()))
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// Output modes of `factory`; only [`OutputMode::Status`] if it declares none.
pub fn supported_output_modes(factory: &dyn TraceFactory) -> BTreeSet<OutputMode> {
    match factory.output_modes() {
        Some(capability) => capability.output_modes_supported(),
        None => BTreeSet::from([OutputMode::Status]),
    }
}

/// Description of `factory`; empty if it declares none.
pub fn description(factory: &dyn TraceFactory) -> String {
    factory
        .documentation()
        .map(|capability| capability.description())
        .unwrap_or_default()
}

/// Lets `factory` register its kinds in `scheme`; does nothing if it declares no scheme.
pub fn add_to_scheme(factory: &dyn TraceFactory, scheme: &mut Scheme) {
    if let Some(capability) = factory.scheme() {
        capability.add_to_scheme(scheme);
    }
}
