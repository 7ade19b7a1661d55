use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::capabilities::TraceFactory;
use super::trace::{OPERATION_ANNOTATION, Trace};
use super::{Error, Result};

/// Action run for a named operation. It receives the trace name and the trace
/// resource and reports its outcome by writing the trace status.
pub type OperationFn = Arc<dyn Fn(&str, &mut Trace) + Send + Sync>;

/// An operation users can request on a gadget through [`OPERATION_ANNOTATION`].
#[derive(Clone)]
pub struct TraceOperation {
    pub operation: OperationFn,
    /// Documents the operation.
    pub doc: String,
    /// Position in documentation listings; ties are ordered by name.
    pub order: i32,
}

impl TraceOperation {
    pub fn new(
        doc: impl Into<String>,
        order: i32,
        operation: impl Fn(&str, &mut Trace) + Send + Sync + 'static,
    ) -> Self {
        Self {
            operation: Arc::new(operation),
            doc: doc.into(),
            order,
        }
    }

    pub fn call(&self, name: &str, trace: &mut Trace) {
        (self.operation)(name, trace)
    }
}

impl fmt::Debug for TraceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceOperation")
            .field("doc", &self.doc)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

/// Lists operations in documentation order: by `order`, then by name.
pub fn sorted_operations(
    operations: &BTreeMap<String, TraceOperation>,
) -> Vec<(&str, &TraceOperation)> {
    let mut out: Vec<(&str, &TraceOperation)> = operations
        .iter()
        .map(|(name, op)| (name.as_str(), op))
        .collect();
    out.sort_by(|a, b| a.1.order.cmp(&b.1.order).then_with(|| a.0.cmp(b.0)));
    out
}

/// Runs the operation requested on `trace` and clears the request.
///
/// Returns the name of the operation that ran, or `None` if the trace carried
/// no request. The operation is called with the trace key (`namespace/name`).
///
/// # Errors
///
/// Returns [`Error::UnknownOperation`] if `factory` exposes no such operation.
/// The request is cleared and the trace status carries the error as well.
pub fn apply_operation(factory: &dyn TraceFactory, trace: &mut Trace) -> Result<Option<String>> {
    let Some(requested) = trace.metadata.annotations.remove(OPERATION_ANNOTATION) else {
        return Ok(None);
    };
    trace.status.operation_error.clear();
    trace.status.operation_warning.clear();

    let operations = factory.operations();
    match operations.get(&requested) {
        Some(operation) => {
            log::debug!("Running operation `{}` on trace `{}`", requested, trace.key());
            operation.call(&trace.key(), trace);
            Ok(Some(requested))
        }
        None => {
            let err = Error::UnknownOperation {
                gadget: trace.spec.gadget.clone(),
                operation: requested,
            };
            log::warn!("Trace `{}`: {}", trace.key(), err);
            trace.status.operation_error = err.to_string();
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_operations() {
        let mut ops = BTreeMap::new();
        ops.insert("stop".to_owned(), TraceOperation::new("Stop", 1, |_, _| {}));
        ops.insert("start".to_owned(), TraceOperation::new("Start", 0, |_, _| {}));
        ops.insert("generate".to_owned(), TraceOperation::new("Gen", 1, |_, _| {}));

        let names: Vec<&str> = sorted_operations(&ops).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["start", "generate", "stop"]);
    }

    #[test]
    fn test_call_passes_name_and_trace() {
        let op = TraceOperation::new("Start", 0, |name, trace| {
            trace.status.output = format!("started {name}");
        });
        let mut trace = Trace::new("gadget", "t", "execsnoop");
        op.call("gadget/t", &mut trace);
        assert_eq!(trace.status.output, "started gadget/t");
    }
}
