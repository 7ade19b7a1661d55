use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::{Error, Result};

/// Default capacity of a tracer's event stream.
pub const DEFAULT_STREAM_CAPACITY: usize = 64;

#[derive(Debug)]
struct EventStream {
    tx: mpsc::Sender<String>,
    dropped: AtomicU64,
}

/// Per-tracer streams of free-form event lines.
///
/// Publishing never waits. A missing or closed stream fails the call
/// immediately. A stream whose reader lags behind drops the line, counts it
/// and still accepts the publish.
#[derive(Debug)]
pub struct TraceEventStreams {
    capacity: usize,
    streams: DashMap<String, EventStream>,
}

impl Default for TraceEventStreams {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_CAPACITY)
    }
}

impl TraceEventStreams {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            streams: DashMap::default(),
        }
    }

    /// Opens the stream for `tracer_id` and returns its reading end.
    ///
    /// An existing stream for the same tracer is replaced; its reader sees the
    /// channel close once buffered lines are drained.
    pub fn add_stream(&self, tracer_id: impl Into<String>) -> mpsc::Receiver<String> {
        let tracer_id = tracer_id.into();
        let (tx, rx) = mpsc::channel(self.capacity);
        let stream = EventStream {
            tx,
            dropped: AtomicU64::new(0),
        };
        if self.streams.insert(tracer_id.clone(), stream).is_some() {
            log::debug!("Replaced event stream for tracer `{}`", tracer_id);
        } else {
            log::debug!("Opened event stream for tracer `{}`", tracer_id);
        }
        rx
    }

    pub fn remove_stream(&self, tracer_id: &str) {
        if self.streams.remove(tracer_id).is_none() {
            log::debug!("Removing event stream for tracer `{}`: does not exist", tracer_id);
        }
    }

    /// Sends `line` to the stream of `tracer_id`.
    ///
    /// When the stream buffer is full the line is dropped and counted in
    /// [`TraceEventStreams::dropped_lines`]; the publish still succeeds.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownTracer`] if no stream was opened for the tracer.
    /// - [`Error::StreamClosed`] if the reading end was dropped.
    pub fn publish(&self, tracer_id: &str, line: impl Into<String>) -> Result<()> {
        let stream = self
            .streams
            .get(tracer_id)
            .ok_or_else(|| Error::UnknownTracer(tracer_id.to_owned()))?;

        match stream.tx.try_send(line.into()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(Error::StreamClosed(tracer_id.to_owned())),
            Err(TrySendError::Full(_)) => {
                let dropped = stream.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!(
                    "Event stream for tracer `{}` is full, dropped line ({} lost so far)",
                    tracer_id,
                    dropped
                );
                Ok(())
            }
        }
    }

    /// Number of lines dropped on the stream of `tracer_id` because its reader
    /// lagged behind. Zero for unknown tracers.
    pub fn dropped_lines(&self, tracer_id: &str) -> u64 {
        self.streams
            .get(tracer_id)
            .map(|stream| stream.dropped.load(Ordering::Relaxed))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
