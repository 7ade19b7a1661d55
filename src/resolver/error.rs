#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no event stream for tracer `{0}`")]
    UnknownTracer(String),
    #[error("event stream for tracer `{0}` is closed")]
    StreamClosed(String),
    #[error("resolver must be created inside a tokio runtime: {0}")]
    NoRuntime(#[source] tokio::runtime::TryCurrentError),
}

pub type Result<T> = std::result::Result<T, Error>;
