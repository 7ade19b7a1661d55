#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("factory used before initialize(): no {0} bound")]
    NotInitialized(&'static str),
    #[error("factory is already initialized")]
    AlreadyInitialized,
    #[error("trace `{namespace}/{name}` does not exist")]
    TraceNotFound { namespace: String, name: String },
    #[error("gadget `{gadget}` has no operation `{operation}`")]
    UnknownOperation { gadget: String, operation: String },
    #[error("failed to decode trace: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
