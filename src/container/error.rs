#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid container id: {0:?}")]
    InvalidContainerID(String),
    #[error("container `{0}` has a zero mount namespace inode")]
    ZeroMntns(super::ContainerID),
    #[error("container `{0}` has a zero PID")]
    ZeroPid(super::ContainerID),
}

pub type Result<T> = std::result::Result<T, Error>;
