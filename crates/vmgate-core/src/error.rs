use thiserror::Error;

/// Errors produced by the vmgate session and relay layers.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("invalid vm id: {0}")]
    InvalidId(String),

    /// The runtime refused or failed the create call itself.
    #[error("failed to start vm: {message}")]
    Provisioning { message: String, output: String },

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("failed to resolve vm address: {0}")]
    Resolution(String),

    #[error("vm service not ready: {0}")]
    NotReady(String),

    #[error("origin not allowed: {0}")]
    OriginDenied(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for VmError {
    fn from(e: serde_json::Error) -> Self {
        VmError::Runtime(format!("malformed runtime output: {e}"))
    }
}

pub type VmResult<T> = Result<T, VmError>;
