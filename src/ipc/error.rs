//! Errors owned by the IPC server (component J).

use thiserror::Error;

pub type IpcResult<T> = Result<T, IpcError>;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("io error: {0}")]
    Io(#[source] std::io::Error),

    #[error("malformed json: {0}")]
    MalformedJson(#[source] serde_json::Error),

    #[error("frame of {len} bytes exceeds the 1 MiB bound")]
    FrameTooLarge { len: usize },

    #[error("unknown debug request type: {request_type}")]
    UnknownDebugRequestType { request_type: String },
}
