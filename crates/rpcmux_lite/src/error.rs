use thiserror::Error;

use crate::id::CallId;
use crate::metadata::Metadata;

/// gRPC status codes as reported by the transport in `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum StatusCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
    /// A code outside the well-known range, kept verbatim.
    Other(i32),
}

impl StatusCode {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => StatusCode::Ok,
            1 => StatusCode::Cancelled,
            2 => StatusCode::Unknown,
            3 => StatusCode::InvalidArgument,
            4 => StatusCode::DeadlineExceeded,
            5 => StatusCode::NotFound,
            6 => StatusCode::AlreadyExists,
            7 => StatusCode::PermissionDenied,
            8 => StatusCode::ResourceExhausted,
            9 => StatusCode::FailedPrecondition,
            10 => StatusCode::Aborted,
            11 => StatusCode::OutOfRange,
            12 => StatusCode::Unimplemented,
            13 => StatusCode::Internal,
            14 => StatusCode::Unavailable,
            15 => StatusCode::DataLoss,
            16 => StatusCode::Unauthenticated,
            other => StatusCode::Other(other),
        }
    }

    pub fn to_code(&self) -> i32 {
        match self {
            StatusCode::Ok => 0,
            StatusCode::Cancelled => 1,
            StatusCode::Unknown => 2,
            StatusCode::InvalidArgument => 3,
            StatusCode::DeadlineExceeded => 4,
            StatusCode::NotFound => 5,
            StatusCode::AlreadyExists => 6,
            StatusCode::PermissionDenied => 7,
            StatusCode::ResourceExhausted => 8,
            StatusCode::FailedPrecondition => 9,
            StatusCode::Aborted => 10,
            StatusCode::OutOfRange => 11,
            StatusCode::Unimplemented => 12,
            StatusCode::Internal => 13,
            StatusCode::Unavailable => 14,
            StatusCode::DataLoss => 15,
            StatusCode::Unauthenticated => 16,
            StatusCode::Other(code) => *code,
        }
    }
}

/// An error raised by the remote side of a call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {})", code.to_code())]
pub struct TransportError {
    pub message: String,
    pub code: StatusCode,
    pub trailers: Metadata,
}

impl TransportError {
    pub fn new(message: impl Into<String>, code: i32, trailers: Metadata) -> Self {
        Self {
            message: message.into(),
            code: StatusCode::from_code(code),
            trailers,
        }
    }
}

/// The failure delivered to a call's completion handles and stream.
///
/// One instance is cloned into every outstanding handle of the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CallError {
    /// The transport reported an error for this call.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The call was cancelled locally before it completed.
    #[error("call cancelled")]
    Cancelled,
}

impl CallError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CallError::Cancelled)
    }

    /// The status code carried by a transport error.
    pub fn code(&self) -> Option<StatusCode> {
        match self {
            CallError::Transport(e) => Some(e.code),
            CallError::Cancelled => None,
        }
    }
}

/// Errors that can occur when starting a call on the client.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RpcClientError {
    /// A call with this identity is already registered.
    #[error("call {0} is already registered")]
    DuplicateCall(CallId),

    /// The configured limit of outstanding calls has been reached.
    #[error("too many outstanding calls (limit {limit})")]
    TooManyCalls { limit: usize },

    /// The client was shut down and no longer accepts calls.
    #[error("client is shut down")]
    Shutdown,
}
