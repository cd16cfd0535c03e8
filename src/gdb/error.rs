//! Error taxonomy of the dispatch layer

use thiserror::Error;

/// Failure delivered through a request callback
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// No debugger session is attached. Nothing was sent.
    #[error("not running")]
    NotRunning,
    /// The request outlived its deadline; any later response is dropped.
    #[error("timeout")]
    Timeout,
    /// An error line reported by gdb, verbatim.
    #[error("{0}")]
    Debugger(String),
    /// The session stream closed before a response arrived.
    #[error("debugger session closed")]
    Closed,
    #[error("session I/O failed: {0}")]
    Io(String),
}

impl From<std::io::Error> for DispatchError {
    fn from(e: std::io::Error) -> Self {
        DispatchError::Io(e.to_string())
    }
}

/// Failure of a host rendering resource
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("resource error: {0}")]
pub struct ResourceError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryViewError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("no active memory view")]
    Inactive,
    #[error("cannot navigate below address 0x0 (requested offset {offset} from 0x{base:x})")]
    Underflow { base: u64, offset: i64 },
    #[error("address overflow (requested offset {offset} from 0x{base:x})")]
    Overflow { base: u64, offset: i64 },
    #[error("could not resolve '{0}' to an address")]
    Unresolved(String),
    #[error("unexpected memory dump from debugger")]
    Malformed,
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluateError {
    #[error("invalid expression: {0}")]
    Validation(String),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BreakpointError {
    #[error("invalid location: {0}")]
    Validation(String),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}
