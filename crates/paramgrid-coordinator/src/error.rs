//! Coordinator error types.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::OperationKind;

/// Result type alias for coordinator operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Errors surfaced by the coordinator to whoever issued the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("parameter server index {index} out of range (ps_count = {ps_count})")]
    OutOfRange { index: usize, ps_count: usize },

    #[error("parameter server slot {index} already registered at {address}")]
    AlreadyRegistered { index: usize, address: String },

    #[error("roster incomplete: {registered} of {expected} parameter servers registered")]
    RosterIncomplete { registered: usize, expected: usize },

    #[error("{kind} of {path} is still in flight")]
    OperationInFlight { kind: OperationKind, path: String },

    #[error(
        "{kind} of {path} timed out after {timeout:?}: {acknowledged} of {expected} parameter servers acknowledged"
    )]
    BarrierTimeout {
        kind: OperationKind,
        path: String,
        acknowledged: usize,
        expected: usize,
        timeout: Duration,
    },

    #[error("parameter server {index} failed {kind}: {reason}")]
    SetupFailed {
        kind: OperationKind,
        index: usize,
        reason: String,
    },

    #[error("coordinator is shutting down")]
    ShuttingDown,

    #[error("coordinator inbox closed")]
    Closed,

    #[error("invalid model descriptor: {0}")]
    InvalidModel(String),

    #[error("configuration error: {0}")]
    Config(String),
}
