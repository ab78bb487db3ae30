//! Message contracts between the coordinator, parameter servers, workers,
//! and the external driver.
//!
//! Everything that enters the coordinator goes through its single inbox,
//! normally via `CoordinatorClient`. Messages sent to parameter servers
//! are [`ParameterServerMessage`]s, delivered through their
//! [`ParameterServerHandle`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::registry::WorkerHandle;
use crate::roster::RosterSnapshot;

/// Which cluster-wide model operation a round performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Load,
    Save,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Load => f.write_str("load"),
            OperationKind::Save => f.write_str("save"),
        }
    }
}

/// The load or save most recently issued by the driver.
///
/// Stays visible with `done = true` after its round completes, until the
/// next operation replaces it. Cleared if the round fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingOperation {
    pub round: u64,
    pub kind: OperationKind,
    pub path: String,
    pub done: bool,
}

impl PendingOperation {
    pub fn in_flight(&self) -> bool {
        !self.done
    }
}

/// Returned to the driver when a load/save round completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationReport {
    pub round: u64,
    pub kind: OperationKind,
    pub path: String,
    pub acknowledged: usize,
    pub elapsed: Duration,
}

/// Outcome of the shutdown sequence.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ShutdownReport {
    /// Parameter servers that were sent `Stop`.
    pub stopped: Vec<usize>,
    /// Parameter servers that never acknowledged, or could not be reached.
    pub unacknowledged: Vec<usize>,
    /// Whether the acknowledgement wait hit `shutdown_timeout`.
    pub timed_out: bool,
    /// A load/save that was still in flight when shutdown began.
    pub abandoned: Option<PendingOperation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Running,
    Draining,
}

/// Point-in-time view of coordinator state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoordinatorStatus {
    pub phase: Phase,
    pub ps_count: usize,
    pub registered: usize,
    pub quorum_count: usize,
    pub ps_ready: bool,
    pub workers: usize,
    pub pending: Option<PendingOperation>,
}

/// Requests the coordinator sends to a parameter server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterServerMessage {
    /// Perform a local load or save, then answer with `ModelSetupDone`
    /// carrying the same round.
    ModelSetup {
        round: u64,
        kind: OperationKind,
        path: String,
    },
    /// Terminate; answer with `StopAcknowledged`.
    Stop,
    /// The registration was refused.
    RegistrationRejected { reason: CoordinatorError },
}

/// Opaque reference to a parameter server process.
#[derive(Debug, Clone)]
pub struct ParameterServerHandle {
    tx: mpsc::Sender<ParameterServerMessage>,
}

impl ParameterServerHandle {
    pub fn new(tx: mpsc::Sender<ParameterServerMessage>) -> Self {
        Self { tx }
    }

    /// Non-blocking send. The coordinator never waits on a participant.
    pub(crate) fn try_send(
        &self,
        msg: ParameterServerMessage,
    ) -> Result<(), mpsc::error::TrySendError<ParameterServerMessage>> {
        self.tx.try_send(msg)
    }

    /// Whether two handles reach the same parameter server.
    pub fn same_server(&self, other: &ParameterServerHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub(crate) type OperationReply = oneshot::Sender<CoordinatorResult<OperationReport>>;

/// Everything the coordinator inbox accepts.
#[derive(Debug)]
pub(crate) enum CoordinatorMessage {
    RegisterParameterServer {
        index: usize,
        address: String,
        handle: ParameterServerHandle,
    },
    RegisterWorker {
        worker: WorkerHandle,
        reply: oneshot::Sender<RosterSnapshot>,
    },
    LoadModel {
        path: String,
        reply: OperationReply,
    },
    SaveModel {
        path: String,
        reply: OperationReply,
    },
    ModelSetupDone {
        index: usize,
        round: u64,
        outcome: Result<(), String>,
    },
    TrainingDone {
        reply: Option<oneshot::Sender<CoordinatorResult<ShutdownReport>>>,
    },
    StopAcknowledged {
        index: usize,
    },
    Status {
        reply: oneshot::Sender<CoordinatorStatus>,
    },
    /// Posted by the barrier timer of `round`.
    BarrierExpired {
        round: u64,
    },
    /// Posted by the shutdown timer.
    ShutdownExpired,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_kind_display() {
        assert_eq!(OperationKind::Load.to_string(), "load");
        assert_eq!(OperationKind::Save.to_string(), "save");
    }

    #[test]
    fn reports_serialize_for_logging() {
        let report = ShutdownReport {
            stopped: vec![0, 1],
            unacknowledged: vec![1],
            timed_out: true,
            abandoned: Some(PendingOperation {
                round: 3,
                kind: OperationKind::Save,
                path: "/ckpt".to_string(),
                done: false,
            }),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["abandoned"]["kind"], "save");
        assert_eq!(json["unacknowledged"], serde_json::json!([1]));
    }

    #[test]
    fn handles_compare_by_channel() {
        let (tx_a, _rx_a) = mpsc::channel(1);
        let (tx_b, _rx_b) = mpsc::channel(1);
        let a = ParameterServerHandle::new(tx_a);
        let a2 = a.clone();
        let b = ParameterServerHandle::new(tx_b);
        assert!(a.same_server(&a2));
        assert!(!a.same_server(&b));
    }

    #[test]
    fn try_send_reports_full_channel() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = ParameterServerHandle::new(tx);
        handle.try_send(ParameterServerMessage::Stop).unwrap();
        assert!(handle.try_send(ParameterServerMessage::Stop).is_err());
    }
}
