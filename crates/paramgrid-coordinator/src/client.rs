//! Client handle for talking to a running coordinator.
//!
//! Parameter servers, workers and the driver all go through this type.
//! It is cheap to clone. Every method fails with
//! [`CoordinatorError::Closed`] once the coordinator loop has ended.

use tokio::sync::{mpsc, oneshot};

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::protocol::*;
use crate::registry::WorkerHandle;
use crate::roster::RosterSnapshot;

#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    tx: mpsc::Sender<CoordinatorMessage>,
}

/// A load or save that has been accepted into the inbox. Await
/// [`wait`](OperationTicket::wait) for the end of its round.
#[derive(Debug)]
pub struct OperationTicket {
    kind: OperationKind,
    rx: oneshot::Receiver<CoordinatorResult<OperationReport>>,
}

impl OperationTicket {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub async fn wait(self) -> CoordinatorResult<OperationReport> {
        self.rx.await.map_err(|_| CoordinatorError::Closed)?
    }
}

impl CoordinatorClient {
    pub(crate) fn new(tx: mpsc::Sender<CoordinatorMessage>) -> Self {
        Self { tx }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, msg: CoordinatorMessage) -> CoordinatorResult<()> {
        self.tx.send(msg).await.map_err(|_| CoordinatorError::Closed)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> CoordinatorMessage,
    ) -> CoordinatorResult<T> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        rx.await.map_err(|_| CoordinatorError::Closed)
    }

    // ── Parameter server side ──────────────────────────────────

    /// Admission is fire-and-forget. A refused registration is reported
    /// back through `handle` as `RegistrationRejected`.
    pub async fn register_parameter_server(
        &self,
        index: usize,
        address: impl Into<String>,
        handle: ParameterServerHandle,
    ) -> CoordinatorResult<()> {
        self.send(CoordinatorMessage::RegisterParameterServer {
            index,
            address: address.into(),
            handle,
        })
        .await
    }

    pub async fn model_setup_done(
        &self,
        index: usize,
        round: u64,
        outcome: Result<(), String>,
    ) -> CoordinatorResult<()> {
        self.send(CoordinatorMessage::ModelSetupDone {
            index,
            round,
            outcome,
        })
        .await
    }

    pub async fn stop_acknowledged(&self, index: usize) -> CoordinatorResult<()> {
        self.send(CoordinatorMessage::StopAcknowledged { index })
            .await
    }

    // ── Worker side ────────────────────────────────────────────

    /// Register a worker and receive the roster as it stands right now.
    pub async fn register_worker(&self, worker: WorkerHandle) -> CoordinatorResult<RosterSnapshot> {
        self.request(|reply| CoordinatorMessage::RegisterWorker { worker, reply })
            .await
    }

    // ── Driver side ────────────────────────────────────────────

    pub async fn begin_load(&self, path: impl Into<String>) -> CoordinatorResult<OperationTicket> {
        self.begin(OperationKind::Load, path.into()).await
    }

    pub async fn begin_save(&self, path: impl Into<String>) -> CoordinatorResult<OperationTicket> {
        self.begin(OperationKind::Save, path.into()).await
    }

    /// Load the model on every parameter server and wait for all of them.
    pub async fn load_model(&self, path: impl Into<String>) -> CoordinatorResult<OperationReport> {
        self.begin_load(path).await?.wait().await
    }

    /// Save the model on every parameter server and wait for all of them.
    pub async fn save_model(&self, path: impl Into<String>) -> CoordinatorResult<OperationReport> {
        self.begin_save(path).await?.wait().await
    }

    async fn begin(&self, kind: OperationKind, path: String) -> CoordinatorResult<OperationTicket> {
        let (reply, rx) = oneshot::channel();
        let msg = match kind {
            OperationKind::Load => CoordinatorMessage::LoadModel { path, reply },
            OperationKind::Save => CoordinatorMessage::SaveModel { path, reply },
        };
        self.send(msg).await?;
        Ok(OperationTicket { kind, rx })
    }

    /// Signal the end of training and wait for the shutdown sequence.
    pub async fn training_done(&self) -> CoordinatorResult<ShutdownReport> {
        self.request(|reply| CoordinatorMessage::TrainingDone { reply: Some(reply) })
            .await?
    }

    /// Signal the end of training without waiting.
    pub async fn notify_training_done(&self) -> CoordinatorResult<()> {
        self.send(CoordinatorMessage::TrainingDone { reply: None })
            .await
    }

    pub async fn status(&self) -> CoordinatorResult<CoordinatorStatus> {
        self.request(|reply| CoordinatorMessage::Status { reply })
            .await
    }

    pub async fn pending_operation(&self) -> CoordinatorResult<Option<PendingOperation>> {
        Ok(self.status().await?.pending)
    }
}
