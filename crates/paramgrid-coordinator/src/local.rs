//! In-process stand-ins for parameter servers and workers.
//!
//! The real parameter-server storage engine and worker compute loop live
//! elsewhere. These stand-ins speak the same message contracts, which is
//! enough to drive the coordinator end to end from the driver binary and
//! from tests.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::CoordinatorClient;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::protocol::{OperationKind, ParameterServerHandle, ParameterServerMessage};
use crate::registry::WorkerHandle;
use crate::roster::RosterSnapshot;

/// How a stand-in answers `ModelSetup`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupBehavior {
    Succeed,
    Fail(String),
    /// Never answer.
    Ignore,
}

/// What a stand-in parameter server saw during its life.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterServerLog {
    pub setups: Vec<(u64, OperationKind, String)>,
    pub stops: usize,
    pub rejected: Option<CoordinatorError>,
}

/// A parameter server that keeps no model state and acknowledges
/// everything it is asked to do.
#[derive(Debug, Clone)]
pub struct LocalParameterServer {
    index: usize,
    address: String,
    setup: SetupBehavior,
    acknowledge_stop: bool,
}

impl LocalParameterServer {
    pub fn new(index: usize, address: impl Into<String>) -> Self {
        Self {
            index,
            address: address.into(),
            setup: SetupBehavior::Succeed,
            acknowledge_stop: true,
        }
    }

    pub fn with_setup(mut self, behavior: SetupBehavior) -> Self {
        self.setup = behavior;
        self
    }

    /// Keep running after `Stop` without acknowledging it.
    pub fn ignoring_stop(mut self) -> Self {
        self.acknowledge_stop = false;
        self
    }

    /// Register with the coordinator and serve requests on a background
    /// task. The task ends after acknowledging `Stop`, after a rejected
    /// registration, or when the coordinator drops its handle.
    pub async fn spawn(
        self,
        client: CoordinatorClient,
        capacity: usize,
    ) -> CoordinatorResult<JoinHandle<ParameterServerLog>> {
        let (tx, rx) = mpsc::channel(capacity);
        client
            .register_parameter_server(
                self.index,
                self.address.clone(),
                ParameterServerHandle::new(tx),
            )
            .await?;
        Ok(tokio::spawn(self.serve(client, rx)))
    }

    async fn serve(
        self,
        client: CoordinatorClient,
        mut rx: mpsc::Receiver<ParameterServerMessage>,
    ) -> ParameterServerLog {
        let index = self.index;
        let mut log = ParameterServerLog::default();

        while let Some(msg) = rx.recv().await {
            match msg {
                ParameterServerMessage::ModelSetup { round, kind, path } => {
                    debug!(index, round, %kind, %path, "model setup requested");
                    log.setups.push((round, kind, path));
                    let outcome = match &self.setup {
                        SetupBehavior::Succeed => Ok(()),
                        SetupBehavior::Fail(reason) => Err(reason.clone()),
                        SetupBehavior::Ignore => continue,
                    };
                    if client.model_setup_done(index, round, outcome).await.is_err() {
                        warn!(index, "coordinator gone before setup ack");
                        break;
                    }
                }
                ParameterServerMessage::Stop => {
                    log.stops += 1;
                    if !self.acknowledge_stop {
                        debug!(index, "ignoring stop");
                        continue;
                    }
                    let _ = client.stop_acknowledged(index).await;
                    info!(index, "parameter server stopped");
                    break;
                }
                ParameterServerMessage::RegistrationRejected { reason } => {
                    warn!(index, error = %reason, "registration rejected");
                    log.rejected = Some(reason);
                    break;
                }
            }
        }
        log
    }
}

/// A worker that only performs discovery.
#[derive(Debug, Clone)]
pub struct LocalWorker {
    pub handle: WorkerHandle,
    pub roster: RosterSnapshot,
}

impl LocalWorker {
    pub async fn register(id: impl Into<String>, client: &CoordinatorClient) -> CoordinatorResult<Self> {
        let handle = WorkerHandle::new(id);
        let roster = client.register_worker(handle.clone()).await?;
        info!(
            worker = %handle.id(),
            parameter_servers = roster.len(),
            complete = roster.is_complete(),
            "worker discovered parameter servers"
        );
        Ok(Self { handle, roster })
    }
}
