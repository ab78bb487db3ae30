//! Coordinator service — the single task that owns all cluster state.
//!
//! Messages are taken from the inbox one at a time and handled to
//! completion before the next is read, so the roster, registry, barrier
//! and pending operation need no locking. Nothing here awaits a
//! participant: outbound messages use `try_send`, and timeouts are timer
//! tasks that post back into the inbox and are aborted once their round
//! or the shutdown wait settles.

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::barrier::{BarrierCounter, BarrierProgress};
use crate::client::CoordinatorClient;
use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::model::ModelDescriptor;
use crate::protocol::*;
use crate::registry::{WorkerHandle, WorkerRegistry};
use crate::roster::{Roster, RosterSnapshot};
use crate::shutdown::{ShutdownReply, ShutdownTracker};

/// Whether the loop keeps reading the inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// A pending timer task. Dropping the guard cancels it.
#[derive(Debug)]
struct TimerGuard(AbortHandle);

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A load/save round waiting for acknowledgements.
#[derive(Debug)]
struct ActiveRound {
    round: u64,
    kind: OperationKind,
    acked: Vec<bool>,
    started: Instant,
    reply: Option<OperationReply>,
    /// Barrier timer; cancelled when the round is dropped.
    timer: Option<TimerGuard>,
}

/// The coordinator task plus its inbox. Create with [`CoordinatorService::new`],
/// then [`run`](CoordinatorService::run) or [`spawn`](CoordinatorService::spawn) it.
pub struct CoordinatorService {
    coordinator: Coordinator,
    inbox: mpsc::Receiver<CoordinatorMessage>,
}

impl CoordinatorService {
    pub fn new(
        model: ModelDescriptor,
        config: &CoordinatorConfig,
    ) -> CoordinatorResult<(Self, CoordinatorClient)> {
        config.validate()?;
        let (tx, inbox) = mpsc::channel(config.inbox_capacity);

        let coordinator = Coordinator {
            roster: Roster::new(model.ps_count()),
            workers: WorkerRegistry::new(),
            barrier: BarrierCounter::new(model.ps_count()),
            pending: None,
            round: None,
            next_round: 1,
            shutdown: None,
            shutdown_timer: None,
            barrier_timeout: config.barrier_timeout()?,
            shutdown_timeout: config.shutdown_timeout()?,
            timers: tx.downgrade(),
            last_report: None,
            model,
        };

        info!(
            ps_count = coordinator.model.ps_count(),
            barrier_timeout = ?coordinator.barrier_timeout,
            shutdown_timeout = ?coordinator.shutdown_timeout,
            "coordinator created"
        );

        Ok((Self { coordinator, inbox }, CoordinatorClient::new(tx)))
    }

    /// Process the inbox until shutdown completes or every client is gone.
    ///
    /// Returns the shutdown report when the loop ended through `TrainingDone`.
    pub async fn run(mut self) -> Option<ShutdownReport> {
        while let Some(msg) = self.inbox.recv().await {
            if self.coordinator.handle(msg) == Flow::Stop {
                self.inbox.close();
                info!("coordinator stopped");
                return self.coordinator.last_report.take();
            }
        }
        info!("all coordinator clients dropped, stopping");
        None
    }

    pub fn spawn(self) -> JoinHandle<Option<ShutdownReport>> {
        tokio::spawn(self.run())
    }
}

struct Coordinator {
    model: ModelDescriptor,
    roster: Roster,
    workers: WorkerRegistry,
    /// Registration quorum first, then one load/save round at a time.
    barrier: BarrierCounter,
    pending: Option<PendingOperation>,
    round: Option<ActiveRound>,
    next_round: u64,
    shutdown: Option<ShutdownTracker>,
    shutdown_timer: Option<TimerGuard>,
    barrier_timeout: Option<Duration>,
    shutdown_timeout: Duration,
    timers: mpsc::WeakSender<CoordinatorMessage>,
    last_report: Option<ShutdownReport>,
}

impl Coordinator {
    fn handle(&mut self, msg: CoordinatorMessage) -> Flow {
        match msg {
            CoordinatorMessage::RegisterParameterServer {
                index,
                address,
                handle,
            } => self.register_parameter_server(index, &address, handle),
            CoordinatorMessage::RegisterWorker { worker, reply } => {
                self.register_worker(worker, reply)
            }
            CoordinatorMessage::LoadModel { path, reply } => {
                self.start_operation(OperationKind::Load, path, reply)
            }
            CoordinatorMessage::SaveModel { path, reply } => {
                self.start_operation(OperationKind::Save, path, reply)
            }
            CoordinatorMessage::ModelSetupDone {
                index,
                round,
                outcome,
            } => self.model_setup_done(index, round, outcome),
            CoordinatorMessage::BarrierExpired { round } => self.barrier_expired(round),
            CoordinatorMessage::Status { reply } => {
                let _ = reply.send(self.status());
            }
            CoordinatorMessage::TrainingDone { reply } => return self.initiate_shutdown(reply),
            CoordinatorMessage::StopAcknowledged { index } => {
                return self.stop_acknowledged(index);
            }
            CoordinatorMessage::ShutdownExpired => return self.shutdown_expired(),
        }
        Flow::Continue
    }

    fn phase(&self) -> Phase {
        if self.shutdown.is_some() {
            Phase::Draining
        } else {
            Phase::Running
        }
    }

    fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            phase: self.phase(),
            ps_count: self.model.ps_count(),
            registered: self.roster.registered_count(),
            quorum_count: self.barrier.count(),
            ps_ready: self.model.is_ps_ready(),
            workers: self.workers.len(),
            pending: self.pending.clone(),
        }
    }

    // ── Registration ───────────────────────────────────────────

    fn register_parameter_server(
        &mut self,
        index: usize,
        address: &str,
        handle: ParameterServerHandle,
    ) {
        let result = if self.shutdown.is_some() {
            Err(CoordinatorError::ShuttingDown)
        } else {
            self.roster.register(index, address, handle.clone())
        };

        if let Err(reason) = result {
            warn!(index, %address, error = %reason, "parameter server registration rejected");
            if handle
                .try_send(ParameterServerMessage::RegistrationRejected { reason })
                .is_err()
            {
                warn!(index, "could not deliver registration rejection");
            }
            return;
        }

        info!(index, %address, "parameter server registered");
        match self.barrier.acknowledge() {
            BarrierProgress::Pending { count, target } => {
                debug!(count, target, "registration quorum progress");
            }
            BarrierProgress::Complete => {
                if self.model.mark_ps_ready() {
                    info!(
                        ps_count = self.model.ps_count(),
                        "all parameter servers registered, model ready"
                    );
                }
            }
        }
    }

    fn register_worker(&mut self, worker: WorkerHandle, reply: oneshot::Sender<RosterSnapshot>) {
        let snapshot = self.roster.snapshot();
        info!(
            worker = %worker.id(),
            registered = self.roster.registered_count(),
            ps_count = self.model.ps_count(),
            "worker registered"
        );
        if !snapshot.is_complete() {
            warn!(worker = %worker.id(), "worker received a partial roster");
        }
        self.workers.admit(worker);
        if reply.send(snapshot).is_err() {
            warn!("worker went away before receiving its roster");
        }
    }

    // ── Load / save rounds ─────────────────────────────────────

    fn start_operation(&mut self, kind: OperationKind, path: String, reply: OperationReply) {
        if let Err(e) = self.check_can_start() {
            warn!(%kind, %path, error = %e, "model operation refused");
            let _ = reply.send(Err(e));
            return;
        }

        let round = self.next_round;
        self.next_round += 1;
        let ps_count = self.model.ps_count();

        self.pending = Some(PendingOperation {
            round,
            kind,
            path: path.clone(),
            done: false,
        });
        self.barrier.reset(ps_count);
        self.round = Some(ActiveRound {
            round,
            kind,
            acked: vec![false; ps_count],
            started: Instant::now(),
            reply: Some(reply),
            timer: None,
        });

        info!(round, %kind, %path, ps_count, "model operation started");

        let mut unreachable = None;
        for (index, entry) in self.roster.entries() {
            let msg = ParameterServerMessage::ModelSetup {
                round,
                kind,
                path: path.clone(),
            };
            if let Err(e) = entry.handle.try_send(msg) {
                warn!(index, address = %entry.address, error = %e, "model setup not delivered");
                unreachable.get_or_insert(index);
            }
        }

        if let Some(index) = unreachable {
            self.fail_round(CoordinatorError::SetupFailed {
                kind,
                index,
                reason: "parameter server unreachable".to_string(),
            });
            return;
        }

        if let Some(timeout) = self.barrier_timeout {
            let timer = self.arm_timer(timeout, CoordinatorMessage::BarrierExpired { round });
            if let Some(active) = self.round.as_mut() {
                active.timer = Some(timer);
            }
        }
    }

    fn check_can_start(&self) -> CoordinatorResult<()> {
        if self.shutdown.is_some() {
            return Err(CoordinatorError::ShuttingDown);
        }
        if let Some(pending) = self.pending.as_ref().filter(|p| p.in_flight()) {
            return Err(CoordinatorError::OperationInFlight {
                kind: pending.kind,
                path: pending.path.clone(),
            });
        }
        assert_eq!(
            self.roster.capacity(),
            self.model.ps_count(),
            "roster capacity does not match the model's parameter server count"
        );
        if !self.roster.is_complete() {
            return Err(CoordinatorError::RosterIncomplete {
                registered: self.roster.registered_count(),
                expected: self.model.ps_count(),
            });
        }
        Ok(())
    }

    fn model_setup_done(&mut self, index: usize, round: u64, outcome: Result<(), String>) {
        let Some(active) = self.round.as_mut() else {
            warn!(index, round, "model setup ack with no operation in flight");
            return;
        };
        if active.round != round {
            warn!(index, round, current = active.round, "stale model setup ack");
            return;
        }
        match active.acked.get(index) {
            None => {
                warn!(index, round, "model setup ack from unknown parameter server");
                return;
            }
            Some(true) => {
                warn!(index, round, "duplicate model setup ack");
                return;
            }
            Some(false) => {}
        }

        if let Err(reason) = outcome {
            let kind = active.kind;
            self.fail_round(CoordinatorError::SetupFailed { kind, index, reason });
            return;
        }

        active.acked[index] = true;
        match self.barrier.acknowledge() {
            BarrierProgress::Pending { count, target } => {
                debug!(index, round, count, target, "model setup acknowledged");
            }
            BarrierProgress::Complete => self.complete_round(),
        }
    }

    fn complete_round(&mut self) {
        let Some(mut active) = self.round.take() else {
            return;
        };
        active.timer = None;
        let Some(pending) = self.pending.as_mut() else {
            panic!("round {} completed without a pending operation", active.round);
        };
        pending.done = true;

        let report = OperationReport {
            round: active.round,
            kind: pending.kind,
            path: pending.path.clone(),
            acknowledged: active.acked.len(),
            elapsed: active.started.elapsed(),
        };
        info!(
            round = report.round,
            kind = %report.kind,
            path = %report.path,
            elapsed = ?report.elapsed,
            "model operation complete"
        );
        if let Some(reply) = active.reply.take() {
            let _ = reply.send(Ok(report));
        }
    }

    fn barrier_expired(&mut self, round: u64) {
        let Some(active) = self.round.as_ref().filter(|r| r.round == round) else {
            return;
        };
        let err = CoordinatorError::BarrierTimeout {
            kind: active.kind,
            path: self
                .pending
                .as_ref()
                .map(|p| p.path.clone())
                .unwrap_or_default(),
            acknowledged: active.acked.iter().filter(|a| **a).count(),
            expected: active.acked.len(),
            timeout: self.barrier_timeout.unwrap_or_default(),
        };
        self.fail_round(err);
    }

    /// End the active round with an error and forget the pending operation.
    fn fail_round(&mut self, err: CoordinatorError) {
        warn!(error = %err, "model operation failed");
        self.pending = None;
        self.barrier.reset(self.model.ps_count());
        if let Some(reply) = self.round.take().and_then(|mut r| r.reply.take()) {
            let _ = reply.send(Err(err));
        }
    }

    // ── Shutdown ───────────────────────────────────────────────

    fn initiate_shutdown(&mut self, reply: Option<ShutdownReply>) -> Flow {
        if self.shutdown.is_some() {
            warn!("shutdown already in progress");
            if let Some(reply) = reply {
                let _ = reply.send(Err(CoordinatorError::ShuttingDown));
            }
            return Flow::Continue;
        }

        info!(
            registered = self.roster.registered_count(),
            workers = self.workers.len(),
            "training done, stopping parameter servers"
        );

        let abandoned = match self.round.take() {
            Some(mut active) => {
                if let Some(reply) = active.reply.take() {
                    let _ = reply.send(Err(CoordinatorError::ShuttingDown));
                }
                let abandoned = self.pending.take();
                if let Some(op) = &abandoned {
                    warn!(round = op.round, kind = %op.kind, path = %op.path, "abandoning in-flight model operation");
                }
                abandoned
            }
            None => None,
        };

        let mut stopped = Vec::new();
        let mut unreachable = Vec::new();
        for (index, entry) in self.roster.entries() {
            match entry.handle.try_send(ParameterServerMessage::Stop) {
                Ok(()) => stopped.push(index),
                Err(e) => {
                    warn!(index, address = %entry.address, error = %e, "stop not delivered");
                    unreachable.push(index);
                }
            }
        }

        let tracker = ShutdownTracker::new(stopped, unreachable, abandoned, reply);
        if tracker.is_settled() {
            self.last_report = Some(tracker.finish(false));
            return Flow::Stop;
        }

        self.shutdown = Some(tracker);
        self.shutdown_timer =
            Some(self.arm_timer(self.shutdown_timeout, CoordinatorMessage::ShutdownExpired));
        Flow::Continue
    }

    fn stop_acknowledged(&mut self, index: usize) -> Flow {
        let Some(tracker) = self.shutdown.as_mut() else {
            warn!(index, "stop acknowledgement outside shutdown");
            return Flow::Continue;
        };
        if !tracker.acknowledge(index) {
            return Flow::Continue;
        }
        self.shutdown_timer = None;
        if let Some(tracker) = self.shutdown.take() {
            info!("all parameter servers stopped");
            self.last_report = Some(tracker.finish(false));
        }
        Flow::Stop
    }

    fn shutdown_expired(&mut self) -> Flow {
        let Some(tracker) = self.shutdown.take() else {
            return Flow::Continue;
        };
        self.shutdown_timer = None;
        let report = tracker.finish(true);
        warn!(
            timeout = ?self.shutdown_timeout,
            unacknowledged = ?report.unacknowledged,
            "timed out waiting for parameter servers to stop, shutting down anyway"
        );
        self.last_report = Some(report);
        Flow::Stop
    }

    // ── Timers ─────────────────────────────────────────────────

    /// Post `msg` back into the inbox after `after`, unless the returned
    /// guard is dropped first.
    fn arm_timer(&self, after: Duration, msg: CoordinatorMessage) -> TimerGuard {
        let timers = self.timers.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(tx) = timers.upgrade() {
                let _ = tx.send(msg).await;
            }
        });
        TimerGuard(task.abort_handle())
    }
}
