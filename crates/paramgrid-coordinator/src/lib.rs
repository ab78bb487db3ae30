//! paramgrid-coordinator — rendezvous and barrier coordination for a
//! parameter-server training cluster.
//!
//! A fixed number of parameter servers hold partitioned model state; a
//! variable number of workers compute gradients against them. This crate
//! is the single coordinator that brings them together.
//!
//! # Architecture
//!
//! ```text
//! CoordinatorService (one task, one inbox)
//!   ├── Roster          index → (handle, address), fixed capacity
//!   ├── WorkerRegistry  every worker ever registered
//!   ├── BarrierCounter  registration quorum, then one load/save round
//!   └── ShutdownTracker stop acknowledgements under a timeout
//!
//! Parameter server ── RegisterParameterServer ──▶ coordinator
//!                  ◀── ModelSetup / Stop ───────
//!                  ── ModelSetupDone / StopAcknowledged ──▶
//! Worker           ── RegisterWorker ──▶  ◀── RosterSnapshot
//! Driver           ── LoadModel / SaveModel / TrainingDone ──▶
//! ```
//!
//! All state is owned by the coordinator task and mutated one message at
//! a time. Everyone else talks to it through a [`CoordinatorClient`].

pub mod barrier;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod local;
pub mod model;
pub mod protocol;
pub mod registry;
pub mod roster;
mod shutdown;

pub use barrier::{BarrierCounter, BarrierProgress};
pub use client::{CoordinatorClient, OperationTicket};
pub use config::CoordinatorConfig;
pub use coordinator::CoordinatorService;
pub use error::{CoordinatorError, CoordinatorResult};
pub use model::ModelDescriptor;
pub use protocol::{
    CoordinatorStatus, OperationKind, OperationReport, ParameterServerHandle,
    ParameterServerMessage, PendingOperation, Phase, ShutdownReport,
};
pub use registry::{WorkerHandle, WorkerRegistry};
pub use roster::{Roster, RosterEntry, RosterSnapshot};
