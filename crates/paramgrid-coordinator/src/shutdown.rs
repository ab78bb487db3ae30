//! Shutdown tracking — waits for stop acknowledgements without blocking
//! the coordinator loop.
//!
//! After `Stop` is broadcast, each acknowledgement is counted the same way
//! a load/save round is. A timer bounds the wait; when it fires, shutdown
//! finishes anyway and the stragglers are reported.

use std::collections::BTreeSet;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::barrier::{BarrierCounter, BarrierProgress};
use crate::error::CoordinatorResult;
use crate::protocol::{PendingOperation, ShutdownReport};

pub(crate) type ShutdownReply = oneshot::Sender<CoordinatorResult<ShutdownReport>>;

#[derive(Debug)]
pub(crate) struct ShutdownTracker {
    stopped: Vec<usize>,
    awaiting: BTreeSet<usize>,
    unreachable: Vec<usize>,
    barrier: Option<BarrierCounter>,
    abandoned: Option<PendingOperation>,
    reply: Option<ShutdownReply>,
}

impl ShutdownTracker {
    pub(crate) fn new(
        stopped: Vec<usize>,
        unreachable: Vec<usize>,
        abandoned: Option<PendingOperation>,
        reply: Option<ShutdownReply>,
    ) -> Self {
        let barrier = (!stopped.is_empty()).then(|| BarrierCounter::new(stopped.len()));
        Self {
            awaiting: stopped.iter().copied().collect(),
            stopped,
            unreachable,
            barrier,
            abandoned,
            reply,
        }
    }

    /// True when nothing is left to wait for.
    pub(crate) fn is_settled(&self) -> bool {
        self.awaiting.is_empty()
    }

    /// Record a stop acknowledgement. Returns `true` once all are in.
    pub(crate) fn acknowledge(&mut self, index: usize) -> bool {
        if !self.awaiting.remove(&index) {
            warn!(index, "unexpected stop acknowledgement");
            return self.is_settled();
        }
        let Some(barrier) = self.barrier.as_mut() else {
            return true;
        };
        match barrier.acknowledge() {
            BarrierProgress::Pending { count, target } => {
                debug!(index, count, target, "parameter server stopped");
                false
            }
            BarrierProgress::Complete => true,
        }
    }

    /// Build the report and hand it to whoever sent `TrainingDone`.
    pub(crate) fn finish(mut self, timed_out: bool) -> ShutdownReport {
        let mut unacknowledged: Vec<usize> = self.awaiting.iter().copied().collect();
        unacknowledged.extend(self.unreachable.iter().copied());
        unacknowledged.sort_unstable();

        let report = ShutdownReport {
            stopped: self.stopped,
            unacknowledged,
            timed_out,
            abandoned: self.abandoned.take(),
        };

        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Ok(report.clone()));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settles_after_every_ack() {
        let mut tracker = ShutdownTracker::new(vec![0, 1, 2], vec![], None, None);
        assert!(!tracker.acknowledge(1));
        assert!(!tracker.acknowledge(0));
        assert!(tracker.acknowledge(2));
        assert!(tracker.is_settled());

        let report = tracker.finish(false);
        assert_eq!(report.stopped, vec![0, 1, 2]);
        assert!(report.unacknowledged.is_empty());
        assert!(!report.timed_out);
    }

    #[test]
    fn duplicate_and_unknown_acks_ignored() {
        let mut tracker = ShutdownTracker::new(vec![0, 1], vec![], None, None);
        assert!(!tracker.acknowledge(0));
        assert!(!tracker.acknowledge(0));
        assert!(!tracker.acknowledge(7));
        assert!(tracker.acknowledge(1));
    }

    #[test]
    fn nothing_to_wait_for() {
        let tracker = ShutdownTracker::new(vec![], vec![3], None, None);
        assert!(tracker.is_settled());
        let report = tracker.finish(false);
        assert_eq!(report.unacknowledged, vec![3]);
    }

    #[test]
    fn timeout_reports_stragglers() {
        let mut tracker = ShutdownTracker::new(vec![0, 1, 2], vec![4], None, None);
        tracker.acknowledge(1);
        let report = tracker.finish(true);
        assert!(report.timed_out);
        assert_eq!(report.unacknowledged, vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn finish_replies_to_requester() {
        let (tx, rx) = oneshot::channel();
        let tracker = ShutdownTracker::new(vec![], vec![], None, Some(tx));
        let report = tracker.finish(false);
        assert_eq!(rx.await.unwrap().unwrap(), report);
    }
}
