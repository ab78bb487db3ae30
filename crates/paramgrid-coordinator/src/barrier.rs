//! Reusable quorum counter.

/// Progress after recording one acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierProgress {
    Pending { count: usize, target: usize },
    /// The round just completed; the counter is back at zero.
    Complete,
}

/// Counts acknowledgements against a target. Completion is reported once
/// per round, after which the count resets for the next round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierCounter {
    target: usize,
    count: usize,
}

impl BarrierCounter {
    pub fn new(target: usize) -> Self {
        assert!(target > 0, "barrier target must be at least 1");
        Self { target, count: 0 }
    }

    pub fn acknowledge(&mut self) -> BarrierProgress {
        self.count += 1;
        assert!(
            self.count <= self.target,
            "barrier count {} exceeded target {}",
            self.count,
            self.target
        );
        if self.count == self.target {
            self.count = 0;
            BarrierProgress::Complete
        } else {
            BarrierProgress::Pending {
                count: self.count,
                target: self.target,
            }
        }
    }

    /// Start a fresh round with a new target.
    pub fn reset(&mut self, target: usize) {
        *self = Self::new(target);
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn target(&self) -> usize {
        self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_exactly_at_target() {
        let mut barrier = BarrierCounter::new(3);
        assert_eq!(
            barrier.acknowledge(),
            BarrierProgress::Pending {
                count: 1,
                target: 3
            }
        );
        assert_eq!(
            barrier.acknowledge(),
            BarrierProgress::Pending {
                count: 2,
                target: 3
            }
        );
        assert_eq!(barrier.acknowledge(), BarrierProgress::Complete);
        assert_eq!(barrier.count(), 0);
    }

    #[test]
    fn reusable_after_completion() {
        let mut barrier = BarrierCounter::new(2);
        barrier.acknowledge();
        assert_eq!(barrier.acknowledge(), BarrierProgress::Complete);

        assert!(matches!(
            barrier.acknowledge(),
            BarrierProgress::Pending { count: 1, .. }
        ));
        assert_eq!(barrier.acknowledge(), BarrierProgress::Complete);
    }

    #[test]
    fn single_target_completes_immediately() {
        let mut barrier = BarrierCounter::new(1);
        assert_eq!(barrier.acknowledge(), BarrierProgress::Complete);
    }

    #[test]
    fn reset_discards_progress() {
        let mut barrier = BarrierCounter::new(4);
        barrier.acknowledge();
        barrier.acknowledge();
        barrier.reset(2);
        assert_eq!(barrier.count(), 0);
        assert_eq!(barrier.target(), 2);
    }

    #[test]
    #[should_panic(expected = "barrier target must be at least 1")]
    fn zero_target_panics() {
        BarrierCounter::new(0);
    }
}
