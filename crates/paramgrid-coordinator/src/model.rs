//! Model descriptor shared between the driver and the coordinator.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{CoordinatorError, CoordinatorResult};

/// Declares how many parameter servers the model is partitioned across,
/// and carries the readiness flag the coordinator flips once every
/// parameter server has registered.
///
/// Cheap to clone; clones observe the same flag.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    ps_count: usize,
    ps_ready: Arc<watch::Sender<bool>>,
}

impl ModelDescriptor {
    pub fn new(ps_count: usize) -> CoordinatorResult<Self> {
        if ps_count == 0 {
            return Err(CoordinatorError::InvalidModel(
                "ps_count must be at least 1".to_string(),
            ));
        }
        let (tx, _rx) = watch::channel(false);
        Ok(Self {
            ps_count,
            ps_ready: Arc::new(tx),
        })
    }

    pub fn ps_count(&self) -> usize {
        self.ps_count
    }

    pub fn is_ps_ready(&self) -> bool {
        *self.ps_ready.borrow()
    }

    /// Wait until every parameter server has registered.
    pub async fn wait_ps_ready(&self) {
        let mut rx = self.ps_ready.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Flip the readiness flag. Returns `true` only the first time.
    pub(crate) fn mark_ps_ready(&self) -> bool {
        self.ps_ready.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_ps_count_rejected() {
        let err = ModelDescriptor::new(0).unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidModel(_)));
    }

    #[test]
    fn ready_flag_is_write_once() {
        let model = ModelDescriptor::new(2).unwrap();
        assert!(!model.is_ps_ready());
        assert!(model.mark_ps_ready());
        assert!(!model.mark_ps_ready());
        assert!(model.is_ps_ready());
    }

    #[test]
    fn clones_share_the_flag() {
        let model = ModelDescriptor::new(1).unwrap();
        let observer = model.clone();
        model.mark_ps_ready();
        assert!(observer.is_ps_ready());
        assert_eq!(observer.ps_count(), 1);
    }

    #[tokio::test]
    async fn wait_returns_once_ready() {
        let model = ModelDescriptor::new(1).unwrap();
        let waiter = {
            let model = model.clone();
            tokio::spawn(async move { model.wait_ps_ready().await })
        };
        model.mark_ps_ready();
        waiter.await.unwrap();
    }
}
