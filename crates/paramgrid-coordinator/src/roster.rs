//! Roster — fixed-capacity table of parameter servers.
//!
//! Slot `i` holds the handle and address of parameter server `i`. The
//! capacity comes from the model descriptor and never changes, and each
//! slot is written at most once.

use tracing::warn;

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::protocol::ParameterServerHandle;

/// A registered parameter server.
#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub handle: ParameterServerHandle,
    pub address: String,
}

#[derive(Debug)]
pub struct Roster {
    slots: Vec<Option<RosterEntry>>,
}

impl Roster {
    pub fn new(ps_count: usize) -> Self {
        Self {
            slots: vec![None; ps_count],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Fill slot `index`. Occupied slots are never overwritten.
    pub fn register(
        &mut self,
        index: usize,
        address: &str,
        handle: ParameterServerHandle,
    ) -> CoordinatorResult<()> {
        let ps_count = self.capacity();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(CoordinatorError::OutOfRange { index, ps_count })?;

        if let Some(existing) = slot.as_ref() {
            warn!(
                index,
                existing = %existing.address,
                attempted = %address,
                "duplicate parameter server registration"
            );
            return Err(CoordinatorError::AlreadyRegistered {
                index,
                address: existing.address.clone(),
            });
        }

        *slot = Some(RosterEntry {
            handle,
            address: address.to_string(),
        });
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&RosterEntry> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn registered_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Registered entries in index order.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &RosterEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|e| (i, e)))
    }

    /// Copy of the current contents, empty slots included.
    pub fn snapshot(&self) -> RosterSnapshot {
        RosterSnapshot {
            slots: self.slots.clone(),
        }
    }
}

/// A worker's view of the roster at the moment it registered.
///
/// Not updated afterwards. Slots may be empty if some parameter servers
/// had not registered yet.
#[derive(Debug, Clone)]
pub struct RosterSnapshot {
    slots: Vec<Option<RosterEntry>>,
}

impl RosterSnapshot {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    pub fn get(&self, index: usize) -> Option<&RosterEntry> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn handles(&self) -> Vec<Option<ParameterServerHandle>> {
        self.slots
            .iter()
            .map(|s| s.as_ref().map(|e| e.handle.clone()))
            .collect()
    }

    pub fn addresses(&self) -> Vec<Option<String>> {
        self.slots
            .iter()
            .map(|s| s.as_ref().map(|e| e.address.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    fn handle() -> ParameterServerHandle {
        let (tx, _rx) = mpsc::channel(1);
        ParameterServerHandle::new(tx)
    }

    #[test]
    fn register_fills_slot() {
        let mut roster = Roster::new(2);
        roster.register(1, "10.0.0.2:7000", handle()).unwrap();

        assert_eq!(roster.registered_count(), 1);
        assert!(!roster.is_complete());
        assert!(roster.get(0).is_none());
        assert_eq!(roster.get(1).unwrap().address, "10.0.0.2:7000");
    }

    #[test]
    fn out_of_range_rejected() {
        let mut roster = Roster::new(2);
        let err = roster.register(2, "x", handle()).unwrap_err();
        assert_eq!(
            err,
            CoordinatorError::OutOfRange {
                index: 2,
                ps_count: 2
            }
        );
        assert_eq!(roster.registered_count(), 0);
    }

    #[test]
    fn duplicate_rejected_and_first_kept() {
        let mut roster = Roster::new(1);
        roster.register(0, "a", handle()).unwrap();

        let err = roster.register(0, "b", handle()).unwrap_err();
        assert_eq!(
            err,
            CoordinatorError::AlreadyRegistered {
                index: 0,
                address: "a".to_string()
            }
        );
        assert_eq!(roster.get(0).unwrap().address, "a");
    }

    #[test]
    fn snapshot_is_detached() {
        let mut roster = Roster::new(2);
        roster.register(0, "a", handle()).unwrap();

        let snapshot = roster.snapshot();
        roster.register(1, "b", handle()).unwrap();

        assert_eq!(snapshot.addresses(), vec![Some("a".to_string()), None]);
        assert!(!snapshot.is_complete());
        assert!(roster.is_complete());
    }

    #[test]
    fn entries_in_index_order() {
        let mut roster = Roster::new(3);
        roster.register(2, "c", handle()).unwrap();
        roster.register(0, "a", handle()).unwrap();

        let indices: Vec<usize> = roster.entries().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![0, 2]);
    }
}
