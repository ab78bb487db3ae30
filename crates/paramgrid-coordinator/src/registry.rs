//! Worker registry — every worker seen over the coordinator's lifetime.

/// Opaque reference to a worker process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerHandle {
    id: String,
}

impl WorkerHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Append-only. A worker that registers twice is admitted twice.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: Vec<WorkerHandle>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&mut self, worker: WorkerHandle) {
        self.workers.push(worker);
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerHandle> {
        self.workers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_without_dedup() {
        let mut registry = WorkerRegistry::new();
        registry.admit(WorkerHandle::new("worker-0"));
        registry.admit(WorkerHandle::new("worker-0"));
        registry.admit(WorkerHandle::new("worker-1"));

        assert_eq!(registry.len(), 3);
        let ids: Vec<&str> = registry.iter().map(WorkerHandle::id).collect();
        assert_eq!(ids, vec!["worker-0", "worker-0", "worker-1"]);
    }
}
