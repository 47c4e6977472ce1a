//! Worker pool registry.
//!
//! Lock-free via DashMap: monitor tasks update their own worker's state while
//! broadcasts and snapshots read concurrently.

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::bridge::protocol::{ControlMessage, WorkerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Spawned, readiness not yet reported.
    Starting,
    /// Reported `HttpOnline`; receives broadcasts.
    Online,
    /// Process gone; about to be replaced.
    Exited,
}

/// Snapshot of one worker of the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    pub id: WorkerId,
    /// OS process id; `None` for in-process workers.
    pub pid: Option<u32>,
    /// Pool position, kept by replacements.
    pub slot: usize,
    pub state: WorkerState,
}

struct Entry {
    handle: WorkerHandle,
    control: mpsc::UnboundedSender<ControlMessage>,
}

#[derive(Default)]
pub struct WorkerRegistry {
    workers: DashMap<WorkerId, Entry>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: WorkerHandle, control: mpsc::UnboundedSender<ControlMessage>) {
        self.workers.insert(handle.id, Entry { handle, control });
    }

    pub fn set_state(&self, id: &WorkerId, state: WorkerState) -> bool {
        match self.workers.get_mut(id) {
            Some(mut entry) => {
                entry.handle.state = state;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &WorkerId) -> Option<WorkerHandle> {
        self.workers.remove(id).map(|(_, entry)| entry.handle)
    }

    pub fn get(&self, id: &WorkerId) -> Option<WorkerHandle> {
        self.workers.get(id).map(|entry| entry.handle.clone())
    }

    /// Snapshot ordered by slot.
    pub fn snapshot(&self) -> Vec<WorkerHandle> {
        let mut handles: Vec<WorkerHandle> = self
            .workers
            .iter()
            .map(|entry| entry.handle.clone())
            .collect();
        handles.sort_by_key(|h| h.slot);
        handles
    }

    pub fn online_count(&self) -> usize {
        self.workers
            .iter()
            .filter(|entry| entry.handle.state == WorkerState::Online)
            .count()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

/// Send `msg` to every currently online worker. Nothing is queued for
/// workers that come online later.
///
/// Returns the number of workers the message was handed to.
pub fn broadcast(registry: &WorkerRegistry, msg: &ControlMessage) -> usize {
    let mut sent = 0;
    for entry in registry.workers.iter() {
        if entry.handle.state != WorkerState::Online {
            continue;
        }
        match entry.control.send(msg.clone()) {
            Ok(()) => sent += 1,
            Err(_) => {
                tracing::debug!(worker = %entry.handle.id, "Worker channel closed, skipping")
            }
        }
    }
    tracing::debug!(event = msg.event(), sent, "Broadcast");
    sent
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(slot: usize, state: WorkerState) -> WorkerHandle {
        WorkerHandle {
            id: WorkerId::new(),
            pid: None,
            slot,
            state,
        }
    }

    #[test]
    fn broadcast_reaches_only_online_workers() {
        let registry = WorkerRegistry::new();
        let (online_tx, mut online_rx) = mpsc::unbounded_channel();
        let (starting_tx, mut starting_rx) = mpsc::unbounded_channel();
        let (exited_tx, mut exited_rx) = mpsc::unbounded_channel();

        registry.insert(handle(0, WorkerState::Online), online_tx);
        registry.insert(handle(1, WorkerState::Starting), starting_tx);
        registry.insert(handle(2, WorkerState::Exited), exited_tx);

        assert_eq!(broadcast(&registry, &ControlMessage::Shutdown), 1);
        assert_eq!(online_rx.try_recv().unwrap(), ControlMessage::Shutdown);
        assert!(starting_rx.try_recv().is_err());
        assert!(exited_rx.try_recv().is_err());
    }

    #[test]
    fn broadcast_skips_closed_channels() {
        let registry = WorkerRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.insert(handle(0, WorkerState::Online), tx);
        drop(rx);

        assert_eq!(broadcast(&registry, &ControlMessage::reload(None)), 0);
    }

    #[test]
    fn state_transitions_and_removal() {
        let registry = WorkerRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let worker = handle(3, WorkerState::Starting);
        let id = worker.id;
        registry.insert(worker, tx);

        assert_eq!(registry.online_count(), 0);
        assert!(registry.set_state(&id, WorkerState::Online));
        assert_eq!(registry.online_count(), 1);
        assert_eq!(registry.get(&id).unwrap().state, WorkerState::Online);

        let removed = registry.remove(&id).unwrap();
        assert_eq!(removed.slot, 3);
        assert!(registry.is_empty());
        assert!(!registry.set_state(&id, WorkerState::Exited));
    }

    #[test]
    fn snapshot_is_ordered_by_slot() {
        let registry = WorkerRegistry::new();
        for slot in [2, 0, 1] {
            let (tx, _rx) = mpsc::unbounded_channel();
            registry.insert(handle(slot, WorkerState::Online), tx);
        }

        let slots: Vec<usize> = registry.snapshot().iter().map(|h| h.slot).collect();
        assert_eq!(slots, vec![0, 1, 2]);
        assert_eq!(registry.len(), 3);
    }
}
