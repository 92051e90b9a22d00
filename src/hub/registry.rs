//! Connection registry
//!
//! Maps connection ids to live connection handles for this process only.
//! Every operation is a single map operation; nothing here blocks or touches
//! the transport or the bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{FanoutError, Result};
use crate::models::ConnectionId;

struct Slot<H> {
    seq: u64,
    handle: Arc<H>,
}

/// Registry of locally held connections
pub struct Registry<H> {
    entries: DashMap<ConnectionId, Slot<H>>,
    /// Insertion counter, used only to list entries in arrival order
    seq: AtomicU64,
}

impl<H> Registry<H> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            seq: AtomicU64::new(0),
        }
    }

    /// Insert a new entry. An existing live entry is never replaced.
    pub fn register(&self, id: ConnectionId, handle: Arc<H>) -> Result<()> {
        match self.entries.entry(id) {
            Entry::Occupied(occupied) => Err(FanoutError::DuplicateId {
                id: occupied.key().to_string(),
            }),
            Entry::Vacant(vacant) => {
                let seq = self.seq.fetch_add(1, Ordering::Relaxed);
                vacant.insert(Slot { seq, handle });
                Ok(())
            }
        }
    }

    /// Remove and return the entry; `None` if it was already gone
    pub fn unregister(&self, id: &ConnectionId) -> Option<Arc<H>> {
        self.entries.remove(id).map(|(_, slot)| slot.handle)
    }

    pub fn lookup(&self, id: &ConnectionId) -> Option<Arc<H>> {
        self.entries.get(id).map(|slot| slot.handle.clone())
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.entries.contains_key(id)
    }

    /// Ids registered at call time, oldest first
    pub fn list_ids(&self) -> Vec<ConnectionId> {
        self.ordered()
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }

    /// Handles registered at call time, oldest first
    pub fn snapshot(&self) -> Vec<Arc<H>> {
        self.ordered()
            .into_iter()
            .map(|(_, handle)| handle)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // Copies out of the map before sorting so no shard lock outlives the call
    fn ordered(&self) -> Vec<(ConnectionId, Arc<H>)> {
        let mut items: Vec<(u64, ConnectionId, Arc<H>)> = self
            .entries
            .iter()
            .map(|entry| (entry.seq, entry.key().clone(), entry.handle.clone()))
            .collect();
        items.sort_by_key(|(seq, _, _)| *seq);
        items
            .into_iter()
            .map(|(_, id, handle)| (id, handle))
            .collect()
    }
}

impl<H> Default for Registry<H> {
    fn default() -> Self {
        Self::new()
    }
}
