//! Correlation ids and the tables of requests awaiting a response.

use alloc::collections::BTreeMap;

/// Matches a response topic back to the request that caused it.
pub type CorrelationId = u32;

/// Hands out ids for one request class, starting at 1.
///
/// Ids are strictly increasing until the counter wraps, after which it
/// restarts at 1.
#[derive(Debug, Default)]
pub struct CorrelationIds {
    last: CorrelationId,
}

impl CorrelationIds {
    pub const fn new() -> Self {
        Self { last: 0 }
    }

    pub fn next(&mut self) -> CorrelationId {
        self.last = self.last.wrapping_add(1).max(1);
        self.last
    }
}

/// One-shot callbacks keyed by correlation id.
///
/// An entry leaves the table exactly once: when its response is taken, or
/// when the request is cancelled.
pub struct PendingTable<C> {
    ids: CorrelationIds,
    pending: BTreeMap<CorrelationId, C>,
}

impl<C> PendingTable<C> {
    pub const fn new() -> Self {
        Self {
            ids: CorrelationIds::new(),
            pending: BTreeMap::new(),
        }
    }

    /// Stores `callback` under the next free id.
    pub fn register(&mut self, callback: C) -> CorrelationId {
        let mut id = self.ids.next();
        // only reachable after the counter wrapped
        while self.pending.contains_key(&id) {
            id = self.ids.next();
        }
        self.pending.insert(id, callback);
        id
    }

    /// Removes and returns the callback for `id`, if any is still pending.
    pub fn take(&mut self, id: CorrelationId) -> Option<C> {
        self.pending.remove(&id)
    }

    pub fn contains(&self, id: CorrelationId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<C> Default for PendingTable<C> {
    fn default() -> Self {
        Self::new()
    }
}
