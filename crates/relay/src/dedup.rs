use std::collections::VecDeque;

use rustc_hash::FxHashSet;
use uuid::Uuid;

/// How many packet ids the relay remembers.
pub const DEFAULT_SEEN_CAPACITY: usize = 256;

/// Bounded set of recently seen packet ids. The oldest id is evicted first.
#[derive(Debug)]
pub struct SeenPackets {
    order: VecDeque<Uuid>,
    ids: FxHashSet<Uuid>,
    capacity: usize,
}

impl SeenPackets {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            ids: FxHashSet::default(),
            capacity: capacity.max(1),
        }
    }

    /// Returns `true` the first time `id` is seen.
    pub fn first_sighting(&mut self, id: Uuid) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity
            && let Some(evicted) = self.order.pop_front()
        {
            self.ids.remove(&evicted);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for SeenPackets {
    fn default() -> Self {
        Self::new(DEFAULT_SEEN_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_copy_is_rejected() {
        let mut seen = SeenPackets::default();
        let id = Uuid::new_v4();
        assert!(seen.first_sighting(id));
        assert!(!seen.first_sighting(id));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn oldest_ids_are_evicted() {
        let mut seen = SeenPackets::new(2);
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            assert!(seen.first_sighting(*id));
        }
        assert_eq!(seen.len(), 2);
        // The first id fell out of the window and is accepted again.
        assert!(seen.first_sighting(ids[0]));
        assert!(!seen.first_sighting(ids[2]));
    }
}
