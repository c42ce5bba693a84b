use crate::commitlog::RequestId;
use std::collections::{HashSet, VecDeque};

/// Bounded memory of executed request ids. A request re-proposed after a coordinator change
/// can get decided twice; only the first execution counts.
pub(crate) struct RecentRequests {
    capacity: usize,
    order: VecDeque<RequestId>,
    ids: HashSet<RequestId>,
}

impl RecentRequests {
    pub(crate) fn new(capacity: usize) -> Self {
        RecentRequests {
            capacity,
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
        }
    }

    pub(crate) fn with_ids(capacity: usize, ids: Vec<RequestId>) -> Self {
        let mut recent = RecentRequests::new(capacity);
        for id in ids {
            recent.insert(id);
        }
        recent
    }

    pub(crate) fn contains(&self, id: &RequestId) -> bool {
        self.ids.contains(id)
    }

    pub(crate) fn insert(&mut self, id: RequestId) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
    }

    pub(crate) fn to_vec(&self) -> Vec<RequestId> {
        self.order.iter().copied().collect()
    }
}
