use crate::record::RecordStore;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default, Debug, Clone, Copy, PartialEq)]
struct PendingCounts {
    lookups: u64,
    updates: u64,
}

/// CounterBatcher accumulates per-name lookup and update counts in memory so a busy record costs
/// one store write per flush instead of one per request.
#[derive(Default)]
pub(crate) struct CounterBatcher {
    pending: Mutex<HashMap<String, PendingCounts>>,
}

impl CounterBatcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_lookup(&self, name: &str) {
        self.pending().entry(name.to_string()).or_default().lookups += 1;
    }

    pub(crate) fn record_update(&self, name: &str) {
        self.pending().entry(name.to_string()).or_default().updates += 1;
    }

    /// Writes all pending counts to `store`. Counts that fail to flush are put back for the next
    /// round; counting is best effort, so the failure is only logged.
    pub(crate) async fn flush<S: RecordStore + ?Sized>(&self, store: &S, logger: &slog::Logger) -> usize {
        let drained: Vec<(String, PendingCounts)> = self.pending().drain().collect();
        let mut flushed = 0;

        for (name, counts) in drained {
            match store.increment_counters(&name, counts.lookups, counts.updates).await {
                Ok(()) => flushed += 1,
                Err(e) => {
                    slog::warn!(logger, "Failed to flush request counters for {}: {:?}", name, e);
                    let mut pending = self.pending();
                    let entry = pending.entry(name).or_default();
                    entry.lookups += counts.lookups;
                    entry.updates += counts.updates;
                }
            }
        }

        flushed
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingCounts>> {
        self.pending.lock().expect("CounterBatcher mutex guard poison")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Epoch, InMemoryRecordStore, NodeId, RecordState};
    use crate::semantics::ValuesMap;

    #[tokio::test]
    async fn flush_writes_batched_counts_once() {
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let store = InMemoryRecordStore::new();
        store
            .put(RecordState::new(
                "alice",
                Epoch::initial(),
                vec![NodeId(1)].into_iter().collect(),
                ValuesMap::new(),
            ))
            .await
            .unwrap();

        let batcher = CounterBatcher::new();
        batcher.record_lookup("alice");
        batcher.record_lookup("alice");
        batcher.record_update("alice");

        assert_eq!(batcher.flush(&store, &logger).await, 1);
        assert_eq!(batcher.flush(&store, &logger).await, 0);

        let stored = store.get("alice").await.unwrap().unwrap();
        assert_eq!((stored.lookup_count, stored.update_count), (2, 1));
    }
}
