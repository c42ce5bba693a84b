use crate::record::Epoch;
use crate::record::GroupId;
use crate::record::RecordState;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record store unavailable: {0}")]
    Unavailable(String),
}

/// RecordStore is the durable key-value store holding every record this node replicates, plus
/// the checkpoints of paused consensus instances.
///
/// Mutations of a single name must be atomic with respect to each other. Reads may run
/// concurrently with anything.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync + 'static {
    async fn get(&self, name: &str) -> Result<Option<RecordState>, StoreError>;

    async fn put(&self, record: RecordState) -> Result<(), StoreError>;

    /// Writes `new_state` iff the stored record's current epoch equals `expected_epoch`. The
    /// request counters are not part of the swap: the stored ones are kept, so flushes made
    /// through `increment_counters` survive.
    ///
    /// CAS: Return true if we successfully mutated state.
    async fn compare_and_swap(
        &self,
        name: &str,
        expected_epoch: Option<Epoch>,
        new_state: RecordState,
    ) -> Result<bool, StoreError>;

    /// Return true if a record was deleted.
    async fn delete(&self, name: &str) -> Result<bool, StoreError>;

    /// Adds to the request counters of an existing record. Unknown names are ignored.
    async fn increment_counters(&self, name: &str, lookups: u64, updates: u64) -> Result<(), StoreError>;

    async fn save_checkpoint(&self, group: &GroupId, checkpoint: Bytes) -> Result<(), StoreError>;

    async fn load_checkpoint(&self, group: &GroupId) -> Result<Option<Bytes>, StoreError>;

    async fn remove_checkpoint(&self, group: &GroupId) -> Result<(), StoreError>;
}

/// In-memory `RecordStore`. Every node of a test cluster gets its own.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: Mutex<HashMap<String, RecordState>>,
    checkpoints: Mutex<HashMap<GroupId, Bytes>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<String, RecordState>> {
        self.records.lock().expect("InMemoryRecordStore records mutex guard poison")
    }

    fn checkpoints(&self) -> std::sync::MutexGuard<'_, HashMap<GroupId, Bytes>> {
        self.checkpoints
            .lock()
            .expect("InMemoryRecordStore checkpoints mutex guard poison")
    }
}

#[async_trait::async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get(&self, name: &str) -> Result<Option<RecordState>, StoreError> {
        Ok(self.records().get(name).cloned())
    }

    async fn put(&self, record: RecordState) -> Result<(), StoreError> {
        self.records().insert(record.name.clone(), record);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        name: &str,
        expected_epoch: Option<Epoch>,
        new_state: RecordState,
    ) -> Result<bool, StoreError> {
        let mut records = self.records();
        match records.get(name) {
            Some(existing) if existing.current_epoch == expected_epoch => {
                let mut new_state = new_state;
                new_state.lookup_count = existing.lookup_count;
                new_state.update_count = existing.update_count;
                records.insert(name.to_string(), new_state);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.records().remove(name).is_some())
    }

    async fn increment_counters(&self, name: &str, lookups: u64, updates: u64) -> Result<(), StoreError> {
        if let Some(record) = self.records().get_mut(name) {
            record.lookup_count += lookups;
            record.update_count += updates;
        }
        Ok(())
    }

    async fn save_checkpoint(&self, group: &GroupId, checkpoint: Bytes) -> Result<(), StoreError> {
        self.checkpoints().insert(group.clone(), checkpoint);
        Ok(())
    }

    async fn load_checkpoint(&self, group: &GroupId) -> Result<Option<Bytes>, StoreError> {
        Ok(self.checkpoints().get(group).cloned())
    }

    async fn remove_checkpoint(&self, group: &GroupId) -> Result<(), StoreError> {
        self.checkpoints().remove(group);
        Ok(())
    }
}
