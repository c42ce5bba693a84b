mod counters;
mod ids;
mod record_state;
mod store;

pub(crate) use counters::CounterBatcher;
pub use ids::Epoch;
pub use ids::GroupId;
pub use ids::NodeId;
pub use record_state::EpochStatus;
pub use record_state::RecordState;
pub use store::InMemoryRecordStore;
pub use store::RecordStore;
pub use store::StoreError;
