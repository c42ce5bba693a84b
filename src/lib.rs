mod api;
mod commitlog;
mod consensus;
mod instance;
mod manager;
mod reconfiguration;
mod record;
mod semantics;
mod sync;
mod time;
mod transport;

pub use api::try_create_name_service;
pub use api::AccessControl;
pub use api::AccessKind;
pub use api::AccessRequest;
pub use api::AllowAll;
pub use api::CreateRecordError;
pub use api::LookupError;
pub use api::NameService;
pub use api::NameServiceConfig;
pub use api::NameServiceCreationError;
pub use api::ServiceOptions;
pub use api::SubmitUpdateError;
pub use api::UpdateOutcome;
pub use api::UpdateRequest;
pub use commitlog::RequestId;
pub use commitlog::Slot;
pub use consensus::AcceptedValue;
pub use consensus::Ballot;
pub use consensus::GroupMessage;
pub use consensus::PeerMessage;
pub use consensus::StartEpoch;
pub use consensus::StartOutcome;
pub use instance::InstanceStatus;
pub use manager::InstanceState;
pub use reconfiguration::ReconfigurationAccepted;
pub use reconfiguration::ReconfigurationError;
pub use record::Epoch;
pub use record::EpochStatus;
pub use record::GroupId;
pub use record::InMemoryRecordStore;
pub use record::NodeId;
pub use record::RecordState;
pub use record::RecordStore;
pub use record::StoreError;
pub use semantics::is_null_marked;
pub use semantics::update_values_list;
pub use semantics::update_values_map;
pub use semantics::OperationSpec;
pub use semantics::UnknownOperation;
pub use semantics::UpdateArgs;
pub use semantics::UpdateError;
pub use semantics::UpdateOperation;
pub use semantics::Value;
pub use semantics::ValueList;
pub use semantics::ValuesMap;
pub use semantics::NULL_MARKER;
pub use sync::SyncReply;
pub use sync::SyncRequest;
pub use transport::GroupTransport;
pub use transport::LocalNetwork;
pub use transport::LocalTransport;
pub use transport::TransportError;

// Root mods hold no code, only `mod` and `pub use` statements, and no `mod` is ever `pub`.
// Everything public is exported through an individual use statement.
