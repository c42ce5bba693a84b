mod codec;
mod consensus_log;
mod slot;

pub(crate) use codec::encode_message;
pub(crate) use codec::values_map_from_proto;
pub(crate) use codec::values_map_to_proto;
pub(crate) use codec::CodecError;
pub(crate) use codec::ProtoField;
pub(crate) use codec::Request;
pub(crate) use codec::RequestBody;
pub use codec::RequestId;
pub(crate) use consensus_log::ConsensusLog;
pub(crate) use consensus_log::DecisionOutcome;
pub(crate) use consensus_log::LogSnapshot;
pub use slot::Slot;
