//! SyncProtocol: replicas periodically exchange log frontiers and retransmit the decided slots
//! their peers are missing. Pure functions over a `ConsensusLog`; the instance does the I/O.
mod protocol;

pub(crate) use protocol::counter_request;
pub(crate) use protocol::handle_sync_reply;
pub(crate) use protocol::handle_sync_request;
pub(crate) use protocol::SyncAction;
pub(crate) use protocol::SyncState;
pub use protocol::SyncReply;
pub use protocol::SyncRequest;
