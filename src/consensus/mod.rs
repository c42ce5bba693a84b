mod acceptor;
mod ballot;
mod coordinator;
mod messages;

pub use acceptor::AcceptedValue;
pub(crate) use acceptor::Acceptor;
pub use ballot::Ballot;
pub(crate) use coordinator::Coordinator;
pub use messages::GroupMessage;
pub use messages::PeerMessage;
pub use messages::StartEpoch;
pub use messages::StartOutcome;
