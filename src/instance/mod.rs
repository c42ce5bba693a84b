mod actor;
mod checkpoint;
mod executor;
mod paxos_instance;
mod recent_requests;

pub(crate) use actor::create;
pub(crate) use actor::InstanceClient;
pub(crate) use actor::InstanceServices;
pub(crate) use actor::LifecycleNotice;
pub(crate) use actor::PauseError;
pub(crate) use actor::ProposeError;
pub(crate) use checkpoint::InstanceCheckpoint;
pub(crate) use checkpoint::StateTransfer;
pub(crate) use executor::Executed;
pub(crate) use paxos_instance::Destination;
pub(crate) use paxos_instance::InstanceConfig;
pub(crate) use paxos_instance::InvalidInstanceConfig;
pub use paxos_instance::InstanceStatus;
pub(crate) use paxos_instance::Outgoing;
pub(crate) use paxos_instance::PaxosInstance;
pub(crate) use recent_requests::RecentRequests;
