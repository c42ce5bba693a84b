mod instance_manager;
mod table;
#[cfg(test)]
mod test_utils;

pub(crate) use instance_manager::Access;
pub(crate) use instance_manager::CreateInstanceError;
pub(crate) use instance_manager::CreateMode;
pub(crate) use instance_manager::InstanceManager;
pub(crate) use instance_manager::ManagerConfig;
pub use table::InstanceState;
#[cfg(test)]
pub(crate) use test_utils::next_notice;
#[cfg(test)]
pub(crate) use test_utils::test_node;
#[cfg(test)]
pub(crate) use test_utils::TestNode;
