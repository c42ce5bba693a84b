mod group_transport;
mod local;

pub use group_transport::GroupTransport;
pub use group_transport::TransportError;
pub use local::LocalNetwork;
pub use local::LocalTransport;
