mod coordinator;

pub use coordinator::ReconfigurationAccepted;
pub(crate) use coordinator::ReconfigurationCoordinator;
pub use coordinator::ReconfigurationError;
