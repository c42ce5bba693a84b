//! This mod is meant to hold most of the code for the library's client-facing API.
mod access_control;
mod options;
mod service;
mod types;
mod wiring;

pub use access_control::AccessControl;
pub use access_control::AccessKind;
pub use access_control::AccessRequest;
pub use access_control::AllowAll;
pub use options::ServiceOptions;
pub use service::NameService;
pub use types::CreateRecordError;
pub use types::LookupError;
pub use types::SubmitUpdateError;
pub use types::UpdateOutcome;
pub use types::UpdateRequest;
pub use wiring::try_create_name_service;
pub use wiring::NameServiceConfig;
pub use wiring::NameServiceCreationError;
