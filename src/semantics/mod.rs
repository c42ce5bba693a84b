//! Pure update semantics: how an operation kind turns an existing field value into a new one.
//! Nothing in here touches storage or shared state.
mod apply;
mod operation;
mod values;

pub use apply::update_values_list;
pub use apply::update_values_map;
pub use apply::UpdateArgs;
pub use apply::UpdateError;
pub use operation::OperationSpec;
pub use operation::UnknownOperation;
pub use operation::UpdateOperation;
pub use values::is_null_marked;
pub use values::Value;
pub use values::ValueList;
pub use values::ValuesMap;
pub use values::NULL_MARKER;
