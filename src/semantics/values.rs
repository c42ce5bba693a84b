use std::collections::BTreeMap;

/// A single scalar value of a field.
pub type Value = String;

/// Ordered list of values for one field.
pub type ValueList = Vec<Value>;

/// ValuesMap is the ordered field -> value list mapping that makes up a record's mutable state.
/// `BTreeMap` keeps iteration order identical on every replica.
pub type ValuesMap = BTreeMap<String, ValueList>;

/// Sentinel first element meaning "this field was explicitly set to null", as opposed to the
/// field being absent from the values map.
pub const NULL_MARKER: &str = "[]";

pub fn is_null_marked(values: &[Value]) -> bool {
    values.first().map(|v| v == NULL_MARKER).unwrap_or(false)
}
