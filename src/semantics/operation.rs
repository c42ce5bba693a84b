use crate::semantics::apply;
use crate::semantics::apply::ListUpdateFn;
use std::fmt;
use std::str::FromStr;

/// UpdateOperation is the closed set of update kinds a decided request can carry.
/// Declaration order is the wire code; only append new kinds at the end.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum UpdateOperation {
    Create,
    RemoveField,
    Clear,
    ReplaceAll,
    Remove,
    ReplaceSingleton,
    Append,
    AppendOrCreate,
    ReplaceAllOrCreate,
    AppendWithDuplication,
    Substitute,
    Set,
    SetFieldNull,
    UserJsonReplace,
    UserJsonReplaceOrCreate,
}

/// OperationSpec holds the capability flags of an operation kind and the list function that
/// implements it. Upsert kinds point at their non-upsert base via `upsert_of` and borrow its
/// list function.
pub struct OperationSpec {
    /// Operates on a single field rather than the whole record.
    pub single_field: bool,
    /// The existing value need not be read first.
    pub skip_read: bool,
    /// Set on upsert kinds: the non-upsert operation this one behaves like once the field exists.
    pub upsert_of: Option<UpdateOperation>,
    pub(super) list_update: Option<ListUpdateFn>,
}

impl OperationSpec {
    pub fn is_upsert(&self) -> bool {
        self.upsert_of.is_some()
    }
}

macro_rules! single_field {
    ($list_update:path) => {
        OperationSpec {
            single_field: true,
            skip_read: false,
            upsert_of: None,
            list_update: Some($list_update as ListUpdateFn),
        }
    };
}

const CREATE: OperationSpec = single_field!(apply::replace_all);
const REMOVE_FIELD: OperationSpec = OperationSpec {
    single_field: true,
    skip_read: false,
    upsert_of: None,
    list_update: None,
};
const CLEAR: OperationSpec = single_field!(apply::clear);
const REPLACE_ALL: OperationSpec = OperationSpec {
    single_field: true,
    skip_read: true,
    upsert_of: None,
    list_update: Some(apply::replace_all as ListUpdateFn),
};
const REMOVE: OperationSpec = single_field!(apply::remove);
const REPLACE_SINGLETON: OperationSpec = single_field!(apply::replace_singleton);
const APPEND: OperationSpec = single_field!(apply::append_as_set);
const APPEND_OR_CREATE: OperationSpec = OperationSpec {
    single_field: true,
    skip_read: false,
    upsert_of: Some(UpdateOperation::Append),
    list_update: None,
};
const REPLACE_ALL_OR_CREATE: OperationSpec = OperationSpec {
    single_field: true,
    skip_read: false,
    upsert_of: Some(UpdateOperation::ReplaceAll),
    list_update: None,
};
const APPEND_WITH_DUPLICATION: OperationSpec = single_field!(apply::append_with_duplication);
const SUBSTITUTE: OperationSpec = single_field!(apply::substitute);
const SET: OperationSpec = single_field!(apply::set_indexed);
const SET_FIELD_NULL: OperationSpec = single_field!(apply::set_field_null);
const USER_JSON_REPLACE: OperationSpec = OperationSpec {
    single_field: false,
    skip_read: false,
    upsert_of: None,
    list_update: None,
};
const USER_JSON_REPLACE_OR_CREATE: OperationSpec = OperationSpec {
    single_field: false,
    skip_read: false,
    upsert_of: Some(UpdateOperation::UserJsonReplace),
    list_update: None,
};

impl UpdateOperation {
    pub const ALL: [UpdateOperation; 15] = [
        UpdateOperation::Create,
        UpdateOperation::RemoveField,
        UpdateOperation::Clear,
        UpdateOperation::ReplaceAll,
        UpdateOperation::Remove,
        UpdateOperation::ReplaceSingleton,
        UpdateOperation::Append,
        UpdateOperation::AppendOrCreate,
        UpdateOperation::ReplaceAllOrCreate,
        UpdateOperation::AppendWithDuplication,
        UpdateOperation::Substitute,
        UpdateOperation::Set,
        UpdateOperation::SetFieldNull,
        UpdateOperation::UserJsonReplace,
        UpdateOperation::UserJsonReplaceOrCreate,
    ];

    pub fn spec(&self) -> &'static OperationSpec {
        match self {
            UpdateOperation::Create => &CREATE,
            UpdateOperation::RemoveField => &REMOVE_FIELD,
            UpdateOperation::Clear => &CLEAR,
            UpdateOperation::ReplaceAll => &REPLACE_ALL,
            UpdateOperation::Remove => &REMOVE,
            UpdateOperation::ReplaceSingleton => &REPLACE_SINGLETON,
            UpdateOperation::Append => &APPEND,
            UpdateOperation::AppendOrCreate => &APPEND_OR_CREATE,
            UpdateOperation::ReplaceAllOrCreate => &REPLACE_ALL_OR_CREATE,
            UpdateOperation::AppendWithDuplication => &APPEND_WITH_DUPLICATION,
            UpdateOperation::Substitute => &SUBSTITUTE,
            UpdateOperation::Set => &SET,
            UpdateOperation::SetFieldNull => &SET_FIELD_NULL,
            UpdateOperation::UserJsonReplace => &USER_JSON_REPLACE,
            UpdateOperation::UserJsonReplaceOrCreate => &USER_JSON_REPLACE_OR_CREATE,
        }
    }

    /// The operation whose semantics actually run: the base kind for upserts, itself otherwise.
    pub fn effective(&self) -> UpdateOperation {
        self.spec().upsert_of.unwrap_or(*self)
    }

    /// Whether this kind may target a field that does not exist yet.
    pub fn may_create_field(&self) -> bool {
        *self == UpdateOperation::Create || self.spec().is_upsert()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateOperation::Create => "SINGLE_FIELD_CREATE",
            UpdateOperation::RemoveField => "SINGLE_FIELD_REMOVE_FIELD",
            UpdateOperation::Clear => "SINGLE_FIELD_CLEAR",
            UpdateOperation::ReplaceAll => "SINGLE_FIELD_REPLACE_ALL",
            UpdateOperation::Remove => "SINGLE_FIELD_REMOVE",
            UpdateOperation::ReplaceSingleton => "SINGLE_FIELD_REPLACE_SINGLETON",
            UpdateOperation::Append => "SINGLE_FIELD_APPEND",
            UpdateOperation::AppendOrCreate => "SINGLE_FIELD_APPEND_OR_CREATE",
            UpdateOperation::ReplaceAllOrCreate => "SINGLE_FIELD_REPLACE_ALL_OR_CREATE",
            UpdateOperation::AppendWithDuplication => "SINGLE_FIELD_APPEND_WITH_DUPLICATION",
            UpdateOperation::Substitute => "SINGLE_FIELD_SUBSTITUTE",
            UpdateOperation::Set => "SINGLE_FIELD_SET",
            UpdateOperation::SetFieldNull => "SINGLE_FIELD_SET_FIELD_NULL",
            UpdateOperation::UserJsonReplace => "USER_JSON_REPLACE",
            UpdateOperation::UserJsonReplaceOrCreate => "USER_JSON_REPLACE_OR_CREATE",
        }
    }

    /// Stable numeric code used by the slot payload codec.
    pub(crate) fn code(&self) -> u32 {
        *self as u32
    }

    pub(crate) fn from_code(code: u32) -> Option<UpdateOperation> {
        Self::ALL.get(code as usize).copied()
    }
}

impl fmt::Display for UpdateOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown update operation '{0}'")]
pub struct UnknownOperation(String);

impl FromStr for UpdateOperation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|op| op.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownOperation(s.to_string()))
    }
}
