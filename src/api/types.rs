use crate::record::StoreError;
use crate::semantics::UpdateArgs;
use crate::semantics::UpdateOperation;
use crate::semantics::ValueList;
use crate::semantics::ValuesMap;

/// One client update, already past access control's signature checks.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateRequest {
    pub name: String,
    pub field: String,
    pub operation: UpdateOperation,
    pub new_values: ValueList,
    /// SUBSTITUTE's values to replace.
    pub old_values: ValueList,
    /// SET's index.
    pub argument: usize,
    /// Whole-record values for the USER_JSON operations.
    pub user_json: ValuesMap,
    pub writer: Option<String>,
}

impl UpdateRequest {
    pub fn new(
        name: impl Into<String>,
        field: impl Into<String>,
        operation: UpdateOperation,
        new_values: ValueList,
    ) -> Self {
        UpdateRequest {
            name: name.into(),
            field: field.into(),
            operation,
            new_values,
            old_values: ValueList::new(),
            argument: 0,
            user_json: ValuesMap::new(),
            writer: None,
        }
    }

    pub fn with_old_values(mut self, old_values: ValueList) -> Self {
        self.old_values = old_values;
        self
    }

    pub fn with_argument(mut self, argument: usize) -> Self {
        self.argument = argument;
        self
    }

    pub fn with_user_json(mut self, user_json: ValuesMap) -> Self {
        self.user_json = user_json;
        self
    }

    pub fn with_writer(mut self, writer: impl Into<String>) -> Self {
        self.writer = Some(writer.into());
        self
    }

    pub(super) fn args(&self) -> UpdateArgs {
        UpdateArgs {
            new_values: self.new_values.clone(),
            old_values: self.old_values.clone(),
            argument: self.argument,
            user_json: self.user_json.clone(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    Changed,
    Unchanged,
}

#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum SubmitUpdateError {
    #[error("Field {0} not found")]
    FieldNotFound(String),
    #[error("Record {0} not found")]
    RecordNotFound(String),
    #[error("Group of {0} is unavailable")]
    GroupUnavailable(String),
    #[error("Access denied")]
    AccessDenied,
}

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("Record {0} not found")]
    RecordNotFound(String),
    #[error("Access denied")]
    AccessDenied,
    #[error("{0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum CreateRecordError {
    #[error("Record {0} already exists")]
    RecordExists(String),
    #[error("Record {0} was removed recently, recreation is quarantined")]
    Quarantined(String),
    #[error("The member set is empty")]
    NoMembers,
    #[error("Group of {0} could not be started")]
    GroupUnavailable(String),
    #[error("Access denied")]
    AccessDenied,
    #[error("{0}")]
    Store(#[from] StoreError),
}
