use crate::record::Epoch;
use crate::record::NodeId;
use crate::semantics;
use crate::semantics::UpdateArgs;
use crate::semantics::UpdateError;
use crate::semantics::UpdateOperation;
use crate::semantics::ValueList;
use crate::semantics::ValuesMap;
use std::collections::BTreeSet;

/// How an epoch relates to the record it was asked about.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EpochStatus {
    Current,
    Previous,
    Unknown,
}

/// RecordState is the durable per-name record as every replica of its group stores it.
///
/// `old_values` is the snapshot frozen by the last epoch handoff. `previous_epoch` stays set after
/// a handoff so the retired group can still ask for its frozen values.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordState {
    pub name: String,
    pub current_values: ValuesMap,
    pub old_values: ValuesMap,
    pub current_epoch: Option<Epoch>,
    pub previous_epoch: Option<Epoch>,
    pub members: BTreeSet<NodeId>,
    pub lookup_count: u64,
    pub update_count: u64,
}

impl RecordState {
    pub fn new(name: impl Into<String>, epoch: Epoch, members: BTreeSet<NodeId>, values: ValuesMap) -> Self {
        RecordState {
            name: name.into(),
            current_values: values,
            old_values: ValuesMap::new(),
            current_epoch: Some(epoch),
            previous_epoch: None,
            members,
            lookup_count: 0,
            update_count: 0,
        }
    }

    pub fn epoch_status(&self, epoch: Epoch) -> EpochStatus {
        if self.current_epoch == Some(epoch) {
            EpochStatus::Current
        } else if self.previous_epoch == Some(epoch) {
            EpochStatus::Previous
        } else {
            EpochStatus::Unknown
        }
    }

    /// The frozen values, but only to someone asking about the epoch they were frozen from.
    pub fn old_values_on_epoch_match(&self, epoch: Epoch) -> Option<&ValuesMap> {
        match self.epoch_status(epoch) {
            EpochStatus::Previous => Some(&self.old_values),
            _ => None,
        }
    }

    pub fn field(&self, field: &str) -> Option<&ValueList> {
        self.current_values.get(field)
    }

    pub fn apply_update(
        &mut self,
        field: &str,
        operation: UpdateOperation,
        args: &UpdateArgs,
    ) -> Result<bool, UpdateError> {
        semantics::update_values_map(&mut self.current_values, field, operation, args)
    }

    /// Builds the state that ends `current_epoch`: current values are frozen into `old_values`,
    /// the retiring epoch becomes `previous_epoch` and `next_members` serve `next_epoch`. Stored
    /// with a single compare-and-swap so readers see either side of the handoff, never a mix.
    pub fn handoff(&self, next_epoch: Epoch, next_members: BTreeSet<NodeId>) -> RecordState {
        RecordState {
            name: self.name.clone(),
            current_values: self.current_values.clone(),
            old_values: self.current_values.clone(),
            current_epoch: Some(next_epoch),
            previous_epoch: self.current_epoch,
            members: next_members,
            lookup_count: self.lookup_count,
            update_count: self.update_count,
        }
    }
}
