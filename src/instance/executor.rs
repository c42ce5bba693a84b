use crate::commitlog::RequestBody;
use crate::record::EpochStatus;
use crate::record::GroupId;
use crate::record::NodeId;
use crate::record::RecordStore;
use crate::record::StoreError;
use crate::semantics::UpdateError;
use std::collections::BTreeSet;

/// The effect of executing one decided request against the record store.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Executed {
    Applied { changed: bool },
    FieldNotFound(String),
    RecordNotFound,
    /// The record has moved past this group's epoch. The request is skipped.
    StaleEpoch,
    Stopped { next_members: BTreeSet<NodeId> },
    Deleted,
    NoOp,
    /// Executed by the rest of the group while this replica was catching up. The outcome is
    /// only visible in the transferred record.
    Transferred,
}

/// Applies `body` to the record named by `group`. Every replica executes the same decided
/// requests in the same order against the same starting record, so they all end up equal.
pub(crate) async fn execute(
    store: &dyn RecordStore,
    group: &GroupId,
    body: &RequestBody,
    logger: &slog::Logger,
) -> Result<Executed, StoreError> {
    match body {
        RequestBody::NoOp => Ok(Executed::NoOp),
        RequestBody::Update { field, operation, args } => {
            let mut record = match store.get(group.name()).await? {
                Some(record) => record,
                None => return Ok(Executed::RecordNotFound),
            };
            if record.epoch_status(group.epoch()) != EpochStatus::Current {
                slog::warn!(logger, "Skipping update, record is no longer at this epoch");
                return Ok(Executed::StaleEpoch);
            }

            match record.apply_update(field, *operation, args) {
                Ok(changed) => {
                    if !store.compare_and_swap(group.name(), Some(group.epoch()), record).await? {
                        slog::warn!(logger, "Skipping update, record was handed off while applying it");
                        return Ok(Executed::StaleEpoch);
                    }
                    Ok(Executed::Applied { changed })
                }
                Err(UpdateError::FieldNotFound(field)) => Ok(Executed::FieldNotFound(field)),
            }
        }
        RequestBody::Stop { next_members } => {
            let record = match store.get(group.name()).await? {
                Some(record) => record,
                None => return Ok(Executed::RecordNotFound),
            };

            match record.epoch_status(group.epoch()) {
                EpochStatus::Current => {
                    let next = record.handoff(group.epoch().next(), next_members.clone());
                    if !store.compare_and_swap(group.name(), Some(group.epoch()), next).await? {
                        // A Start for the next epoch got here first with the same frozen values.
                        slog::warn!(logger, "Handoff compare-and-swap lost, record already moved on");
                    }
                    Ok(Executed::Stopped {
                        next_members: next_members.clone(),
                    })
                }
                EpochStatus::Previous => {
                    slog::info!(logger, "Record already handed off to the next epoch");
                    Ok(Executed::Stopped {
                        next_members: next_members.clone(),
                    })
                }
                EpochStatus::Unknown => Ok(Executed::StaleEpoch),
            }
        }
        RequestBody::Delete => {
            let record = match store.get(group.name()).await? {
                Some(record) => record,
                None => return Ok(Executed::Deleted),
            };
            if record.epoch_status(group.epoch()) != EpochStatus::Current {
                return Ok(Executed::StaleEpoch);
            }
            store.delete(group.name()).await?;
            Ok(Executed::Deleted)
        }
    }
}
