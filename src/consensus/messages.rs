use crate::commitlog::Slot;
use crate::consensus::AcceptedValue;
use crate::consensus::Ballot;
use crate::record::Epoch;
use crate::record::GroupId;
use crate::record::NodeId;
use crate::semantics::ValuesMap;
use crate::sync::SyncReply;
use crate::sync::SyncRequest;
use bytes::Bytes;
use std::collections::BTreeSet;

/// GroupMessage is the unit the transport moves between nodes: one peer message addressed to one
/// group instance.
#[derive(Clone, Debug)]
pub struct GroupMessage {
    pub group: GroupId,
    pub from: NodeId,
    pub body: PeerMessage,
}

#[derive(Clone, Debug)]
pub enum PeerMessage {
    /// A non-coordinator hands a client request to the coordinator it believes in.
    Forward { payload: Bytes },
    Prepare { ballot: Ballot, first_undecided: Slot },
    Promise { ballot: Ballot, accepted: Vec<(Slot, AcceptedValue)> },
    /// Reply to a Prepare or Accept carrying a ballot lower than `promised`.
    Nack { promised: Ballot },
    Accept { ballot: Ballot, slot: Slot, payload: Bytes },
    Accepted { ballot: Ballot, slot: Slot },
    Decision { slot: Slot, payload: Bytes },
    SyncRequest(SyncRequest),
    SyncReply(SyncReply),
    CheckpointRequest,
    CheckpointTransfer { transfer: Bytes },
    /// Tells a member of a new group, first epoch or next one, to create its instance.
    Start(StartEpoch),
    /// What the receiver of a Start did with it.
    StartReply(StartOutcome),
}

#[derive(Clone, Debug, PartialEq)]
pub struct StartEpoch {
    pub members: BTreeSet<NodeId>,
    /// None when the record is being created.
    pub previous_epoch: Option<Epoch>,
    /// Initial values of the group: the creation values, or those frozen at the end of
    /// `previous_epoch`.
    pub values: ValuesMap,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum StartOutcome {
    /// The record is written and the instance runs.
    Started,
    /// The group was removed recently and sits in the morgue.
    Quarantined,
    /// The name is already held by another record or by a later epoch.
    Exists,
    NotMember,
    Failed,
}

impl PeerMessage {
    /// Consensus and client traffic keeps an instance awake. Sync chatter alone doesn't.
    pub(crate) fn counts_as_activity(&self) -> bool {
        !matches!(
            self,
            PeerMessage::SyncRequest(_)
                | PeerMessage::SyncReply(_)
                | PeerMessage::CheckpointRequest
                | PeerMessage::CheckpointTransfer { .. }
        )
    }
}
