use crate::commitlog;
use crate::commitlog::CodecError;
use crate::commitlog::LogSnapshot;
use crate::commitlog::ProtoField;
use crate::commitlog::RequestId;
use crate::commitlog::Slot;
use crate::consensus::AcceptedValue;
use crate::consensus::Ballot;
use crate::record::NodeId;
use crate::semantics::ValuesMap;
use bytes::Bytes;
use prost::Message;

/// Everything a paused instance needs to pick up where it left off. The record itself already
/// lives in the store.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct InstanceCheckpoint {
    pub(crate) log: LogSnapshot,
    pub(crate) promised: Ballot,
    pub(crate) accepted: Vec<(Slot, AcceptedValue)>,
    pub(crate) recent: Vec<RequestId>,
    pub(crate) next_seq_no: u64,
    pub(crate) stopped: bool,
}

/// A peer's executed state, sent to a replica too far behind for sparse repair.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct StateTransfer {
    pub(crate) next_to_execute: Slot,
    pub(crate) values: ValuesMap,
    pub(crate) recent: Vec<RequestId>,
    pub(crate) stopped: bool,
    /// Decisions the sender holds right after `next_to_execute`, without gaps.
    pub(crate) tail: Vec<(Slot, Bytes)>,
}

impl InstanceCheckpoint {
    pub(crate) fn encode(&self) -> Bytes {
        commitlog::encode_message(&ProtoInstanceCheckpoint {
            next_to_execute: self.log.next_to_execute.as_u64(),
            gc_floor: self.log.gc_floor.as_u64(),
            decided: slot_entries_to_proto(&self.log.decided),
            promised: Some(ballot_to_proto(self.promised)),
            accepted: self
                .accepted
                .iter()
                .map(|(slot, value)| ProtoAcceptedEntry {
                    slot: slot.as_u64(),
                    ballot: Some(ballot_to_proto(value.ballot)),
                    payload: value.payload.to_vec(),
                })
                .collect(),
            recent: request_ids_to_proto(&self.recent),
            next_seq_no: self.next_seq_no,
            stopped: self.stopped,
        })
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let proto = ProtoInstanceCheckpoint::decode(buf)?;
        let promised = proto.promised.ok_or(CodecError::MissingField("promised"))?;
        let mut accepted = Vec::with_capacity(proto.accepted.len());
        for entry in proto.accepted {
            let ballot = entry.ballot.ok_or(CodecError::MissingField("accepted.ballot"))?;
            accepted.push((
                Slot::new(entry.slot),
                AcceptedValue {
                    ballot: ballot_from_proto(ballot),
                    payload: Bytes::from(entry.payload),
                },
            ));
        }

        Ok(InstanceCheckpoint {
            log: LogSnapshot {
                next_to_execute: Slot::new(proto.next_to_execute),
                gc_floor: Slot::new(proto.gc_floor),
                decided: slot_entries_from_proto(proto.decided),
            },
            promised: ballot_from_proto(promised),
            accepted,
            recent: request_ids_from_proto(proto.recent),
            next_seq_no: proto.next_seq_no,
            stopped: proto.stopped,
        })
    }
}

impl StateTransfer {
    pub(crate) fn encode(&self) -> Bytes {
        commitlog::encode_message(&ProtoStateTransfer {
            next_to_execute: self.next_to_execute.as_u64(),
            values: commitlog::values_map_to_proto(&self.values),
            recent: request_ids_to_proto(&self.recent),
            stopped: self.stopped,
            tail: slot_entries_to_proto(&self.tail),
        })
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let proto = ProtoStateTransfer::decode(buf)?;
        Ok(StateTransfer {
            next_to_execute: Slot::new(proto.next_to_execute),
            values: commitlog::values_map_from_proto(proto.values),
            recent: request_ids_from_proto(proto.recent),
            stopped: proto.stopped,
            tail: slot_entries_from_proto(proto.tail),
        })
    }
}

fn ballot_to_proto(ballot: Ballot) -> ProtoBallot {
    ProtoBallot {
        number: ballot.number(),
        coordinator: ballot.coordinator().as_u32(),
    }
}

fn ballot_from_proto(proto: ProtoBallot) -> Ballot {
    Ballot::new(proto.number, NodeId(proto.coordinator))
}

fn slot_entries_to_proto(entries: &[(Slot, Bytes)]) -> Vec<ProtoSlotEntry> {
    entries
        .iter()
        .map(|(slot, payload)| ProtoSlotEntry {
            slot: slot.as_u64(),
            payload: payload.to_vec(),
        })
        .collect()
}

fn slot_entries_from_proto(entries: Vec<ProtoSlotEntry>) -> Vec<(Slot, Bytes)> {
    entries
        .into_iter()
        .map(|e| (Slot::new(e.slot), Bytes::from(e.payload)))
        .collect()
}

fn request_ids_to_proto(ids: &[RequestId]) -> Vec<ProtoRequestId> {
    ids.iter()
        .map(|id| ProtoRequestId {
            origin: id.origin.as_u32(),
            seq_no: id.seq_no,
        })
        .collect()
}

fn request_ids_from_proto(ids: Vec<ProtoRequestId>) -> Vec<RequestId> {
    ids.into_iter()
        .map(|id| RequestId {
            origin: NodeId(id.origin),
            seq_no: id.seq_no,
        })
        .collect()
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct ProtoBallot {
    #[prost(uint64, tag = "1")]
    number: u64,
    #[prost(uint32, tag = "2")]
    coordinator: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct ProtoSlotEntry {
    #[prost(uint64, tag = "1")]
    slot: u64,
    #[prost(bytes, tag = "2")]
    payload: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct ProtoAcceptedEntry {
    #[prost(uint64, tag = "1")]
    slot: u64,
    #[prost(message, optional, tag = "2")]
    ballot: Option<ProtoBallot>,
    #[prost(bytes, tag = "3")]
    payload: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct ProtoRequestId {
    #[prost(uint32, tag = "1")]
    origin: u32,
    #[prost(uint64, tag = "2")]
    seq_no: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct ProtoInstanceCheckpoint {
    #[prost(uint64, tag = "1")]
    next_to_execute: u64,
    #[prost(uint64, tag = "2")]
    gc_floor: u64,
    #[prost(message, repeated, tag = "3")]
    decided: Vec<ProtoSlotEntry>,
    #[prost(message, optional, tag = "4")]
    promised: Option<ProtoBallot>,
    #[prost(message, repeated, tag = "5")]
    accepted: Vec<ProtoAcceptedEntry>,
    #[prost(message, repeated, tag = "6")]
    recent: Vec<ProtoRequestId>,
    #[prost(uint64, tag = "7")]
    next_seq_no: u64,
    #[prost(bool, tag = "8")]
    stopped: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct ProtoStateTransfer {
    #[prost(uint64, tag = "1")]
    next_to_execute: u64,
    #[prost(message, repeated, tag = "2")]
    values: Vec<ProtoField>,
    #[prost(message, repeated, tag = "3")]
    recent: Vec<ProtoRequestId>,
    #[prost(bool, tag = "4")]
    stopped: bool,
    #[prost(message, repeated, tag = "5")]
    tail: Vec<ProtoSlotEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_keeps_votes_and_sequence() {
        let ballot = Ballot::new(4, NodeId(2));
        let checkpoint = InstanceCheckpoint {
            log: LogSnapshot {
                next_to_execute: Slot::new(3),
                gc_floor: Slot::new(1),
                decided: vec![(Slot::new(5), Bytes::from_static(b"five"))],
            },
            promised: ballot,
            accepted: vec![(
                Slot::new(6),
                AcceptedValue {
                    ballot,
                    payload: Bytes::from_static(b"six"),
                },
            )],
            recent: vec![RequestId {
                origin: NodeId(2),
                seq_no: 9,
            }],
            next_seq_no: 10,
            stopped: true,
        };

        assert_eq!(InstanceCheckpoint::decode(&checkpoint.encode()).unwrap(), checkpoint);
    }

    #[test]
    fn checkpoint_without_ballot_is_rejected() {
        let bytes = commitlog::encode_message(&ProtoInstanceCheckpoint::default());
        assert!(matches!(
            InstanceCheckpoint::decode(&bytes),
            Err(CodecError::MissingField("promised"))
        ));
    }
}
