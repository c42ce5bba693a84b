use crate::commitlog::ConsensusLog;
use crate::commitlog::Slot;
use crate::record::NodeId;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};

/// Idle replicas still announce their frontier every this many ticks so a replica that missed
/// the tail of the log (and so sees no gap) eventually hears about it.
const HEARTBEAT_TICKS: u32 = 10;

#[derive(Clone, Debug, PartialEq)]
pub struct SyncRequest {
    pub max_decided: Option<Slot>,
    pub executed: Option<Slot>,
    /// Undecided slots below `max_decided`.
    pub missing: Vec<Slot>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SyncReply {
    pub max_decided: Option<Slot>,
    pub executed: Option<Slot>,
    /// Slots below this were garbage collected by the responder and can't be retransmitted.
    pub gc_floor: Slot,
    /// The responder has no gaps of its own.
    pub caught_up: bool,
}

#[derive(Debug, PartialEq)]
pub(crate) enum SyncAction {
    Nothing,
    /// Sparse repair can't close the gap. Ask the responder for its whole state.
    RequestCheckpoint,
}

/// SyncState is what a replica remembers between sync rounds.
pub(crate) struct SyncState {
    last_announced: Option<Slot>,
    ticks_since_announce: u32,
    peer_executed: BTreeMap<NodeId, Option<Slot>>,
}

impl SyncState {
    pub(crate) fn new() -> Self {
        SyncState {
            last_announced: None,
            ticks_since_announce: 0,
            peer_executed: BTreeMap::new(),
        }
    }

    /// Builds this tick's sync request. Only sent when there are gaps, when new decisions
    /// arrived since the last one, or on the heartbeat.
    pub(crate) fn sync_request(&mut self, log: &ConsensusLog) -> Option<SyncRequest> {
        self.ticks_since_announce += 1;
        let missing = log.missing_slots();
        let advanced = log.max_decided() != self.last_announced;
        if missing.is_empty() && !advanced && self.ticks_since_announce < HEARTBEAT_TICKS {
            return None;
        }

        self.ticks_since_announce = 0;
        self.last_announced = log.max_decided();
        Some(SyncRequest {
            max_decided: log.max_decided(),
            executed: log.executed_slot(),
            missing,
        })
    }

    pub(crate) fn record_peer_executed(&mut self, peer: NodeId, executed: Option<Slot>) {
        let known = self.peer_executed.entry(peer).or_insert(None);
        if *known < executed {
            *known = executed;
        }
    }

    /// The slot below which every member has executed, once every other member has reported.
    pub(crate) fn collectable_below(&self, me: NodeId, members: &BTreeSet<NodeId>, log: &ConsensusLog) -> Option<Slot> {
        let mut floor = log.next_to_execute();
        for member in members.iter().filter(|m| **m != me) {
            let executed = self.peer_executed.get(member)?;
            let next = executed.map(|s| s.next()).unwrap_or_else(Slot::start_slot);
            floor = floor.min(next);
        }
        Some(floor)
    }
}

/// Answers a peer's sync request with the decisions it lacks: the gaps it listed plus everything
/// past its frontier. Returned slots go back to the requester only.
pub(crate) fn handle_sync_request(log: &ConsensusLog, request: &SyncRequest) -> (Vec<(Slot, Bytes)>, SyncReply) {
    let mut retransmit: Vec<(Slot, Bytes)> = request
        .missing
        .iter()
        .filter_map(|slot| log.get(*slot).map(|payload| (*slot, payload.clone())))
        .collect();
    if let Some(max) = log.max_decided() {
        retransmit.extend(log.decided_after(request.max_decided, max));
    }

    let reply = SyncReply {
        max_decided: log.max_decided(),
        executed: log.executed_slot(),
        gc_floor: log.gc_floor(),
        caught_up: log.missing_slots().is_empty(),
    };
    (retransmit, reply)
}

/// A request announcing a frontier past ours means we are the one behind. Returns the request
/// to send back to that peer so it retransmits what we lack.
pub(crate) fn counter_request(log: &ConsensusLog, request: &SyncRequest) -> Option<SyncRequest> {
    if request.max_decided <= log.max_decided() {
        return None;
    }
    Some(SyncRequest {
        max_decided: log.max_decided(),
        executed: log.executed_slot(),
        missing: log.missing_slots(),
    })
}

/// Decides whether a reply shows this replica is too far behind for sparse repair.
pub(crate) fn handle_sync_reply(log: &ConsensusLog, reply: &SyncReply, catch_up_threshold: u64) -> SyncAction {
    if !reply.caught_up {
        return SyncAction::Nothing;
    }
    let responder_next = reply.max_decided.map(|s| s.next()).unwrap_or_else(Slot::start_slot);
    let mine = log.next_to_execute();

    if responder_next.distance_from(mine) > catch_up_threshold {
        return SyncAction::RequestCheckpoint;
    }
    let collected_hole = (mine.as_u64()..reply.gc_floor.as_u64()).any(|s| log.get(Slot::new(s)).is_none());
    if collected_hole {
        return SyncAction::RequestCheckpoint;
    }
    SyncAction::Nothing
}
