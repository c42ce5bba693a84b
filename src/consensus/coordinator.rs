use crate::commitlog::ConsensusLog;
use crate::commitlog::Slot;
use crate::consensus::AcceptedValue;
use crate::consensus::Ballot;
use crate::consensus::PeerMessage;
use crate::record::NodeId;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

enum Phase {
    Idle,
    Preparing {
        ballot: Ballot,
        first_undecided: Slot,
        promises: BTreeSet<NodeId>,
        highest: BTreeMap<Slot, AcceptedValue>,
    },
    Active {
        ballot: Ballot,
    },
}

struct Proposal {
    payload: Bytes,
    acks: BTreeSet<NodeId>,
}

/// Coordinator is the proposing half of a replica. Only one node's coordinator is active at a
/// time for a given ballot; it assigns slots and counts acceptances.
pub(crate) struct Coordinator {
    quorum: usize,
    phase: Phase,
    next_slot: Slot,
    in_flight: BTreeMap<Slot, Proposal>,
    queued: VecDeque<Bytes>,
}

impl Coordinator {
    pub(crate) fn new(quorum: usize) -> Self {
        Coordinator {
            quorum,
            phase: Phase::Idle,
            next_slot: Slot::start_slot(),
            in_flight: BTreeMap::new(),
            queued: VecDeque::new(),
        }
    }

    /// A coordinator that owns an already-prepared ballot and can propose straight away.
    pub(crate) fn new_active(quorum: usize, ballot: Ballot) -> Self {
        Coordinator {
            phase: Phase::Active { ballot },
            ..Coordinator::new(quorum)
        }
    }

    pub(crate) fn active_ballot(&self) -> Option<Ballot> {
        match self.phase {
            Phase::Active { ballot } => Some(ballot),
            _ => None,
        }
    }

    pub(crate) fn is_preparing(&self) -> bool {
        matches!(self.phase, Phase::Preparing { .. })
    }

    /// Assigns `payload` the next free slot, or queues it until a prepare round finishes.
    pub(crate) fn propose(&mut self, payload: Bytes, log: &ConsensusLog) -> Vec<PeerMessage> {
        match self.phase {
            Phase::Active { ballot } => {
                let slot = self.next_slot.max(log.next_slot());
                self.next_slot = slot.next();
                vec![self.accept(ballot, slot, payload)]
            }
            _ => {
                self.queued.push_back(payload);
                Vec::new()
            }
        }
    }

    pub(crate) fn start_prepare(&mut self, ballot: Ballot, first_undecided: Slot) -> PeerMessage {
        self.requeue_in_flight();
        self.phase = Phase::Preparing {
            ballot,
            first_undecided,
            promises: BTreeSet::new(),
            highest: BTreeMap::new(),
        };

        PeerMessage::Prepare {
            ballot,
            first_undecided,
        }
    }

    /// Counts a promise. On reaching a quorum the coordinator becomes active: it re-proposes the
    /// highest-ballot value reported for every undecided slot, fills holes with `noop` and then
    /// proposes whatever queued up meanwhile.
    pub(crate) fn handle_promise(
        &mut self,
        from: NodeId,
        promised: Ballot,
        accepted: Vec<(Slot, AcceptedValue)>,
        log: &ConsensusLog,
        mut noop: impl FnMut() -> Bytes,
    ) -> Vec<PeerMessage> {
        let (ballot, first_undecided, highest) = match &mut self.phase {
            Phase::Preparing {
                ballot,
                first_undecided,
                promises,
                highest,
            } if *ballot == promised => {
                promises.insert(from);
                for (slot, value) in accepted {
                    let replace = highest.get(&slot).map_or(true, |known| known.ballot < value.ballot);
                    if replace {
                        highest.insert(slot, value);
                    }
                }
                if promises.len() < self.quorum {
                    return Vec::new();
                }
                (*ballot, *first_undecided, std::mem::take(highest))
            }
            _ => return Vec::new(),
        };

        self.phase = Phase::Active { ballot };
        let end = highest
            .keys()
            .next_back()
            .map(|s| s.next())
            .unwrap_or(first_undecided)
            .max(log.next_slot())
            .max(first_undecided);

        let mut messages = Vec::new();
        let mut slot = first_undecided;
        while slot < end {
            let payload = match (log.get(slot), highest.get(&slot)) {
                (Some(decided), _) => decided.clone(),
                (None, Some(value)) => value.payload.clone(),
                (None, None) => noop(),
            };
            messages.push(self.accept(ballot, slot, payload));
            slot = slot.next();
        }
        self.next_slot = end;

        while let Some(payload) = self.queued.pop_front() {
            messages.extend(self.propose(payload, log));
        }
        messages
    }

    /// Counts an acceptance. Returns the slot's payload once a quorum accepted it.
    pub(crate) fn handle_accepted(&mut self, from: NodeId, ballot: Ballot, slot: Slot) -> Option<Bytes> {
        if self.active_ballot() != Some(ballot) {
            return None;
        }
        let proposal = self.in_flight.get_mut(&slot)?;
        proposal.acks.insert(from);
        if proposal.acks.len() < self.quorum {
            return None;
        }
        self.in_flight.remove(&slot).map(|p| p.payload)
    }

    /// Someone runs a higher ballot. Steps down and hands back every payload that was not
    /// decided yet, so the caller can route them to the new coordinator.
    pub(crate) fn step_down(&mut self, higher: Ballot) -> Vec<Bytes> {
        let mine = match &self.phase {
            Phase::Idle => return Vec::new(),
            Phase::Preparing { ballot, .. } => *ballot,
            Phase::Active { ballot } => *ballot,
        };
        if higher <= mine {
            return Vec::new();
        }
        self.phase = Phase::Idle;
        self.requeue_in_flight();
        self.queued.drain(..).collect()
    }

    pub(crate) fn has_work(&self) -> bool {
        !self.in_flight.is_empty() || !self.queued.is_empty()
    }

    /// Drops in-flight bookkeeping for slots that got decided some other way.
    pub(crate) fn forget_decided(&mut self, slot: Slot) {
        self.in_flight.remove(&slot);
    }

    fn accept(&mut self, ballot: Ballot, slot: Slot, payload: Bytes) -> PeerMessage {
        self.in_flight.insert(
            slot,
            Proposal {
                payload: payload.clone(),
                acks: BTreeSet::new(),
            },
        );
        PeerMessage::Accept { ballot, slot, payload }
    }

    fn requeue_in_flight(&mut self) {
        let in_flight = std::mem::take(&mut self.in_flight);
        for (_, proposal) in in_flight.into_iter().rev() {
            self.queued.push_front(proposal.payload);
        }
    }
}
