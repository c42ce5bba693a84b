use crate::commitlog::ConsensusLog;
use crate::commitlog::DecisionOutcome;
use crate::commitlog::Request;
use crate::commitlog::RequestBody;
use crate::commitlog::RequestId;
use crate::commitlog::Slot;
use crate::consensus::Acceptor;
use crate::consensus::Ballot;
use crate::consensus::Coordinator;
use crate::consensus::PeerMessage;
use crate::instance::InstanceCheckpoint;
use crate::instance::RecentRequests;
use crate::instance::StateTransfer;
use crate::record::GroupId;
use crate::record::NodeId;
use crate::semantics::ValuesMap;
use crate::sync;
use crate::sync::SyncAction;
use crate::sync::SyncState;
use bytes::Bytes;
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};
use tokio::time::{Duration, Instant};

const RECENT_REQUEST_CAPACITY: usize = 4096;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Destination {
    /// Every member, this node included.
    All,
    /// Every member except this node.
    Peers,
    Node(NodeId),
}

#[derive(Debug)]
pub(crate) struct Outgoing {
    pub(crate) to: Destination,
    pub(crate) body: PeerMessage,
}

impl Outgoing {
    fn to(to: Destination, body: PeerMessage) -> Self {
        Outgoing { to, body }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct InstanceConfig {
    pub(crate) me: NodeId,
    pub(crate) group: GroupId,
    pub(crate) members: BTreeSet<NodeId>,
    pub(crate) decided_window: u64,
    pub(crate) catch_up_threshold: u64,
    pub(crate) coordinator_timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum InvalidInstanceConfig {
    #[error("Group has no members")]
    NoMembers,
    #[error("{0} is not a member of the group")]
    NotAMember(NodeId),
}

/// Observable summary of one instance.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceStatus {
    pub group: GroupId,
    pub max_decided: Option<Slot>,
    pub executed: Option<Slot>,
    /// The coordinator this replica currently believes in.
    pub coordinator: NodeId,
    pub stopped: bool,
    pub catching_up: bool,
}

struct PendingRequest {
    payload: Bytes,
    deadline: Instant,
}

/// PaxosInstance is one replica of one group's consensus: acceptor, coordinator, decided log and
/// sync bookkeeping. It is a plain state machine. Handlers return the messages to send; the
/// actor owning it does all I/O and executes decided slots.
pub(crate) struct PaxosInstance {
    logger: slog::Logger,
    config: InstanceConfig,
    log: ConsensusLog,
    acceptor: Acceptor,
    coordinator: Coordinator,
    highest_seen: Ballot,
    sync: SyncState,
    pending: BTreeMap<RequestId, PendingRequest>,
    recent: RecentRequests,
    next_seq_no: u64,
    stopped: bool,
    catching_up: bool,
    last_checkpoint_request: Option<Instant>,
}

impl PaxosInstance {
    pub(crate) fn new(logger: slog::Logger, config: InstanceConfig) -> Result<Self, InvalidInstanceConfig> {
        let initial = validate(&config)?;
        let quorum = quorum(&config.members);
        let coordinator = if initial.coordinator() == config.me {
            Coordinator::new_active(quorum, initial)
        } else {
            Coordinator::new(quorum)
        };

        Ok(PaxosInstance {
            logger,
            log: ConsensusLog::new(config.decided_window),
            acceptor: Acceptor::new(initial),
            coordinator,
            highest_seen: initial,
            sync: SyncState::new(),
            pending: BTreeMap::new(),
            recent: RecentRequests::new(RECENT_REQUEST_CAPACITY),
            next_seq_no: 0,
            stopped: false,
            catching_up: false,
            last_checkpoint_request: None,
            config,
        })
    }

    /// An instance that lost its state. It logs decisions as usual but neither votes nor executes
    /// until a peer's state transfer is installed, since it cannot remember what it promised
    /// before. It never reuses the initial ballot.
    pub(crate) fn new_catching_up(
        logger: slog::Logger,
        config: InstanceConfig,
    ) -> Result<Self, InvalidInstanceConfig> {
        let mut instance = PaxosInstance::new(logger, config)?;
        instance.coordinator = Coordinator::new(quorum(&instance.config.members));
        instance.catching_up = true;
        Ok(instance)
    }

    pub(crate) fn from_checkpoint(
        logger: slog::Logger,
        config: InstanceConfig,
        checkpoint: InstanceCheckpoint,
    ) -> Result<Self, InvalidInstanceConfig> {
        validate(&config)?;

        Ok(PaxosInstance {
            logger,
            log: ConsensusLog::restore(checkpoint.log, config.decided_window),
            acceptor: Acceptor::restore(checkpoint.promised, checkpoint.accepted),
            coordinator: Coordinator::new(quorum(&config.members)),
            highest_seen: checkpoint.promised,
            sync: SyncState::new(),
            pending: BTreeMap::new(),
            recent: RecentRequests::with_ids(RECENT_REQUEST_CAPACITY, checkpoint.recent),
            next_seq_no: checkpoint.next_seq_no,
            stopped: checkpoint.stopped,
            catching_up: false,
            last_checkpoint_request: None,
            config,
        })
    }

    pub(crate) fn group(&self) -> &GroupId {
        &self.config.group
    }

    pub(crate) fn me(&self) -> NodeId {
        self.config.me
    }

    pub(crate) fn members(&self) -> &BTreeSet<NodeId> {
        &self.config.members
    }

    pub(crate) fn propose(&mut self, body: RequestBody, now: Instant) -> Option<(RequestId, Vec<Outgoing>)> {
        if self.stopped {
            return None;
        }
        let id = RequestId {
            origin: self.config.me,
            seq_no: self.next_seq_no,
        };
        self.next_seq_no += 1;

        let payload = Request { id, body }.encode();
        self.pending.insert(
            id,
            PendingRequest {
                payload: payload.clone(),
                deadline: self.deadline(now),
            },
        );
        Some((id, self.route_payload(payload)))
    }

    pub(crate) fn handle_message(&mut self, from: NodeId, body: PeerMessage, now: Instant) -> Vec<Outgoing> {
        match body {
            PeerMessage::Forward { payload } => {
                let leader = self.highest_seen.coordinator();
                if leader == self.config.me {
                    self.route_payload(payload)
                } else if leader != from {
                    vec![Outgoing::to(Destination::Node(leader), PeerMessage::Forward { payload })]
                } else {
                    slog::debug!(self.logger, "Dropping forward bounced back from {}", from);
                    Vec::new()
                }
            }
            PeerMessage::Prepare { .. } | PeerMessage::Accept { .. } if self.catching_up => {
                slog::debug!(self.logger, "Not voting for {} while catching up", from);
                Vec::new()
            }
            PeerMessage::Prepare {
                ballot,
                first_undecided,
            } => match self.acceptor.handle_prepare(ballot, first_undecided) {
                Ok(accepted) => {
                    let mut out = self.observe_ballot(ballot);
                    out.push(Outgoing::to(
                        Destination::Node(from),
                        PeerMessage::Promise { ballot, accepted },
                    ));
                    out
                }
                Err(promised) => vec![Outgoing::to(Destination::Node(from), PeerMessage::Nack { promised })],
            },
            PeerMessage::Promise { ballot, accepted } => {
                let me = self.config.me;
                let next_seq_no = &mut self.next_seq_no;
                let noop = || {
                    let id = RequestId {
                        origin: me,
                        seq_no: *next_seq_no,
                    };
                    *next_seq_no += 1;
                    Request {
                        id,
                        body: RequestBody::NoOp,
                    }
                    .encode()
                };
                let was_active = self.coordinator.active_ballot().is_some();
                let accepts = self
                    .coordinator
                    .handle_promise(from, ballot, accepted, &self.log, noop);
                if !was_active && self.coordinator.active_ballot().is_some() {
                    slog::info!(self.logger, "Coordinating with ballot {:?}", ballot);
                }
                accepts.into_iter().map(|a| Outgoing::to(Destination::All, a)).collect()
            }
            PeerMessage::Nack { promised } => self.observe_ballot(promised),
            PeerMessage::Accept { ballot, slot, payload } => match self.acceptor.handle_accept(ballot, slot, payload) {
                Ok(()) => {
                    let mut out = self.observe_ballot(ballot);
                    out.push(Outgoing::to(
                        Destination::Node(from),
                        PeerMessage::Accepted { ballot, slot },
                    ));
                    out
                }
                Err(promised) => vec![Outgoing::to(Destination::Node(from), PeerMessage::Nack { promised })],
            },
            PeerMessage::Accepted { ballot, slot } => match self.coordinator.handle_accepted(from, ballot, slot) {
                Some(payload) => vec![Outgoing::to(Destination::All, PeerMessage::Decision { slot, payload })],
                None => Vec::new(),
            },
            PeerMessage::Decision { slot, payload } => {
                self.record_decision(slot, payload);
                Vec::new()
            }
            PeerMessage::SyncRequest(request) => {
                self.sync.record_peer_executed(from, request.executed);
                let (retransmit, reply) = sync::handle_sync_request(&self.log, &request);
                if !retransmit.is_empty() {
                    slog::debug!(self.logger, "Retransmitting {} slots to {}", retransmit.len(), from);
                }
                let mut out: Vec<Outgoing> = retransmit
                    .into_iter()
                    .map(|(slot, payload)| {
                        Outgoing::to(Destination::Node(from), PeerMessage::Decision { slot, payload })
                    })
                    .collect();
                out.push(Outgoing::to(Destination::Node(from), PeerMessage::SyncReply(reply)));
                if let Some(counter) = sync::counter_request(&self.log, &request) {
                    out.push(Outgoing::to(Destination::Node(from), PeerMessage::SyncRequest(counter)));
                }
                out
            }
            PeerMessage::SyncReply(reply) => {
                self.sync.record_peer_executed(from, reply.executed);
                let action = if self.catching_up && reply.caught_up {
                    SyncAction::RequestCheckpoint
                } else {
                    sync::handle_sync_reply(&self.log, &reply, self.config.catch_up_threshold)
                };
                match action {
                    SyncAction::RequestCheckpoint if self.may_request_checkpoint(now) => {
                        slog::info!(self.logger, "Too far behind {}, requesting its checkpoint", from);
                        vec![Outgoing::to(Destination::Node(from), PeerMessage::CheckpointRequest)]
                    }
                    _ => Vec::new(),
                }
            }
            other @ PeerMessage::CheckpointRequest
            | other @ PeerMessage::CheckpointTransfer { .. }
            | other @ PeerMessage::Start(_)
            | other @ PeerMessage::StartReply(_) => {
                slog::warn!(self.logger, "Unexpected message for the consensus core: {:?}", other);
                Vec::new()
            }
        }
    }

    /// Periodic work: sync announcements, garbage collection, catch-up requests and coordinator
    /// takeover for requests stuck longer than the coordinator timeout.
    pub(crate) fn tick(&mut self, now: Instant) -> Vec<Outgoing> {
        let mut out = Vec::new();

        if let Some(request) = self.sync.sync_request(&self.log) {
            out.push(Outgoing::to(Destination::Peers, PeerMessage::SyncRequest(request)));
        }

        if let Some(floor) = self
            .sync
            .collectable_below(self.config.me, &self.config.members, &self.log)
        {
            let dropped = self.log.garbage_collect(floor);
            if dropped > 0 {
                self.acceptor.forget_below(floor);
                slog::debug!(self.logger, "Collected {} executed slots below {:?}", dropped, floor);
            }
        }

        if self.catching_up && self.may_request_checkpoint(now) {
            out.push(Outgoing::to(Destination::Peers, PeerMessage::CheckpointRequest));
        }

        if !self.stopped {
            out.extend(self.retry_overdue(now));
        }
        out
    }

    fn retry_overdue(&mut self, now: Instant) -> Vec<Outgoing> {
        let overdue: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        if overdue.is_empty() {
            return Vec::new();
        }

        let mut payloads = Vec::with_capacity(overdue.len());
        for id in overdue {
            let deadline = self.deadline(now);
            if let Some(pending) = self.pending.get_mut(&id) {
                pending.deadline = deadline;
                payloads.push(pending.payload.clone());
            }
        }

        let mut out = Vec::new();
        if self.coordinator.active_ballot().is_some() {
            // Accepts or decisions got lost. Proposing again is safe: execution skips repeats.
            for payload in payloads {
                out.extend(self.route_payload(payload));
            }
            return out;
        }

        let was_idle = !self.coordinator.is_preparing();
        let ballot = self.highest_seen.next_for(self.config.me);
        slog::warn!(
            self.logger,
            "Requests stuck behind coordinator {}, taking over with ballot {:?}",
            self.highest_seen.coordinator(),
            ballot
        );
        out.push(self.start_prepare(ballot));
        if was_idle {
            for payload in payloads {
                self.coordinator.propose(payload, &self.log);
            }
        }
        out
    }

    pub(crate) fn next_executable(&self) -> Option<(Slot, Bytes)> {
        if self.catching_up || self.stopped {
            return None;
        }
        self.log.next_executable()
    }

    pub(crate) fn is_duplicate(&self, id: &RequestId) -> bool {
        self.recent.contains(id)
    }

    pub(crate) fn mark_executed(&mut self, slot: Slot, id: RequestId) {
        self.log.mark_executed(slot);
        self.recent.insert(id);
        self.pending.remove(&id);
    }

    /// Stops execution for good. Returns this node's requests that will now never execute.
    pub(crate) fn mark_stopped(&mut self) -> Vec<RequestId> {
        self.stopped = true;
        let abandoned = self.pending.keys().copied().collect();
        self.pending.clear();
        abandoned
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Nothing proposed, decided or queued is waiting on this instance.
    pub(crate) fn is_quiescent(&self) -> bool {
        self.pending.is_empty() && self.log.unexecuted_len() == 0 && !self.coordinator.has_work()
    }

    pub(crate) fn checkpoint(&self) -> InstanceCheckpoint {
        InstanceCheckpoint {
            log: self.log.checkpoint(),
            promised: self.acceptor.promised(),
            accepted: self.acceptor.accepted(),
            recent: self.recent.to_vec(),
            next_seq_no: self.next_seq_no,
            stopped: self.stopped,
        }
    }

    /// Describes this replica's executed state. `values` must be the record as of
    /// `executed_slot`.
    pub(crate) fn state_transfer(&self, values: ValuesMap) -> StateTransfer {
        StateTransfer {
            next_to_execute: self.log.next_to_execute(),
            values,
            recent: self.recent.to_vec(),
            stopped: self.stopped,
            tail: self.log.contiguous_from(self.log.next_to_execute()),
        }
    }

    pub(crate) fn can_serve_transfer(&self) -> bool {
        !self.catching_up
    }

    /// Whether `transfer` moves this replica forward. Its values must be stored before
    /// `install_transfer` is called.
    pub(crate) fn wants_transfer(&self, transfer: &StateTransfer) -> bool {
        self.catching_up || transfer.next_to_execute > self.log.next_to_execute()
    }

    pub(crate) fn install_transfer(&mut self, transfer: StateTransfer) {
        self.log.install_transfer(transfer.next_to_execute);
        for (slot, payload) in transfer.tail {
            if !self.log.append_if_next(slot, payload.clone()) {
                self.log.record_decision(slot, payload);
            }
        }

        let me = self.config.me;
        for id in transfer.recent {
            if id.origin == me && id.seq_no >= self.next_seq_no {
                self.next_seq_no = id.seq_no + 1;
            }
            self.pending.remove(&id);
            self.recent.insert(id);
        }
        if transfer.stopped {
            self.stopped = true;
        }
        self.catching_up = false;

        slog::info!(
            self.logger,
            "Installed state transfer, executing from slot {:?}",
            self.log.next_to_execute()
        );
    }

    pub(crate) fn status(&self) -> InstanceStatus {
        InstanceStatus {
            group: self.config.group.clone(),
            max_decided: self.log.max_decided(),
            executed: self.log.executed_slot(),
            coordinator: self.highest_seen.coordinator(),
            stopped: self.stopped,
            catching_up: self.catching_up,
        }
    }

    fn route_payload(&mut self, payload: Bytes) -> Vec<Outgoing> {
        let leader = self.highest_seen.coordinator();
        if leader != self.config.me {
            return vec![Outgoing::to(Destination::Node(leader), PeerMessage::Forward { payload })];
        }

        let mut out = Vec::new();
        if self.coordinator.active_ballot().is_none() && !self.coordinator.is_preparing() {
            let ballot = self.highest_seen.next_for(self.config.me);
            out.push(self.start_prepare(ballot));
        }
        out.extend(
            self.coordinator
                .propose(payload, &self.log)
                .into_iter()
                .map(|accept| Outgoing::to(Destination::All, accept)),
        );
        out
    }

    fn start_prepare(&mut self, ballot: Ballot) -> Outgoing {
        self.highest_seen = self.highest_seen.max(ballot);
        let first_undecided = self.log.next_to_execute();
        Outgoing::to(Destination::All, self.coordinator.start_prepare(ballot, first_undecided))
    }

    /// Tracks the highest ballot heard of. When someone else's ballot overtakes ours, whatever
    /// we were coordinating (and our own undecided requests) is handed to the new coordinator.
    fn observe_ballot(&mut self, ballot: Ballot) -> Vec<Outgoing> {
        if ballot <= self.highest_seen {
            return Vec::new();
        }
        self.highest_seen = ballot;
        let handed_back = self.coordinator.step_down(ballot);

        let leader = ballot.coordinator();
        if leader == self.config.me {
            return Vec::new();
        }
        handed_back
            .into_iter()
            .chain(self.pending.values().map(|p| p.payload.clone()))
            .map(|payload| Outgoing::to(Destination::Node(leader), PeerMessage::Forward { payload }))
            .collect()
    }

    fn record_decision(&mut self, slot: Slot, payload: Bytes) {
        self.coordinator.forget_decided(slot);
        match self.log.record_decision(slot, payload) {
            DecisionOutcome::New => slog::debug!(self.logger, "Decided slot {:?}", slot),
            DecisionOutcome::WindowFull => {
                slog::debug!(self.logger, "Slot {:?} beyond the decided window, sync will bring it back", slot)
            }
            DecisionOutcome::Duplicate | DecisionOutcome::Stale => {}
        }
    }

    fn may_request_checkpoint(&mut self, now: Instant) -> bool {
        let due = self
            .last_checkpoint_request
            .map_or(true, |last| now.saturating_duration_since(last) >= self.config.coordinator_timeout);
        if due {
            self.last_checkpoint_request = Some(now);
        }
        due
    }

    fn deadline(&self, now: Instant) -> Instant {
        let timeout = self.config.coordinator_timeout;
        let jitter_ms = rand::thread_rng().gen_range(0..=(timeout.as_millis() as u64 / 2));
        now + timeout + Duration::from_millis(jitter_ms)
    }
}

fn validate(config: &InstanceConfig) -> Result<Ballot, InvalidInstanceConfig> {
    let initial = Ballot::initial(&config.members).ok_or(InvalidInstanceConfig::NoMembers)?;
    if !config.members.contains(&config.me) {
        return Err(InvalidInstanceConfig::NotAMember(config.me));
    }
    Ok(initial)
}

fn quorum(members: &BTreeSet<NodeId>) -> usize {
    members.len() / 2 + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Epoch;
    use crate::semantics::{UpdateArgs, UpdateOperation};
    use std::collections::VecDeque;

    struct Cluster {
        nodes: BTreeMap<NodeId, PaxosInstance>,
        down: BTreeSet<NodeId>,
        now: Instant,
    }

    impl Cluster {
        fn new(ids: &[u32]) -> Self {
            let members: BTreeSet<NodeId> = ids.iter().map(|id| NodeId(*id)).collect();
            let nodes = members
                .iter()
                .map(|me| (*me, PaxosInstance::new(logger(), config(*me, &members)).unwrap()))
                .collect();
            Cluster {
                nodes,
                down: BTreeSet::new(),
                now: Instant::now(),
            }
        }

        fn node(&mut self, id: u32) -> &mut PaxosInstance {
            self.nodes.get_mut(&NodeId(id)).unwrap()
        }

        fn propose(&mut self, id: u32, field: &str) -> RequestId {
            let now = self.now;
            let (request_id, out) = self.node(id).propose(update(field), now).unwrap();
            self.deliver(NodeId(id), out);
            request_id
        }

        fn tick_all(&mut self) {
            let now = self.now;
            let ids: Vec<NodeId> = self.nodes.keys().copied().collect();
            for id in ids {
                if self.down.contains(&id) {
                    continue;
                }
                let out = self.nodes.get_mut(&id).unwrap().tick(now);
                self.deliver(id, out);
            }
        }

        fn deliver(&mut self, from: NodeId, out: Vec<Outgoing>) {
            let mut queue: VecDeque<(NodeId, NodeId, PeerMessage)> = VecDeque::new();
            self.expand(from, out, &mut queue);
            while let Some((from, to, body)) = queue.pop_front() {
                if self.down.contains(&from) || self.down.contains(&to) {
                    continue;
                }
                let now = self.now;
                let more = self.nodes.get_mut(&to).unwrap().handle_message(from, body, now);
                self.expand(to, more, &mut queue);
            }
        }

        fn expand(&self, from: NodeId, out: Vec<Outgoing>, queue: &mut VecDeque<(NodeId, NodeId, PeerMessage)>) {
            for outgoing in out {
                let targets: Vec<NodeId> = match outgoing.to {
                    Destination::All => self.nodes.keys().copied().collect(),
                    Destination::Peers => self.nodes.keys().copied().filter(|n| *n != from).collect(),
                    Destination::Node(n) => vec![n],
                };
                for to in targets {
                    queue.push_back((from, to, outgoing.body.clone()));
                }
            }
        }

        /// Executes whatever is executable and returns the fields updated, per node.
        fn execute(&mut self, id: u32) -> Vec<String> {
            let node = self.node(id);
            let mut fields = Vec::new();
            while let Some((slot, payload)) = node.next_executable() {
                let request = Request::decode(&payload).unwrap();
                if !node.is_duplicate(&request.id) {
                    if let RequestBody::Update { field, .. } = request.body {
                        fields.push(field);
                    }
                }
                node.mark_executed(slot, request.id);
            }
            fields
        }
    }

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn config(me: NodeId, members: &BTreeSet<NodeId>) -> InstanceConfig {
        InstanceConfig {
            me,
            group: GroupId::new("alice", Epoch::initial()),
            members: members.clone(),
            decided_window: 128,
            catch_up_threshold: 32,
            coordinator_timeout: Duration::from_millis(100),
        }
    }

    fn update(field: &str) -> RequestBody {
        RequestBody::Update {
            field: field.to_string(),
            operation: UpdateOperation::AppendOrCreate,
            args: UpdateArgs::with_values(vec!["v".to_string()]),
        }
    }

    #[test]
    fn proposals_from_any_member_get_decided_everywhere() {
        let mut cluster = Cluster::new(&[1, 2, 3]);
        cluster.propose(1, "a");
        cluster.propose(3, "b");

        for id in 1..=3 {
            assert_eq!(cluster.execute(id), vec!["a".to_string(), "b".to_string()]);
            assert_eq!(cluster.node(id).status().coordinator, NodeId(1));
        }
    }

    #[test]
    fn silent_coordinator_gets_replaced() {
        let mut cluster = Cluster::new(&[1, 2, 3]);
        cluster.propose(1, "a");
        cluster.down.insert(NodeId(1));

        cluster.propose(2, "b");
        assert_eq!(cluster.execute(2), vec!["a".to_string()]);

        cluster.now += Duration::from_secs(1);
        cluster.tick_all();

        assert_eq!(cluster.execute(2), vec!["b".to_string()]);
        assert_eq!(cluster.execute(3), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(cluster.node(3).status().coordinator, NodeId(2));
    }

    #[test]
    fn lost_decisions_come_back_through_sync() {
        let mut cluster = Cluster::new(&[1, 2, 3]);
        cluster.down.insert(NodeId(3));
        cluster.propose(1, "a");
        cluster.propose(1, "b");
        assert!(cluster.execute(3).is_empty());

        cluster.down.clear();
        cluster.tick_all();

        assert_eq!(cluster.execute(3), vec!["a".to_string(), "b".to_string()]);
        let status = cluster.node(3).status();
        assert_eq!(status.max_decided, Some(Slot::new(1)));
        assert_eq!(status.executed, Some(Slot::new(1)));
    }

    #[test]
    fn stopped_instances_refuse_and_abandon_pending() {
        let mut cluster = Cluster::new(&[1, 2, 3]);
        cluster.down.insert(NodeId(1));
        let stuck = cluster.propose(2, "a");

        let abandoned = cluster.node(2).mark_stopped();
        assert_eq!(abandoned, vec![stuck]);
        assert!(cluster.node(2).propose(update("b"), Instant::now()).is_none());
        assert!(cluster.node(2).next_executable().is_none());
    }

    #[test]
    fn resumed_instance_keeps_sequence_and_votes() {
        let mut cluster = Cluster::new(&[1, 2, 3]);
        let first = cluster.propose(2, "a");
        cluster.execute(2);

        let checkpoint = cluster.node(2).checkpoint();
        let members = cluster.node(2).members().clone();
        let mut resumed = PaxosInstance::from_checkpoint(logger(), config(NodeId(2), &members), checkpoint).unwrap();

        assert!(resumed.is_duplicate(&first));
        assert!(resumed.is_quiescent());
        let (second, _) = resumed.propose(update("b"), Instant::now()).unwrap();
        assert!(second.seq_no > first.seq_no);
        assert_eq!(resumed.status().executed, Some(Slot::new(0)));
    }

    #[test]
    fn catching_up_waits_for_transfer() {
        let mut cluster = Cluster::new(&[1, 2, 3]);
        cluster.propose(1, "a");
        cluster.propose(1, "b");
        cluster.execute(1);

        let members = cluster.node(1).members().clone();
        let mut fresh = PaxosInstance::new_catching_up(logger(), config(NodeId(3), &members)).unwrap();
        assert!(fresh.next_executable().is_none());
        assert!(fresh.tick(Instant::now()).iter().any(|o| matches!(o.body, PeerMessage::CheckpointRequest)));

        let transfer = cluster.node(1).state_transfer(ValuesMap::new());
        assert!(fresh.wants_transfer(&transfer));
        fresh.install_transfer(transfer);

        assert_eq!(fresh.status().executed, Some(Slot::new(1)));
        assert!(!fresh.status().catching_up);
    }

    #[test]
    fn catching_up_instance_casts_no_votes() {
        let members: BTreeSet<NodeId> = [1, 2, 3].iter().map(|id| NodeId(*id)).collect();
        let mut fresh = PaxosInstance::new_catching_up(logger(), config(NodeId(3), &members)).unwrap();
        let now = Instant::now();
        let ballot = Ballot::initial(&members).unwrap();

        let prepare = PeerMessage::Prepare {
            ballot,
            first_undecided: Slot::new(0),
        };
        let accept = PeerMessage::Accept {
            ballot,
            slot: Slot::new(0),
            payload: Request {
                id: RequestId {
                    origin: NodeId(1),
                    seq_no: 0,
                },
                body: update("a"),
            }
            .encode(),
        };
        let mut out = fresh.handle_message(NodeId(1), prepare, now);
        out.extend(fresh.handle_message(NodeId(1), accept.clone(), now));
        assert!(!out
            .iter()
            .any(|o| matches!(o.body, PeerMessage::Promise { .. } | PeerMessage::Accepted { .. })));

        let mut cluster = Cluster::new(&[1, 2, 3]);
        let transfer = cluster.node(1).state_transfer(ValuesMap::new());
        fresh.install_transfer(transfer);

        let out = fresh.handle_message(NodeId(1), accept, now);
        assert!(out.iter().any(|o| matches!(o.body, PeerMessage::Accepted { .. })));
    }
}
