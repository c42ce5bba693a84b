use crate::commitlog::RequestBody;
use crate::consensus::GroupMessage;
use crate::consensus::PeerMessage;
use crate::consensus::StartEpoch;
use crate::consensus::StartOutcome;
use crate::instance::Executed;
use crate::instance::LifecycleNotice;
use crate::instance::ProposeError;
use crate::manager::Access;
use crate::manager::CreateInstanceError;
use crate::manager::CreateMode;
use crate::manager::InstanceManager;
use crate::manager::InstanceState;
use crate::record::Epoch;
use crate::record::GroupId;
use crate::record::NodeId;
use crate::record::RecordState;
use crate::record::RecordStore;
use crate::time::Clock;
use crate::transport::GroupTransport;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant};

type StartReplies = mpsc::UnboundedSender<(NodeId, StartOutcome)>;

#[derive(Clone, Debug, PartialEq)]
pub struct ReconfigurationAccepted {
    pub name: String,
    pub next_epoch: Epoch,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ReconfigurationError {
    #[error("A reconfiguration of {0} is already in progress")]
    AlreadyInProgress(String),
    #[error("Record {0} not found")]
    RecordNotFound(String),
    #[error("The new member set is empty")]
    NoMembers,
    #[error("Group of {0} is unavailable")]
    GroupUnavailable(String),
    #[error("Access denied")]
    AccessDenied,
}

/// ReconfigurationCoordinator moves records from one epoch's group to the next. The old group
/// decides a Stop; every old member that executes it freezes the record in one atomic handoff,
/// retires its old instance and starts the next epoch on the new members.
pub(crate) struct ReconfigurationCoordinator<C: Clock> {
    logger: slog::Logger,
    manager: Arc<InstanceManager<C>>,
    store: Arc<dyn RecordStore>,
    transport: Arc<dyn GroupTransport>,
    request_timeout: Duration,
    in_progress: Mutex<HashSet<String>>,
    // Creations started here, waiting for the members' replies to their Start.
    pending_starts: Mutex<HashMap<GroupId, StartReplies>>,
}

impl<C: Clock> ReconfigurationCoordinator<C> {
    pub(crate) fn new(
        logger: slog::Logger,
        manager: Arc<InstanceManager<C>>,
        store: Arc<dyn RecordStore>,
        transport: Arc<dyn GroupTransport>,
        request_timeout: Duration,
    ) -> Self {
        ReconfigurationCoordinator {
            logger,
            manager,
            store,
            transport,
            request_timeout,
            in_progress: Mutex::new(HashSet::new()),
            pending_starts: Mutex::new(HashMap::new()),
        }
    }

    /// Asks the current group of `name` to hand the record off to `next_members`. Returns once
    /// this node has executed the Stop, at which point the record is at the next epoch here.
    pub(crate) async fn submit_reconfiguration(
        &self,
        name: &str,
        next_members: BTreeSet<NodeId>,
    ) -> Result<ReconfigurationAccepted, ReconfigurationError> {
        if next_members.is_empty() {
            return Err(ReconfigurationError::NoMembers);
        }
        let _in_progress = InProgress::acquire(&self.in_progress, name)?;

        let unavailable = || ReconfigurationError::GroupUnavailable(name.to_string());
        let record = match self.store.get(name).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(ReconfigurationError::RecordNotFound(name.to_string())),
            Err(e) => {
                slog::warn!(self.logger, "Cannot read {}: {}", name, e);
                return Err(unavailable());
            }
        };
        let epoch = record
            .current_epoch
            .ok_or_else(|| ReconfigurationError::RecordNotFound(name.to_string()))?;
        let group = GroupId::new(name, epoch);
        let client = self
            .manager
            .get_instance(&group, Access::Request)
            .await
            .ok_or_else(unavailable)?;

        slog::info!(self.logger, "Reconfiguring {} to {:?}", group, next_members);
        let stop = RequestBody::Stop { next_members };
        match time::timeout(self.request_timeout, client.propose(stop)).await {
            Ok(Ok(Executed::Stopped { .. })) => Ok(ReconfigurationAccepted {
                name: name.to_string(),
                next_epoch: epoch.next(),
            }),
            Ok(Ok(Executed::RecordNotFound)) => Err(ReconfigurationError::RecordNotFound(name.to_string())),
            // Another reconfiguration got decided first.
            Ok(Ok(Executed::StaleEpoch)) | Ok(Err(ProposeError::Stopped)) => {
                Err(ReconfigurationError::AlreadyInProgress(name.to_string()))
            }
            Ok(Ok(other)) => {
                slog::warn!(self.logger, "Unexpected outcome of Stop for {}: {:?}", group, other);
                Err(unavailable())
            }
            Ok(Err(ProposeError::InstanceExited)) | Err(_) => Err(unavailable()),
        }
    }

    pub(crate) async fn handle_notice(&self, notice: LifecycleNotice) {
        match notice {
            LifecycleNotice::Stopped {
                group,
                previous_members,
                next_members,
            } => self.finish_handoff(group, previous_members, next_members).await,
            LifecycleNotice::Deleted { group } => {
                self.manager.retire(&group).await;
            }
            LifecycleNotice::Fault { group, reason } => {
                if let Err(e) = self.manager.recover(&group, &reason).await {
                    slog::error!(self.logger, "Could not recreate {} after a fault: {}", group, e);
                }
            }
        }
    }

    async fn finish_handoff(&self, group: GroupId, previous_members: BTreeSet<NodeId>, next_members: BTreeSet<NodeId>) {
        let next = group.next_epoch();
        let me = self.manager.me();

        let values = match self.store.get(group.name()).await {
            Ok(Some(record)) => record.old_values_on_epoch_match(group.epoch()).cloned(),
            Ok(None) => None,
            Err(e) => {
                slog::warn!(self.logger, "Cannot read frozen values of {}: {}", group, e);
                None
            }
        };

        self.manager.retire(&group).await;

        let values = match values {
            Some(values) => values,
            None => {
                // The record already moved past the next epoch here. Whoever moved it started
                // the next group.
                slog::warn!(self.logger, "No frozen values for {}, not starting {}", group, next);
                return;
            }
        };

        if next_members.contains(&me) {
            if let Err(e) = self
                .manager
                .create_instance(next.clone(), next_members.clone(), CreateMode::Fresh)
                .await
            {
                slog::warn!(self.logger, "Failed to start {}: {}", next, e);
            }
        }

        self.send_start(
            &next,
            StartEpoch {
                members: next_members.clone(),
                previous_epoch: Some(group.epoch()),
                values,
            },
        )
        .await;
        slog::info!(
            self.logger,
            "Handed {} off from {:?} to {:?}",
            group.name(),
            previous_members,
            next_members
        );
    }

    /// Sends `start` to every member of `group` but this node.
    pub(crate) async fn send_start(&self, group: &GroupId, start: StartEpoch) {
        let me = self.manager.me();
        let others: BTreeSet<NodeId> = start.members.iter().copied().filter(|m| *m != me).collect();
        let message = GroupMessage {
            group: group.clone(),
            from: me,
            body: PeerMessage::Start(start),
        };
        if let Err(e) = self.transport.broadcast(&others, message).await {
            slog::warn!(self.logger, "Start of {} did not reach everyone: {}", group, e);
        }
    }

    /// Starts the group of a new record on `start.members` and waits, at most the request
    /// timeout, until a majority of them report it running or enough refuse that it never can.
    pub(crate) async fn start_group(&self, group: &GroupId, start: StartEpoch) -> StartOutcome {
        let me = self.manager.me();
        let members = start.members.clone();
        let majority = members.len() / 2 + 1;

        let (replies_tx, mut replies) = mpsc::unbounded_channel();
        let _pending = match PendingStart::register(&self.pending_starts, group, replies_tx) {
            Some(pending) => pending,
            None => {
                slog::warn!(self.logger, "{} is already being started from this node", group);
                return StartOutcome::Failed;
            }
        };

        let mut outcomes = BTreeMap::new();
        if members.contains(&me) {
            outcomes.insert(me, self.handle_start(me, group.clone(), start.clone()).await);
        }
        self.send_start(group, start).await;

        let deadline = Instant::now() + self.request_timeout;
        loop {
            let started = outcomes.values().filter(|o| **o == StartOutcome::Started).count();
            if started >= majority || outcomes.len() - started > members.len() - majority {
                break;
            }
            match time::timeout_at(deadline, replies.recv()).await {
                Ok(Some((from, outcome))) if members.contains(&from) => {
                    outcomes.insert(from, outcome);
                }
                Ok(Some((from, _))) => slog::warn!(self.logger, "Start reply for {} from non-member {}", group, from),
                Ok(None) | Err(_) => break,
            }
        }

        let verdict = start_verdict(&outcomes, majority);
        if verdict != StartOutcome::Started {
            slog::warn!(self.logger, "Could not start {}: {:?}", group, outcomes);
        }
        verdict
    }

    /// Handles a Start from a peer and tells it the outcome.
    pub(crate) async fn answer_start(&self, from: NodeId, group: GroupId, start: StartEpoch) {
        let outcome = self.handle_start(from, group.clone(), start).await;
        let reply = GroupMessage {
            group,
            from: self.manager.me(),
            body: PeerMessage::StartReply(outcome),
        };
        if let Err(e) = self.transport.send_to(from, reply).await {
            slog::debug!(self.logger, "Cannot answer Start from {}: {}", from, e);
        }
    }

    pub(crate) fn handle_start_reply(&self, from: NodeId, group: &GroupId, outcome: StartOutcome) {
        let pending = self.pending_starts.lock().expect("Pending starts mutex guard poison");
        match pending.get(group) {
            Some(replies) => {
                let _ = replies.send((from, outcome));
            }
            // Handoff Starts are not waited on, and a creation may have settled already.
            None => slog::debug!(self.logger, "{} answered Start of {} with {:?}", from, group, outcome),
        }
    }

    /// Starts this node's instance of `group`, writing the record first. Repeated Starts for the
    /// same group are harmless.
    pub(crate) async fn handle_start(&self, from: NodeId, group: GroupId, start: StartEpoch) -> StartOutcome {
        let me = self.manager.me();
        if !start.members.contains(&me) {
            slog::warn!(self.logger, "Got Start of {} from {} but this node is not a member", group, from);
            return StartOutcome::NotMember;
        }
        if self.manager.is_quarantined(&group) {
            slog::debug!(self.logger, "Ignoring Start of quarantined {} from {}", group, from);
            return StartOutcome::Quarantined;
        }

        let existing = match self.store.get(group.name()).await {
            Ok(existing) => existing,
            Err(e) => {
                slog::warn!(self.logger, "Cannot start {}: {}", group, e);
                return StartOutcome::Failed;
            }
        };
        let local_epoch = existing.as_ref().and_then(|record| record.current_epoch);
        if local_epoch.map_or(false, |epoch| epoch > group.epoch()) {
            slog::debug!(self.logger, "Ignoring Start of {}, record is already at {:?}", group, local_epoch);
            return StartOutcome::Exists;
        }
        if let Some(existing) = &existing {
            // A repeated creation Start carries the values the record was created with.
            if start.previous_epoch.is_none()
                && local_epoch == Some(group.epoch())
                && existing.current_values != start.values
            {
                slog::debug!(self.logger, "Ignoring Start of {}, the name is taken", group);
                return StartOutcome::Exists;
            }
        }

        if local_epoch != Some(group.epoch()) {
            let record = starting_record(&group, &start, existing.as_ref());
            let written = match existing {
                Some(_) => self.store.compare_and_swap(group.name(), local_epoch, record).await,
                None => self.store.put(record).await.map(|()| true),
            };
            match written {
                Ok(true) => slog::debug!(self.logger, "Wrote starting record of {}", group),
                Ok(false) => slog::debug!(self.logger, "Record of {} moved concurrently", group),
                Err(e) => {
                    slog::warn!(self.logger, "Cannot start {}: {}", group, e);
                    return StartOutcome::Failed;
                }
            }
        }

        if let Some(previous) = start.previous_epoch {
            let old = GroupId::new(group.name(), previous);
            match self.manager.instance_state(&old) {
                None | Some(InstanceState::Morgue) => {}
                Some(_) => {
                    self.manager.retire(&old).await;
                }
            }
        }

        match self
            .manager
            .create_instance(group.clone(), start.members, CreateMode::Fresh)
            .await
        {
            Ok(_) => StartOutcome::Started,
            Err(CreateInstanceError::Quarantined(_)) => StartOutcome::Quarantined,
            Err(CreateInstanceError::StaleEpoch { .. }) => StartOutcome::Exists,
            Err(e) => {
                slog::warn!(self.logger, "Failed to start {}: {}", group, e);
                StartOutcome::Failed
            }
        }
    }
}

/// Started with a majority behind it. Otherwise the most telling refusal.
fn start_verdict(outcomes: &BTreeMap<NodeId, StartOutcome>, majority: usize) -> StartOutcome {
    let count = |wanted: StartOutcome| outcomes.values().filter(|o| **o == wanted).count();
    if count(StartOutcome::Started) >= majority {
        StartOutcome::Started
    } else if count(StartOutcome::Quarantined) > 0 {
        StartOutcome::Quarantined
    } else if count(StartOutcome::Exists) > 0 {
        StartOutcome::Exists
    } else {
        StartOutcome::Failed
    }
}

/// The record as of the first slot of `group`. For a next epoch the values are the frozen ones,
/// so they are also the old values of the epoch before.
fn starting_record(group: &GroupId, start: &StartEpoch, existing: Option<&RecordState>) -> RecordState {
    let mut record = RecordState::new(group.name(), group.epoch(), start.members.clone(), start.values.clone());
    if let Some(previous) = start.previous_epoch {
        record.old_values = start.values.clone();
        record.previous_epoch = Some(previous);
    }
    if let Some(existing) = existing {
        record.lookup_count = existing.lookup_count;
        record.update_count = existing.update_count;
    }
    record
}

struct InProgress<'a> {
    names: &'a Mutex<HashSet<String>>,
    name: String,
}

impl<'a> InProgress<'a> {
    fn acquire(names: &'a Mutex<HashSet<String>>, name: &str) -> Result<Self, ReconfigurationError> {
        let mut guard = names.lock().expect("Reconfiguration mutex guard poison");
        if !guard.insert(name.to_string()) {
            return Err(ReconfigurationError::AlreadyInProgress(name.to_string()));
        }
        Ok(InProgress {
            names,
            name: name.to_string(),
        })
    }
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.names
            .lock()
            .expect("Reconfiguration mutex guard poison")
            .remove(&self.name);
    }
}

struct PendingStart<'a> {
    pending: &'a Mutex<HashMap<GroupId, StartReplies>>,
    group: GroupId,
}

impl<'a> PendingStart<'a> {
    fn register(
        pending: &'a Mutex<HashMap<GroupId, StartReplies>>,
        group: &GroupId,
        replies: StartReplies,
    ) -> Option<Self> {
        let mut guard = pending.lock().expect("Pending starts mutex guard poison");
        if guard.contains_key(group) {
            return None;
        }
        guard.insert(group.clone(), replies);
        Some(PendingStart {
            pending,
            group: group.clone(),
        })
    }
}

impl Drop for PendingStart<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .expect("Pending starts mutex guard poison")
            .remove(&self.group);
    }
}
