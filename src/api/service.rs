use crate::api::access_control::{AccessControl, AccessKind, AccessRequest};
use crate::api::options::ServiceOptionsValidated;
use crate::api::types::{CreateRecordError, LookupError, SubmitUpdateError, UpdateOutcome, UpdateRequest};
use crate::commitlog::RequestBody;
use crate::consensus::GroupMessage;
use crate::consensus::PeerMessage;
use crate::consensus::StartEpoch;
use crate::consensus::StartOutcome;
use crate::instance::Executed;
use crate::instance::InstanceClient;
use crate::instance::InstanceStatus;
use crate::instance::ProposeError;
use crate::manager::Access;
use crate::manager::CreateMode;
use crate::manager::InstanceManager;
use crate::manager::InstanceState;
use crate::reconfiguration::ReconfigurationAccepted;
use crate::reconfiguration::ReconfigurationCoordinator;
use crate::reconfiguration::ReconfigurationError;
use crate::record::CounterBatcher;
use crate::record::Epoch;
use crate::record::GroupId;
use crate::record::NodeId;
use crate::record::RecordState;
use crate::record::RecordStore;
use crate::semantics::ValueList;
use crate::semantics::ValuesMap;
use crate::time::RealClock;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

// A request can meet a paused instance, an epoch that ends under it and a coordinator change.
const PROPOSE_ATTEMPTS: usize = 3;

/// NameService is one node of the name service: the produced interface in front of this node's
/// consensus instances. Cheap to clone.
#[derive(Clone)]
pub struct NameService {
    inner: Arc<ServiceInner>,
}

pub(super) struct ServiceInner {
    pub(super) logger: slog::Logger,
    pub(super) me: NodeId,
    pub(super) options: ServiceOptionsValidated,
    pub(super) store: Arc<dyn RecordStore>,
    pub(super) access_control: Arc<dyn AccessControl>,
    pub(super) manager: Arc<InstanceManager<RealClock>>,
    pub(super) reconfiguration: Arc<ReconfigurationCoordinator<RealClock>>,
    pub(super) counters: CounterBatcher,
    pub(super) shutdown: CancellationToken,
}

impl NameService {
    pub(super) fn new(inner: ServiceInner) -> Self {
        NameService { inner: Arc::new(inner) }
    }

    pub fn me(&self) -> NodeId {
        self.inner.me
    }

    /// Creates `name` at its first epoch, served by `members`.
    pub async fn create_record(
        &self,
        name: &str,
        members: BTreeSet<NodeId>,
        initial_values: ValuesMap,
    ) -> Result<(), CreateRecordError> {
        if !self.authorize(AccessKind::Create, name, None, None).await {
            return Err(CreateRecordError::AccessDenied);
        }
        if members.is_empty() {
            return Err(CreateRecordError::NoMembers);
        }
        let group = GroupId::new(name, Epoch::initial());
        if self.inner.manager.is_quarantined(&group) {
            return Err(CreateRecordError::Quarantined(name.to_string()));
        }
        if self.inner.store.get(name).await?.is_some() {
            return Err(CreateRecordError::RecordExists(name.to_string()));
        }

        let start = StartEpoch {
            members: members.clone(),
            previous_epoch: None,
            values: initial_values,
        };
        match self.inner.reconfiguration.start_group(&group, start).await {
            StartOutcome::Started => {}
            StartOutcome::Quarantined => return Err(CreateRecordError::Quarantined(name.to_string())),
            StartOutcome::Exists => return Err(CreateRecordError::RecordExists(name.to_string())),
            StartOutcome::NotMember | StartOutcome::Failed => {
                return Err(CreateRecordError::GroupUnavailable(name.to_string()))
            }
        }

        slog::info!(self.inner.logger, "Created record {} on {:?}", name, members);
        Ok(())
    }

    /// Orders `request` in its record's group and returns once this node has executed it.
    pub async fn submit_update(&self, request: UpdateRequest) -> Result<UpdateOutcome, SubmitUpdateError> {
        let writer = request.writer.as_deref();
        if !self
            .authorize(AccessKind::Write, &request.name, Some(&request.field), writer)
            .await
        {
            return Err(SubmitUpdateError::AccessDenied);
        }

        let body = RequestBody::Update {
            field: request.field.clone(),
            operation: request.operation,
            args: request.args(),
        };
        let outcome = match self.propose(&request.name, body).await? {
            Executed::Applied { changed: true } | Executed::Transferred => UpdateOutcome::Changed,
            Executed::Applied { changed: false } => UpdateOutcome::Unchanged,
            Executed::FieldNotFound(field) => return Err(SubmitUpdateError::FieldNotFound(field)),
            Executed::RecordNotFound | Executed::Deleted => {
                return Err(SubmitUpdateError::RecordNotFound(request.name))
            }
            other => {
                slog::warn!(self.inner.logger, "Unexpected outcome of an update: {:?}", other);
                return Err(SubmitUpdateError::GroupUnavailable(request.name));
            }
        };

        self.inner.counters.record_update(&request.name);
        Ok(outcome)
    }

    /// Moves `name` to a new group at the next epoch.
    pub async fn submit_reconfiguration(
        &self,
        name: &str,
        next_members: BTreeSet<NodeId>,
    ) -> Result<ReconfigurationAccepted, ReconfigurationError> {
        if !self.authorize(AccessKind::Reconfigure, name, None, None).await {
            return Err(ReconfigurationError::AccessDenied);
        }
        self.inner
            .reconfiguration
            .submit_reconfiguration(name, next_members)
            .await
    }

    /// Deletes `name` through its group. Every member moves the group to the morgue once it
    /// executes the removal.
    pub async fn remove_record(&self, name: &str) -> Result<(), SubmitUpdateError> {
        if !self.authorize(AccessKind::Remove, name, None, None).await {
            return Err(SubmitUpdateError::AccessDenied);
        }
        match self.propose(name, RequestBody::Delete).await? {
            Executed::Deleted => Ok(()),
            Executed::RecordNotFound => Err(SubmitUpdateError::RecordNotFound(name.to_string())),
            other => {
                slog::warn!(self.inner.logger, "Unexpected outcome of a removal: {:?}", other);
                Err(SubmitUpdateError::GroupUnavailable(name.to_string()))
            }
        }
    }

    /// Reads one field from this node's copy of the record.
    pub async fn lookup(&self, name: &str, field: &str) -> Result<Option<ValueList>, LookupError> {
        if !self.authorize(AccessKind::Read, name, Some(field), None).await {
            return Err(LookupError::AccessDenied);
        }
        let record = self.read_record(name).await?;
        Ok(record.field(field).cloned())
    }

    pub async fn lookup_record(&self, name: &str) -> Result<RecordState, LookupError> {
        if !self.authorize(AccessKind::Read, name, None, None).await {
            return Err(LookupError::AccessDenied);
        }
        self.read_record(name).await
    }

    pub fn instance_state(&self, group: &GroupId) -> Option<InstanceState> {
        self.inner.manager.instance_state(group)
    }

    pub async fn instance_status(&self, group: &GroupId) -> Option<InstanceStatus> {
        self.inner.manager.instance_status(group).await
    }

    /// Number of group instances this node holds in memory.
    pub fn live_instances(&self) -> usize {
        self.inner.manager.live_count()
    }

    /// Inbound path for messages from other nodes.
    pub async fn handle_message(&self, message: GroupMessage) {
        let GroupMessage { group, from, body } = message;
        let body = match body {
            PeerMessage::Start(start) => return self.inner.reconfiguration.answer_start(from, group, start).await,
            PeerMessage::StartReply(outcome) => {
                return self.inner.reconfiguration.handle_start_reply(from, &group, outcome)
            }
            body => body,
        };

        let access = if body.counts_as_activity() {
            Access::Traffic
        } else {
            Access::Background
        };
        let client = match self.inner.manager.get_instance(&group, access).await {
            Some(client) => client,
            None => match self.recreate_missing(&group).await {
                Some(client) => client,
                None => {
                    slog::debug!(self.inner.logger, "Dropping message from {} for unknown {}", from, group);
                    return;
                }
            },
        };
        if !client.deliver(from, body).await {
            slog::debug!(self.inner.logger, "Instance of {} exited before taking a message", group);
        }
    }

    /// Feeds everything arriving on `inbox` to `handle_message` until shutdown. Messages are
    /// handled concurrently so one waiting on a group's creation does not hold up the rest.
    pub fn spawn_inbound(&self, mut inbox: mpsc::UnboundedReceiver<GroupMessage>) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = service.inner.shutdown.cancelled() => break,
                    message = inbox.recv() => match message {
                        Some(message) => {
                            let service = service.clone();
                            tokio::spawn(async move { service.handle_message(message).await });
                        }
                        None => break,
                    },
                }
            }
        })
    }

    /// Stops every instance and background task, then flushes the request counters.
    pub async fn shutdown(&self) {
        slog::info!(self.inner.logger, "Shutting down");
        self.inner.shutdown.cancel();
        self.inner.manager.shutdown();
        self.inner.counters.flush(&*self.inner.store, &self.inner.logger).await;
    }

    /// Writes batched lookup and update counts to the store every `counter_flush_interval`.
    pub(super) async fn run_counter_flushes(self) {
        let mut ticker = time::interval(self.inner.options.counter_flush_interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let flushed = self.inner.counters.flush(&*self.inner.store, &self.inner.logger).await;
                    if flushed > 0 {
                        slog::debug!(self.inner.logger, "Flushed counters of {} records", flushed);
                    }
                }
            }
        }
    }

    async fn propose(&self, name: &str, body: RequestBody) -> Result<Executed, SubmitUpdateError> {
        let unavailable = || SubmitUpdateError::GroupUnavailable(name.to_string());
        let not_found = || SubmitUpdateError::RecordNotFound(name.to_string());

        for _ in 0..PROPOSE_ATTEMPTS {
            let record = match self.inner.store.get(name).await {
                Ok(record) => record.ok_or_else(not_found)?,
                Err(e) => {
                    slog::warn!(self.inner.logger, "Cannot read {}: {}", name, e);
                    return Err(unavailable());
                }
            };
            let epoch = record.current_epoch.ok_or_else(not_found)?;
            if !record.members.contains(&self.inner.me) {
                return Err(unavailable());
            }

            let group = GroupId::new(name, epoch);
            let client = match self.inner.manager.get_instance(&group, Access::Request).await {
                Some(client) => client,
                None => self.recreate_missing(&group).await.ok_or_else(unavailable)?,
            };

            match time::timeout(self.inner.options.request_timeout, client.propose(body.clone())).await {
                Ok(Ok(Executed::StaleEpoch)) | Ok(Err(ProposeError::Stopped)) => {
                    slog::debug!(self.inner.logger, "Epoch of {} ended under the request, retrying", group);
                }
                Ok(Err(ProposeError::InstanceExited)) => {
                    slog::debug!(self.inner.logger, "Instance of {} exited under the request, retrying", group);
                }
                Ok(Ok(executed)) => return Ok(executed),
                Err(_) => return Err(unavailable()),
            }
        }
        Err(unavailable())
    }

    /// A request or a peer concerns a group this node should be serving but has no instance of,
    /// for example after a restart or a forced termination. Rebuilds it from the store unless it
    /// is quarantined.
    async fn recreate_missing(&self, group: &GroupId) -> Option<InstanceClient> {
        let manager = &self.inner.manager;
        if manager.is_quarantined(group) {
            return None;
        }
        let record = self.inner.store.get(group.name()).await.ok()??;
        if record.current_epoch != Some(group.epoch()) || !record.members.contains(&self.inner.me) {
            return None;
        }

        match manager
            .create_instance(group.clone(), record.members, CreateMode::Recover)
            .await
        {
            Ok(client) => Some(client),
            Err(e) => {
                slog::warn!(self.inner.logger, "Could not recreate {}: {}", group, e);
                None
            }
        }
    }

    async fn read_record(&self, name: &str) -> Result<RecordState, LookupError> {
        let record = self
            .inner
            .store
            .get(name)
            .await?
            .ok_or_else(|| LookupError::RecordNotFound(name.to_string()))?;
        self.inner.counters.record_lookup(name);
        Ok(record)
    }

    async fn authorize(&self, kind: AccessKind, name: &str, field: Option<&str>, principal: Option<&str>) -> bool {
        self.inner
            .access_control
            .authorize(AccessRequest {
                kind,
                name,
                field,
                principal,
                node: self.inner.me,
            })
            .await
    }
}
