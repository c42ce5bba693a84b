use crate::commitlog::CodecError;
use crate::instance;
use crate::instance::InstanceCheckpoint;
use crate::instance::InstanceClient;
use crate::instance::InstanceConfig;
use crate::instance::InstanceServices;
use crate::instance::InstanceStatus;
use crate::instance::InvalidInstanceConfig;
use crate::instance::PauseError;
use crate::instance::PaxosInstance;
use crate::manager::table::{ActiveEntry, Entry, InstanceState, InstanceTable, PausedEntry};
use crate::record::Epoch;
use crate::record::GroupId;
use crate::record::NodeId;
use crate::record::StoreError;
use crate::time::Clock;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::{self, Duration, Instant};
use tokio_util::sync::CancellationToken;

const INSTANCE_QUEUE_SIZE: usize = 64;

#[derive(Clone, Debug)]
pub(crate) struct ManagerConfig {
    pub(crate) me: NodeId,
    pub(crate) instance_capacity: usize,
    pub(crate) morgue_delay: Duration,
    pub(crate) deactivation_period: Duration,
    pub(crate) pause_enabled: bool,
    pub(crate) hibernate_enabled: bool,
    pub(crate) can_create_timeout: Duration,
    pub(crate) wait_to_get_created_timeout: Duration,
    pub(crate) disable_persistent_logging: bool,
    pub(crate) coordinator_timeout: Duration,
    pub(crate) decided_window: u64,
    pub(crate) catch_up_threshold: u64,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum CreateMode {
    /// A new group: empty log, initial ballot.
    Fresh,
    /// A group this node already served: from its checkpoint if one is stored, otherwise
    /// catching up from peers.
    Recover,
}

/// How a lookup treats the instance it finds.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum Access {
    /// A caller request. Counts as activity and waits for a creation in flight, or for a group
    /// not created yet.
    Request,
    /// Consensus traffic from a peer. Counts as activity.
    Traffic,
    /// Sync chatter. Wakes a paused instance but lets it go idle again.
    Background,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum CreateInstanceError {
    #[error("{0} was removed recently and is quarantined")]
    Quarantined(GroupId),
    #[error("{group} is older than epoch {current:?} already known here")]
    StaleEpoch { group: GroupId, current: Epoch },
    #[error("Invalid instance config: {0}")]
    InvalidConfig(#[from] InvalidInstanceConfig),
    #[error("Unreadable checkpoint: {0}")]
    Checkpoint(#[from] CodecError),
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("Node is shutting down")]
    ShuttingDown,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct SweepSummary {
    pub(crate) hibernated: usize,
    pub(crate) paused: usize,
    pub(crate) purged: usize,
}

enum CreateStep {
    WaitForCreation,
    WaitForOlderEpochs(Vec<GroupId>),
    Launch { paused: Option<PausedEntry>, stale: Vec<GroupId> },
}

enum LookupStep {
    Wait,
    Resume(PausedEntry),
}

/// InstanceManager owns every consensus instance on this node: it creates them, reloads paused
/// ones on demand, pauses idle ones, evicts over capacity and keeps removed groups in the morgue.
pub(crate) struct InstanceManager<C: Clock> {
    logger: slog::Logger,
    config: ManagerConfig,
    clock: C,
    services: InstanceServices,
    table: Mutex<InstanceTable>,
    // Bumped on every table change. Waiters subscribe before checking the table so no change
    // slips between the check and the wait.
    generation: watch::Sender<u64>,
    shutdown: CancellationToken,
}

impl<C: Clock> InstanceManager<C> {
    pub(crate) fn new(logger: slog::Logger, config: ManagerConfig, clock: C, services: InstanceServices) -> Self {
        let (generation, _) = watch::channel(0);
        InstanceManager {
            logger,
            config,
            clock,
            services,
            table: Mutex::new(InstanceTable::new()),
            generation,
            shutdown: CancellationToken::new(),
        }
    }

    pub(crate) fn me(&self) -> NodeId {
        self.config.me
    }

    /// Creates the instance of `group`, or returns the one already running. Waits for a
    /// concurrent creation of the same group, and for older epochs of the name to retire. A
    /// concurrent creation still unfinished after `wait_to_get_created_timeout` is taken over,
    /// and an older epoch still running after `can_create_timeout` is forcibly terminated.
    pub(crate) async fn create_instance(
        &self,
        group: GroupId,
        members: BTreeSet<NodeId>,
        mode: CreateMode,
    ) -> Result<InstanceClient, CreateInstanceError> {
        self.create(group, members, mode, false).await
    }

    async fn create(
        &self,
        group: GroupId,
        members: BTreeSet<NodeId>,
        mode: CreateMode,
        bypass_morgue: bool,
    ) -> Result<InstanceClient, CreateInstanceError> {
        let creation_deadline = Instant::now() + self.config.wait_to_get_created_timeout;
        let older_epochs_deadline = Instant::now() + self.config.can_create_timeout;

        loop {
            if self.shutdown.is_cancelled() {
                return Err(CreateInstanceError::ShuttingDown);
            }
            let mut changed = self.generation.subscribe();

            let step = {
                let mut table = self.table();
                let now = self.clock.now();
                if bypass_morgue {
                    table.exhume(&group);
                }
                if table.is_quarantined(&group, now, self.config.morgue_delay) {
                    return Err(CreateInstanceError::Quarantined(group));
                }

                match table.get_mut(&group) {
                    Some(Entry::Active(active)) => {
                        active.touch(now);
                        return Ok(active.client.clone());
                    }
                    Some(Entry::Creating) => CreateStep::WaitForCreation,
                    Some(Entry::Paused(_)) => match table.insert(group.clone(), Entry::Creating) {
                        Some(Entry::Paused(paused)) => CreateStep::Launch {
                            paused: Some(paused),
                            stale: Vec::new(),
                        },
                        _ => unreachable!("Entry checked to be paused under the same lock"),
                    },
                    None => {
                        if let Some(current) = table.highest_epoch(group.name()).filter(|e| *e > group.epoch()) {
                            return Err(CreateInstanceError::StaleEpoch { group, current });
                        }
                        let (running, stale) = table.older_epochs(&group);
                        if running.is_empty() {
                            table.insert(group.clone(), Entry::Creating);
                            CreateStep::Launch { paused: None, stale }
                        } else {
                            CreateStep::WaitForOlderEpochs(running)
                        }
                    }
                }
            };

            match step {
                CreateStep::WaitForCreation => {
                    if time::timeout_at(creation_deadline, changed.changed()).await.is_err()
                        && self.table().is_creating(&group)
                    {
                        slog::warn!(self.logger, "Creation of {} stalled, taking it over", group);
                        return self.launch(&group, members, None, mode).await;
                    }
                }
                CreateStep::WaitForOlderEpochs(running) => {
                    if Instant::now() >= older_epochs_deadline {
                        for older in running {
                            slog::error!(
                                self.logger,
                                "Epoch invariant violation: {} still running while {} is created, terminating it",
                                older,
                                group
                            );
                            self.retire(&older).await;
                        }
                    } else {
                        let _ = time::timeout_at(older_epochs_deadline, changed.changed()).await;
                    }
                }
                CreateStep::Launch { paused, stale } => {
                    for older in stale {
                        slog::info!(self.logger, "Dropping paused instance of older epoch {}", older);
                        self.retire(&older).await;
                    }
                    let (members, checkpoint, mode) = match paused {
                        Some(paused) => (paused.members, paused.checkpoint, CreateMode::Recover),
                        None => (members, None, mode),
                    };
                    return self.launch(&group, members, checkpoint, mode).await;
                }
            }
        }
    }

    /// Returns the running instance of `group`, resuming it if paused. Groups in the morgue are
    /// reported absent.
    pub(crate) async fn get_instance(&self, group: &GroupId, access: Access) -> Option<InstanceClient> {
        let deadline = Instant::now() + self.config.wait_to_get_created_timeout;

        loop {
            let mut changed = self.generation.subscribe();
            let step = {
                let mut table = self.table();
                let now = self.clock.now();
                if table.state(group, now, self.config.morgue_delay) == Some(InstanceState::Morgue) {
                    return None;
                }

                match table.get_mut(group) {
                    Some(Entry::Active(active)) => {
                        if access != Access::Background {
                            active.touch(now);
                        }
                        return Some(active.client.clone());
                    }
                    Some(Entry::Creating) => LookupStep::Wait,
                    Some(Entry::Paused(_)) => match table.insert(group.clone(), Entry::Creating) {
                        Some(Entry::Paused(paused)) => LookupStep::Resume(paused),
                        _ => unreachable!("Entry checked to be paused under the same lock"),
                    },
                    None if access == Access::Request => LookupStep::Wait,
                    None => return None,
                }
            };

            match step {
                LookupStep::Wait => {
                    if time::timeout_at(deadline, changed.changed()).await.is_err() {
                        return None;
                    }
                }
                LookupStep::Resume(paused) => {
                    let resumed = self
                        .launch(group, paused.members, paused.checkpoint, CreateMode::Recover)
                        .await;
                    return match resumed {
                        Ok(client) => Some(client),
                        Err(e) => {
                            slog::warn!(self.logger, "Failed to resume {}: {}", group, e);
                            None
                        }
                    };
                }
            }
        }
    }

    /// Builds and spawns the instance for a `Creating` entry and settles the entry.
    async fn launch(
        &self,
        group: &GroupId,
        members: BTreeSet<NodeId>,
        checkpoint: Option<Bytes>,
        mode: CreateMode,
    ) -> Result<InstanceClient, CreateInstanceError> {
        let result = self.build(group, &members, checkpoint, mode).await;

        let client = {
            let mut table = self.table();
            if !table.is_creating(group) {
                if let Ok((_, cancel)) = &result {
                    cancel.cancel();
                }
                // Either another creation took this one over and finished first, or the group
                // was retired while being built.
                return match table.get_mut(group) {
                    Some(Entry::Active(active)) => Ok(active.client.clone()),
                    _ => Err(CreateInstanceError::Quarantined(group.clone())),
                };
            }

            match result {
                Ok((client, cancel)) => {
                    table.insert(
                        group.clone(),
                        Entry::Active(ActiveEntry {
                            client: client.clone(),
                            cancel,
                            members,
                            last_activity: self.clock.now(),
                            hibernating: false,
                        }),
                    );
                    client
                }
                Err(e) => {
                    table.remove(group);
                    drop(table);
                    self.bump();
                    return Err(e);
                }
            }
        };
        self.bump();

        if let Err(e) = self.services.store.remove_checkpoint(group).await {
            slog::warn!(self.logger, "Failed to drop consumed checkpoint of {}: {}", group, e);
        }
        self.enforce_capacity(group).await;
        Ok(client)
    }

    async fn build(
        &self,
        group: &GroupId,
        members: &BTreeSet<NodeId>,
        checkpoint: Option<Bytes>,
        mode: CreateMode,
    ) -> Result<(InstanceClient, CancellationToken), CreateInstanceError> {
        let checkpoint = match (checkpoint, mode) {
            (Some(bytes), _) => Some(bytes),
            (None, CreateMode::Recover) => self.services.store.load_checkpoint(group).await?,
            (None, CreateMode::Fresh) => None,
        };

        let logger = self.logger.new(slog::o!("Group" => group.to_string()));
        let config = InstanceConfig {
            me: self.config.me,
            group: group.clone(),
            members: members.clone(),
            decided_window: self.config.decided_window,
            catch_up_threshold: self.config.catch_up_threshold,
            coordinator_timeout: self.config.coordinator_timeout,
        };
        let instance = match (checkpoint, mode) {
            (Some(bytes), _) => {
                slog::info!(logger, "Resuming from checkpoint");
                PaxosInstance::from_checkpoint(logger.clone(), config, InstanceCheckpoint::decode(&bytes)?)?
            }
            (None, CreateMode::Fresh) => {
                slog::info!(logger, "Creating instance with members {:?}", members);
                PaxosInstance::new(logger.clone(), config)?
            }
            (None, CreateMode::Recover) => {
                slog::info!(logger, "No checkpoint, catching up from peers");
                PaxosInstance::new_catching_up(logger.clone(), config)?
            }
        };

        let cancel = self.shutdown.child_token();
        let (client, actor) = instance::create(
            INSTANCE_QUEUE_SIZE,
            logger,
            instance,
            self.services.clone(),
            cancel.clone(),
        );
        tokio::spawn(actor.run_event_loop());
        Ok((client, cancel))
    }

    /// Stops the group's instance, if any, and moves the group to the morgue. Returns whether
    /// the node had an instance of it.
    pub(crate) async fn retire(&self, group: &GroupId) -> bool {
        let removed = {
            let mut table = self.table();
            let removed = table.remove(group);
            table.bury(group.clone(), self.clock.now());
            removed
        };
        self.bump();

        if let Some(Entry::Active(active)) = &removed {
            active.cancel.cancel();
        }
        if let Err(e) = self.services.store.remove_checkpoint(group).await {
            slog::warn!(self.logger, "Failed to drop checkpoint of retired {}: {}", group, e);
        }
        slog::info!(self.logger, "Moved {} to the morgue", group);
        removed.is_some()
    }

    /// Resets a faulty instance: it goes to the morgue and is immediately recreated from the
    /// store, bypassing the quarantine.
    pub(crate) async fn recover(&self, group: &GroupId, reason: &str) -> Result<(), CreateInstanceError> {
        slog::error!(self.logger, "Instance of {} faulted: {}. Recreating it", group, reason);

        let members = {
            let mut table = self.table();
            let members = match table.remove(group) {
                Some(Entry::Active(active)) => {
                    active.cancel.cancel();
                    Some(active.members)
                }
                Some(Entry::Paused(paused)) => Some(paused.members),
                _ => None,
            };
            table.bury(group.clone(), self.clock.now());
            members
        };
        self.bump();

        let members = match members {
            Some(members) => members,
            None => match self.services.store.get(group.name()).await? {
                Some(record) if record.current_epoch == Some(group.epoch()) => record.members,
                _ => {
                    slog::warn!(self.logger, "{} is gone from the store, not recreating it", group);
                    return Ok(());
                }
            },
        };

        self.create(group.clone(), members, CreateMode::Recover, true).await?;
        Ok(())
    }

    /// One deactivation pass: purges expired morgue entries, then moves instances idle for a
    /// deactivation period one stage down (ACTIVE to HIBERNATING to PAUSED).
    pub(crate) async fn sweep_once(&self) -> SweepSummary {
        let mut summary = SweepSummary::default();
        let to_pause = {
            let mut table = self.table();
            let now = self.clock.now();
            summary.purged = table.purge_morgue(now, self.config.morgue_delay);
            if !self.config.pause_enabled {
                return summary;
            }

            let mut to_pause = Vec::new();
            for (group, hibernating) in table.idle(now, self.config.deactivation_period) {
                if self.config.hibernate_enabled && !hibernating {
                    if let Some(Entry::Active(active)) = table.get_mut(&group) {
                        active.hibernating = true;
                        summary.hibernated += 1;
                        slog::debug!(self.logger, "{} is hibernating", group);
                    }
                } else {
                    to_pause.push(group);
                }
            }
            to_pause
        };

        for group in to_pause {
            if self.pause(&group).await {
                summary.paused += 1;
            }
        }
        summary
    }

    async fn pause(&self, group: &GroupId) -> bool {
        let active = {
            let mut table = self.table();
            match table.remove(group) {
                Some(Entry::Active(active)) => {
                    table.insert(group.clone(), Entry::Creating);
                    active
                }
                Some(other) => {
                    table.insert(group.clone(), other);
                    return false;
                }
                None => return false,
            }
        };

        let (settled, paused) = match active.client.pause().await {
            Ok(checkpoint) => {
                let checkpoint = if self.config.disable_persistent_logging {
                    Some(checkpoint)
                } else {
                    match self.services.store.save_checkpoint(group, checkpoint.clone()).await {
                        Ok(()) => None,
                        Err(e) => {
                            slog::warn!(self.logger, "Keeping checkpoint of {} in memory: {}", group, e);
                            Some(checkpoint)
                        }
                    }
                };
                let entry = Entry::Paused(PausedEntry {
                    members: active.members,
                    checkpoint,
                });
                (Some(entry), true)
            }
            Err(PauseError::Busy) => {
                let mut active = active;
                active.touch(self.clock.now());
                (Some(Entry::Active(active)), false)
            }
            Err(PauseError::InstanceExited) => (None, false),
        };

        {
            let mut table = self.table();
            // A retire while pausing wins.
            if table.is_creating(group) {
                match settled {
                    Some(entry) => {
                        table.insert(group.clone(), entry);
                    }
                    None => {
                        table.remove(group);
                    }
                }
            }
        }
        self.bump();

        if paused {
            slog::info!(self.logger, "Paused {}", group);
        }
        paused
    }

    async fn enforce_capacity(&self, keep: &GroupId) {
        loop {
            let victim = {
                let table = self.table();
                if table.live_count() <= self.config.instance_capacity {
                    return;
                }
                table.least_recently_active(keep)
            };
            let victim = match victim {
                Some(victim) => victim,
                None => return,
            };

            slog::info!(self.logger, "Over capacity, pausing least recently active {}", victim);
            if !self.pause(&victim).await {
                return;
            }
        }
    }

    pub(crate) fn is_quarantined(&self, group: &GroupId) -> bool {
        self.table()
            .is_quarantined(group, self.clock.now(), self.config.morgue_delay)
    }

    pub(crate) fn instance_state(&self, group: &GroupId) -> Option<InstanceState> {
        self.table().state(group, self.clock.now(), self.config.morgue_delay)
    }

    /// Consensus status of a running instance. Paused instances are not woken to answer.
    pub(crate) async fn instance_status(&self, group: &GroupId) -> Option<InstanceStatus> {
        let client = match self.table().get_mut(group) {
            Some(Entry::Active(active)) => active.client.clone(),
            _ => return None,
        };
        client.status().await
    }

    /// Instances currently held in memory, ACTIVE or HIBERNATING.
    pub(crate) fn live_count(&self) -> usize {
        self.table().live_count()
    }

    pub(crate) async fn run_deactivation_sweeps(self: Arc<Self>) {
        let mut clock = self.clock.clone();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = clock.sleep(self.config.deactivation_period) => {
                    let summary = self.sweep_once().await;
                    if summary != SweepSummary::default() {
                        slog::debug!(self.logger, "Deactivation sweep: {:?}", summary);
                    }
                }
            }
        }
    }

    /// Cancels every instance and the sweeps.
    pub(crate) fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn bump(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }

    fn table(&self) -> std::sync::MutexGuard<'_, InstanceTable> {
        self.table.lock().expect("InstanceManager table mutex guard poison")
    }
}
