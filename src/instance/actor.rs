use crate::commitlog::Request;
use crate::commitlog::RequestBody;
use crate::commitlog::RequestId;
use crate::consensus::GroupMessage;
use crate::consensus::PeerMessage;
use crate::instance::executor;
use crate::instance::executor::Executed;
use crate::instance::Destination;
use crate::instance::InstanceStatus;
use crate::instance::Outgoing;
use crate::instance::PaxosInstance;
use crate::instance::StateTransfer;
use crate::record::EpochStatus;
use crate::record::GroupId;
use crate::record::NodeId;
use crate::record::RecordState;
use crate::record::RecordStore;
use crate::transport::GroupTransport;
use bytes::Bytes;
use rand::Rng;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::error::Error;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// What an instance tells its node about itself. Sent once per event; the receiver decides what
/// happens to the instance next.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum LifecycleNotice {
    /// The epoch ended with a decided Stop and the record now belongs to the next epoch.
    Stopped {
        group: GroupId,
        previous_members: BTreeSet<NodeId>,
        next_members: BTreeSet<NodeId>,
    },
    Deleted { group: GroupId },
    /// The instance hit an unrecoverable error and exited.
    Fault { group: GroupId, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ProposeError {
    #[error("Instance is stopped, its epoch is over")]
    Stopped,
    #[error("Instance is no longer running")]
    InstanceExited,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum PauseError {
    #[error("Instance still has work in flight")]
    Busy,
    #[error("Instance is no longer running")]
    InstanceExited,
}

#[derive(Debug)]
enum Event {
    Propose(RequestBody, Callback<Executed, ProposeError>),
    Message(NodeId, PeerMessage),
    /// Exits the event loop if there is nothing in flight, handing back a checkpoint.
    Pause(Callback<Bytes, PauseError>),
    Status(oneshot::Sender<InstanceStatus>),
}

#[derive(Debug)]
struct Callback<O: Debug, E: Error>(oneshot::Sender<Result<O, E>>);

impl<O: Debug, E: Error> Callback<O, E> {
    fn send(self, message: Result<O, E>) {
        let _ = self.0.send(message);
    }
}

/// Handle to a running instance. Cheap to clone; the instance exits when cancelled, paused or
/// faulted, after which every call fails with `InstanceExited`.
#[derive(Clone)]
pub(crate) struct InstanceClient {
    sender: mpsc::Sender<Event>,
}

impl InstanceClient {
    /// Proposes `body` and waits until this replica executes it.
    pub(crate) async fn propose(&self, body: RequestBody) -> Result<Executed, ProposeError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Event::Propose(body, Callback(tx)))
            .await
            .map_err(|_| ProposeError::InstanceExited)?;

        rx.await.map_err(|_| ProposeError::InstanceExited)?
    }

    /// Returns false if the instance has exited and the message was dropped.
    pub(crate) async fn deliver(&self, from: NodeId, body: PeerMessage) -> bool {
        self.sender.send(Event::Message(from, body)).await.is_ok()
    }

    pub(crate) async fn pause(&self) -> Result<Bytes, PauseError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Event::Pause(Callback(tx)))
            .await
            .map_err(|_| PauseError::InstanceExited)?;

        rx.await.map_err(|_| PauseError::InstanceExited)?
    }

    pub(crate) async fn status(&self) -> Option<InstanceStatus> {
        let (tx, rx) = oneshot::channel();
        self.sender.send(Event::Status(tx)).await.ok()?;
        rx.await.ok()
    }
}

/// The node-wide collaborators every instance actor shares.
#[derive(Clone)]
pub(crate) struct InstanceServices {
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) transport: Arc<dyn GroupTransport>,
    pub(crate) notices: mpsc::UnboundedSender<LifecycleNotice>,
    pub(crate) sync_interval: Duration,
}

pub(crate) fn create(
    buffer_size: usize,
    logger: slog::Logger,
    instance: PaxosInstance,
    services: InstanceServices,
    cancel: CancellationToken,
) -> (InstanceClient, InstanceActor) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let client = InstanceClient { sender: tx };
    let actor = InstanceActor {
        logger,
        receiver: rx,
        instance,
        services,
        cancel,
        waiters: HashMap::new(),
    };

    (client, actor)
}

enum Flow {
    Continue,
    Exit,
}

/// InstanceActor runs one PaxosInstance as a task: it feeds it events, sends what it produces,
/// and executes its decided slots against the record store in slot order.
pub(crate) struct InstanceActor {
    logger: slog::Logger,
    receiver: mpsc::Receiver<Event>,
    instance: PaxosInstance,
    services: InstanceServices,
    cancel: CancellationToken,
    waiters: HashMap<RequestId, Callback<Executed, ProposeError>>,
}

impl InstanceActor {
    pub(crate) async fn run_event_loop(mut self) {
        let period = self.services.sync_interval;
        let stagger = rand::thread_rng().gen_range(0..=period.as_millis() as u64 / 2);
        let mut ticker = time::interval_at(Instant::now() + Duration::from_millis(stagger), period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let flow = tokio::select! {
                _ = self.cancel.cancelled() => Flow::Exit,
                event = self.receiver.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => Flow::Exit,
                },
                _ = ticker.tick() => {
                    let outgoing = self.instance.tick(Instant::now());
                    self.dispatch(outgoing).await;
                    self.execute_ready().await
                }
            };
            if let Flow::Exit = flow {
                break;
            }
        }

        slog::debug!(self.logger, "Instance event loop exited");
    }

    async fn handle_event(&mut self, event: Event) -> Flow {
        match event {
            Event::Propose(body, callback) => match self.instance.propose(body, Instant::now()) {
                Some((id, outgoing)) => {
                    self.waiters.insert(id, callback);
                    self.dispatch(outgoing).await;
                }
                None => callback.send(Err(ProposeError::Stopped)),
            },
            Event::Message(from, PeerMessage::CheckpointRequest) => self.serve_transfer(from).await,
            Event::Message(from, PeerMessage::CheckpointTransfer { transfer }) => {
                self.install_transfer(from, &transfer).await
            }
            Event::Message(from, body) => {
                let outgoing = self.instance.handle_message(from, body, Instant::now());
                self.dispatch(outgoing).await;
            }
            Event::Pause(callback) => {
                if !self.waiters.is_empty() || !self.instance.is_quiescent() {
                    callback.send(Err(PauseError::Busy));
                    return Flow::Continue;
                }
                slog::debug!(self.logger, "Pausing");
                callback.send(Ok(self.instance.checkpoint().encode()));
                return Flow::Exit;
            }
            Event::Status(tx) => {
                let _ = tx.send(self.instance.status());
            }
        }

        self.execute_ready().await
    }

    /// Executes decided slots in order until the next one is missing. A store failure leaves the
    /// slot in place; the next event or tick retries it.
    async fn execute_ready(&mut self) -> Flow {
        while let Some((slot, payload)) = self.instance.next_executable() {
            let request = match Request::decode(&payload) {
                Ok(request) => request,
                Err(e) => {
                    slog::error!(self.logger, "Malformed payload decided at slot {:?}: {}", slot, e);
                    self.notify(LifecycleNotice::Fault {
                        group: self.group().clone(),
                        reason: format!("malformed payload at slot {:?}: {}", slot, e),
                    });
                    return Flow::Exit;
                }
            };

            if self.instance.is_duplicate(&request.id) {
                slog::debug!(self.logger, "Skipping repeat of {:?} at slot {:?}", request.id, slot);
                self.instance.mark_executed(slot, request.id);
                continue;
            }

            let group = self.group().clone();
            let store = self.services.store.clone();
            let result = match executor::execute(&*store, &group, &request.body, &self.logger).await {
                Ok(result) => result,
                Err(e) => {
                    slog::warn!(self.logger, "Store failed executing slot {:?}, will retry: {}", slot, e);
                    return Flow::Continue;
                }
            };
            self.instance.mark_executed(slot, request.id);
            slog::debug!(self.logger, "Executed slot {:?}: {:?}", slot, result);

            match &result {
                Executed::Stopped { next_members } => {
                    slog::info!(self.logger, "Epoch stopped, handing off to {:?}", next_members);
                    let previous_members = self.instance.members().clone();
                    self.stop();
                    self.notify(LifecycleNotice::Stopped {
                        group,
                        previous_members,
                        next_members: next_members.clone(),
                    });
                }
                Executed::Deleted => {
                    slog::info!(self.logger, "Record deleted");
                    self.stop();
                    self.notify(LifecycleNotice::Deleted { group });
                }
                _ => {}
            }

            if let Some(callback) = self.waiters.remove(&request.id) {
                callback.send(Ok(result));
            }
        }
        Flow::Continue
    }

    fn stop(&mut self) {
        for id in self.instance.mark_stopped() {
            if let Some(callback) = self.waiters.remove(&id) {
                callback.send(Err(ProposeError::Stopped));
            }
        }
    }

    async fn serve_transfer(&mut self, to: NodeId) {
        if !self.instance.can_serve_transfer() {
            return;
        }
        let record = match self.services.store.get(self.group().name()).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                slog::warn!(self.logger, "Cannot serve state transfer to {}: {}", to, e);
                return;
            }
        };
        let values = match record.epoch_status(self.group().epoch()) {
            EpochStatus::Current => record.current_values,
            EpochStatus::Previous => record.old_values,
            EpochStatus::Unknown => return,
        };

        slog::info!(self.logger, "Sending state transfer to {}", to);
        let transfer = self.instance.state_transfer(values).encode();
        self.dispatch(vec![Outgoing {
            to: Destination::Node(to),
            body: PeerMessage::CheckpointTransfer { transfer },
        }])
        .await;
    }

    async fn install_transfer(&mut self, from: NodeId, transfer: &[u8]) {
        let transfer = match StateTransfer::decode(transfer) {
            Ok(transfer) => transfer,
            Err(e) => {
                slog::warn!(self.logger, "Dropping malformed state transfer from {}: {}", from, e);
                return;
            }
        };
        if !self.instance.wants_transfer(&transfer) {
            return;
        }

        let group = self.group().clone();
        let store = &self.services.store;
        let written = match store.get(group.name()).await {
            Ok(Some(mut record)) if record.epoch_status(group.epoch()) == EpochStatus::Current => {
                record.current_values = transfer.values.clone();
                store.compare_and_swap(group.name(), Some(group.epoch()), record).await
            }
            // The record has moved on. The transferred values are already frozen into it.
            Ok(Some(_)) => Ok(false),
            Ok(None) => {
                let record = RecordState::new(
                    group.name(),
                    group.epoch(),
                    self.instance.members().clone(),
                    transfer.values.clone(),
                );
                store.put(record).await.map(|()| true)
            }
            Err(e) => Err(e),
        };
        match written {
            Ok(true) => {}
            Ok(false) => slog::debug!(self.logger, "Record moved past {} before the transfer landed", group),
            Err(e) => {
                slog::warn!(self.logger, "Cannot install state transfer from {}: {}", from, e);
                return;
            }
        }

        for id in &transfer.recent {
            if let Some(callback) = self.waiters.remove(id) {
                callback.send(Ok(Executed::Transferred));
            }
        }
        self.instance.install_transfer(transfer);
        if self.instance.is_stopped() {
            self.stop();
        }
    }

    /// Sends `outgoing` to its destinations. Whatever is addressed to this node is handled right
    /// here, and so is what that produces in turn.
    async fn dispatch(&mut self, outgoing: Vec<Outgoing>) {
        let me = self.instance.me();
        let mut queue: VecDeque<Outgoing> = outgoing.into();

        while let Some(Outgoing { to, body }) = queue.pop_front() {
            let (local, remote): (bool, Vec<NodeId>) = match to {
                Destination::All => (true, self.peers()),
                Destination::Peers => (false, self.peers()),
                Destination::Node(node) if node == me => (true, Vec::new()),
                Destination::Node(node) => (false, vec![node]),
            };

            for node in remote {
                let message = GroupMessage {
                    group: self.group().clone(),
                    from: me,
                    body: body.clone(),
                };
                if let Err(e) = self.services.transport.send_to(node, message).await {
                    slog::debug!(self.logger, "Send failed: {}", e);
                }
            }
            if local {
                queue.extend(self.instance.handle_message(me, body, Instant::now()));
            }
        }
    }

    fn peers(&self) -> Vec<NodeId> {
        let me = self.instance.me();
        self.instance.members().iter().copied().filter(|m| *m != me).collect()
    }

    fn group(&self) -> &GroupId {
        self.instance.group()
    }

    fn notify(&self, notice: LifecycleNotice) {
        if self.services.notices.send(notice).is_err() {
            slog::warn!(self.logger, "Lifecycle notice dropped, node is shutting down");
        }
    }
}
