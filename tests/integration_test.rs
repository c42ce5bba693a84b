use gns_replica::{
    try_create_name_service, AccessControl, AccessKind, AccessRequest, AllowAll, CreateRecordError, Epoch, GroupId, InMemoryRecordStore, InstanceState,
    LocalNetwork, NameService, NameServiceConfig, NodeId, RecordState, ServiceOptions, SubmitUpdateError,
    UpdateOperation, UpdateOutcome, UpdateRequest, ValuesMap,
};
use std::collections::BTreeSet;
use std::error::Error;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

const RECORD: &str = "alice.example";

#[tokio::test]
async fn update_replicates_to_every_member() -> Result<(), Box<dyn Error>> {
    let cluster = Cluster::start(3, default_options()).await?;
    cluster.create(RECORD, &[1, 2, 3], "10.0.0.1").await?;

    let append = UpdateRequest::new(RECORD, "A", UpdateOperation::Append, values(&["10.0.0.2"]));
    let outcome = cluster.node(2).submit_update(append).await?;
    assert_eq!(outcome, UpdateOutcome::Changed);

    // Appending a value already present changes nothing.
    let again = UpdateRequest::new(RECORD, "A", UpdateOperation::Append, values(&["10.0.0.2"]));
    assert_eq!(cluster.node(3).submit_update(again).await?, UpdateOutcome::Unchanged);

    for id in 1..=3 {
        cluster
            .wait_for_field(id, RECORD, "A", &["10.0.0.1", "10.0.0.2"], Duration::from_secs(5))
            .await;
    }

    let status = cluster
        .node(3)
        .instance_status(&GroupId::new(RECORD, Epoch::initial()))
        .await
        .expect("Instance is running");
    assert_eq!(status.coordinator, NodeId(1));
    assert!(!status.stopped);
    assert_eq!(cluster.node(3).live_instances(), 1);

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn isolated_member_catches_up_after_healing() -> Result<(), Box<dyn Error>> {
    let cluster = Cluster::start(3, default_options()).await?;
    cluster.create(RECORD, &[1, 2, 3], "10.0.0.1").await?;

    cluster.network.isolate(NodeId(3));
    for ip in &["10.0.0.2", "10.0.0.3", "10.0.0.4"] {
        let append = UpdateRequest::new(RECORD, "A", UpdateOperation::Append, values(&[*ip]));
        cluster.node(1).submit_update(append).await?;
    }
    let expected = ["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"];
    cluster.wait_for_field(2, RECORD, "A", &expected, Duration::from_secs(5)).await;
    assert_eq!(cluster.node(3).lookup(RECORD, "A").await?, Some(values(&["10.0.0.1"])));

    cluster.network.heal(NodeId(3));
    cluster.wait_for_field(3, RECORD, "A", &expected, Duration::from_secs(10)).await;

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn reconfiguration_moves_record_to_next_members() -> Result<(), Box<dyn Error>> {
    let cluster = Cluster::start(4, default_options()).await?;
    cluster.create(RECORD, &[1, 2, 3], "10.0.0.1").await?;

    let accepted = cluster
        .node(1)
        .submit_reconfiguration(RECORD, members(&[2, 3, 4]))
        .await?;
    assert_eq!(accepted.next_epoch, Epoch::new(1));

    let record = cluster
        .wait_for_record(4, RECORD, Duration::from_secs(5), |record| {
            record.current_epoch == Some(Epoch::new(1))
        })
        .await;
    assert_eq!(record.members, members(&[2, 3, 4]));
    assert_eq!(record.previous_epoch, Some(Epoch::new(0)));

    // Node 1 left the group but keeps the frozen values of the epoch it served.
    let frozen = cluster.node(1).lookup_record(RECORD).await?;
    assert_eq!(frozen.old_values_on_epoch_match(Epoch::new(0)), Some(&single("A", "10.0.0.1")));
    cluster
        .wait_for_state(1, &GroupId::new(RECORD, Epoch::new(0)), InstanceState::Morgue, Duration::from_secs(5))
        .await;

    cluster.wait_for_active(4, &GroupId::new(RECORD, Epoch::new(1)), Duration::from_secs(5)).await;
    let append = UpdateRequest::new(RECORD, "A", UpdateOperation::Append, values(&["10.0.0.9"]));
    assert_eq!(cluster.node(4).submit_update(append).await?, UpdateOutcome::Changed);
    for id in 2..=4 {
        cluster
            .wait_for_field(id, RECORD, "A", &["10.0.0.1", "10.0.0.9"], Duration::from_secs(5))
            .await;
    }

    // The retired member neither serves the new epoch nor applies anything to the old one.
    let late = UpdateRequest::new(RECORD, "A", UpdateOperation::Append, values(&["10.0.0.66"]));
    assert_eq!(
        cluster.node(1).submit_update(late).await,
        Err(SubmitUpdateError::GroupUnavailable(RECORD.to_string()))
    );
    let frozen = cluster.node(1).lookup_record(RECORD).await?;
    assert_eq!(frozen.old_values, single("A", "10.0.0.1"));

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn restarted_member_recreates_its_instance_on_request() -> Result<(), Box<dyn Error>> {
    let options = ServiceOptions {
        wait_to_get_created_timeout: Some(Duration::from_millis(200)),
        request_timeout: Some(Duration::from_secs(2)),
        ..default_options()
    };
    let mut cluster = Cluster::start(3, options).await?;
    cluster.create(RECORD, &[1, 2, 3], "10.0.0.1").await?;
    let group = GroupId::new(RECORD, Epoch::initial());

    // Cut off from its peers, nothing but the request can bring the instance back.
    cluster.network.isolate(NodeId(3));
    cluster.restart(3).await?;
    assert_eq!(cluster.node(3).instance_state(&group), None);

    let append = UpdateRequest::new(RECORD, "A", UpdateOperation::Append, values(&["10.0.0.2"]));
    assert_eq!(
        cluster.node(3).submit_update(append).await,
        Err(SubmitUpdateError::GroupUnavailable(RECORD.to_string()))
    );
    assert_eq!(cluster.node(3).instance_state(&group), Some(InstanceState::Active));

    cluster.network.heal(NodeId(3));
    let append = UpdateRequest::new(RECORD, "A", UpdateOperation::Append, values(&["10.0.0.3"]));
    assert_eq!(cluster.node(3).submit_update(append).await?, UpdateOutcome::Changed);
    cluster
        .wait_for_record(1, RECORD, Duration::from_secs(5), |record| {
            record.field("A").map_or(false, |ips| ips.contains(&"10.0.0.3".to_string()))
        })
        .await;

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn removed_record_is_quarantined_until_morgue_delay() -> Result<(), Box<dyn Error>> {
    let options = ServiceOptions {
        morgue_delay: Some(Duration::from_millis(800)),
        ..default_options()
    };
    let cluster = Cluster::start(3, options).await?;
    cluster.create(RECORD, &[1, 2, 3], "10.0.0.1").await?;

    cluster.node(2).remove_record(RECORD).await?;
    for id in 1..=3 {
        cluster.wait_for_removal(id, RECORD, Duration::from_secs(5)).await;
    }

    let group = GroupId::new(RECORD, Epoch::initial());
    cluster
        .wait_for_state(2, &group, InstanceState::Morgue, Duration::from_secs(5))
        .await;
    let recreated = cluster
        .node(2)
        .create_record(RECORD, members(&[1, 2, 3]), single("A", "10.0.0.2"))
        .await;
    assert!(matches!(recreated, Err(CreateRecordError::Quarantined(_))));

    sleep(Duration::from_millis(1000)).await;
    cluster.create(RECORD, &[1, 2, 3], "10.0.0.2").await?;
    assert_eq!(cluster.node(3).lookup(RECORD, "A").await?, Some(values(&["10.0.0.2"])));

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn creation_through_non_member_reports_quarantine() -> Result<(), Box<dyn Error>> {
    let cluster = Cluster::start(4, default_options()).await?;
    cluster.create(RECORD, &[1, 2, 3], "10.0.0.1").await?;

    cluster.node(1).remove_record(RECORD).await?;
    let group = GroupId::new(RECORD, Epoch::initial());
    for id in 1..=3 {
        cluster.wait_for_removal(id, RECORD, Duration::from_secs(5)).await;
        cluster
            .wait_for_state(id, &group, InstanceState::Morgue, Duration::from_secs(5))
            .await;
    }

    // Node 4 never served the record, so only the members can tell it the name is quarantined.
    let recreated = cluster
        .node(4)
        .create_record(RECORD, members(&[1, 2, 3]), single("A", "10.0.0.2"))
        .await;
    assert!(matches!(recreated, Err(CreateRecordError::Quarantined(_))));
    assert!(cluster.node(2).lookup_record(RECORD).await.is_err());

    let created = cluster
        .node(4)
        .create_record("bob.example", members(&[1, 2, 3]), single("A", "10.0.0.3"))
        .await;
    assert!(created.is_ok());
    for id in 1..=3 {
        cluster
            .wait_for_field(id, "bob.example", "A", &["10.0.0.3"], Duration::from_secs(5))
            .await;
    }

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn update_of_missing_field_is_rejected() -> Result<(), Box<dyn Error>> {
    let cluster = Cluster::start(3, default_options()).await?;
    cluster.create(RECORD, &[1, 2, 3], "10.0.0.1").await?;

    let replace = UpdateRequest::new(RECORD, "AAAA", UpdateOperation::ReplaceAll, values(&["::1"]));
    assert_eq!(
        cluster.node(1).submit_update(replace).await,
        Err(SubmitUpdateError::FieldNotFound("AAAA".to_string()))
    );

    let upsert = UpdateRequest::new(RECORD, "AAAA", UpdateOperation::ReplaceAllOrCreate, values(&["::1"]));
    assert_eq!(cluster.node(1).submit_update(upsert).await?, UpdateOutcome::Changed);

    let missing = UpdateRequest::new("bob.example", "A", UpdateOperation::Append, values(&["10.0.0.1"]));
    assert_eq!(
        cluster.node(1).submit_update(missing).await,
        Err(SubmitUpdateError::RecordNotFound("bob.example".to_string()))
    );

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn access_control_vets_writers() -> Result<(), Box<dyn Error>> {
    let network = LocalNetwork::new();
    let (transport, _inbox) = network.join(NodeId(1));
    let node = try_create_name_service(NameServiceConfig {
        me: NodeId(1),
        store: Arc::new(InMemoryRecordStore::new()),
        transport: Arc::new(transport),
        access_control: Arc::new(OwnerOnly("alice")),
        info_logger: create_discard_logger(),
        options: default_options(),
    })
    .await?;
    node.create_record(RECORD, members(&[1]), single("A", "10.0.0.1")).await?;

    let by_mallory = UpdateRequest::new(RECORD, "A", UpdateOperation::Clear, vec![]).with_writer("mallory");
    assert_eq!(node.submit_update(by_mallory).await, Err(SubmitUpdateError::AccessDenied));

    let by_alice = UpdateRequest::new(RECORD, "A", UpdateOperation::Clear, vec![]).with_writer("alice");
    assert_eq!(node.submit_update(by_alice).await?, UpdateOutcome::Changed);
    assert_eq!(node.lookup(RECORD, "A").await?, Some(vec![]));

    node.shutdown().await;
    Ok(())
}

/// Anyone may read or create, only the owner may write.
struct OwnerOnly(&'static str);

#[async_trait::async_trait]
impl AccessControl for OwnerOnly {
    async fn authorize(&self, request: AccessRequest<'_>) -> bool {
        match request.kind {
            AccessKind::Write => request.principal == Some(self.0),
            _ => true,
        }
    }
}

struct Cluster {
    network: LocalNetwork,
    options: ServiceOptions,
    stores: Vec<Arc<InMemoryRecordStore>>,
    nodes: Vec<NameService>,
}

impl Cluster {
    async fn start(size: u32, options: ServiceOptions) -> Result<Self, Box<dyn Error>> {
        let mut cluster = Cluster {
            network: LocalNetwork::new(),
            options,
            stores: Vec::new(),
            nodes: Vec::new(),
        };
        for id in 1..=size {
            let store = Arc::new(InMemoryRecordStore::new());
            let node = cluster.start_node(NodeId(id), store.clone()).await?;
            cluster.stores.push(store);
            cluster.nodes.push(node);
        }
        Ok(cluster)
    }

    async fn start_node(&self, me: NodeId, store: Arc<InMemoryRecordStore>) -> Result<NameService, Box<dyn Error>> {
        let (transport, inbox) = self.network.join(me);
        let node = try_create_name_service(NameServiceConfig {
            me,
            store,
            transport: Arc::new(transport),
            access_control: Arc::new(AllowAll),
            info_logger: create_discard_logger(),
            options: self.options.clone(),
        })
        .await?;
        node.spawn_inbound(inbox);
        Ok(node)
    }

    /// Shuts node `id` down and starts it again over the same store. The new node runs no
    /// instances until something asks for them.
    async fn restart(&mut self, id: u32) -> Result<(), Box<dyn Error>> {
        let index = id as usize - 1;
        self.nodes[index].shutdown().await;
        let node = self.start_node(NodeId(id), self.stores[index].clone()).await?;
        self.nodes[index] = node;
        Ok(())
    }

    fn node(&self, id: u32) -> &NameService {
        &self.nodes[id as usize - 1]
    }

    /// Creates `name` through its first member and waits for every member's instance.
    async fn create(&self, name: &str, ids: &[u32], ip: &str) -> Result<(), Box<dyn Error>> {
        self.node(ids[0])
            .create_record(name, members(ids), single("A", ip))
            .await?;
        let group = GroupId::new(name, Epoch::initial());
        for id in ids {
            self.wait_for_active(*id, &group, Duration::from_secs(5)).await;
        }
        Ok(())
    }

    async fn wait_for_active(&self, id: u32, group: &GroupId, timeout: Duration) {
        self.wait_for_state(id, group, InstanceState::Active, timeout).await;
    }

    async fn wait_for_state(&self, id: u32, group: &GroupId, state: InstanceState, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while self.node(id).instance_state(group) != Some(state) {
            if Instant::now() > deadline {
                panic!("Node {} never moved {} to {:?}", id, group, state);
            }
            sleep(Duration::from_millis(20)).await;
        }
    }

    async fn wait_for_record(
        &self,
        id: u32,
        name: &str,
        timeout: Duration,
        condition: impl Fn(&RecordState) -> bool,
    ) -> RecordState {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(record) = self.node(id).lookup_record(name).await {
                if condition(&record) {
                    return record;
                }
            }
            if Instant::now() > deadline {
                panic!("Node {} never reached the expected state of {}", id, name);
            }
            sleep(Duration::from_millis(20)).await;
        }
    }

    async fn wait_for_field(&self, id: u32, name: &str, field: &str, expected: &[&str], timeout: Duration) {
        let expected = values(expected);
        self.wait_for_record(id, name, timeout, |record| record.field(field) == Some(&expected))
            .await;
    }

    async fn wait_for_removal(&self, id: u32, name: &str, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while self.node(id).lookup_record(name).await.is_ok() {
            if Instant::now() > deadline {
                panic!("Node {} still holds {}", id, name);
            }
            sleep(Duration::from_millis(20)).await;
        }
    }

    async fn shutdown(&self) {
        for node in &self.nodes {
            node.shutdown().await;
        }
    }
}

fn default_options() -> ServiceOptions {
    ServiceOptions {
        sync_interval: Some(Duration::from_millis(20)),
        coordinator_timeout: Some(Duration::from_millis(300)),
        request_timeout: Some(Duration::from_secs(5)),
        ..Default::default()
    }
}

fn members(ids: &[u32]) -> BTreeSet<NodeId> {
    ids.iter().copied().map(NodeId).collect()
}

fn values(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn single(field: &str, value: &str) -> ValuesMap {
    let mut map = ValuesMap::new();
    map.insert(field.to_string(), values(&[value]));
    map
}

fn create_discard_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}
