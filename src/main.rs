use gns_replica::{
    try_create_name_service, AllowAll, InMemoryRecordStore, LocalNetwork, NameService, NameServiceConfig, NodeId,
    ServiceOptions, UpdateOperation, UpdateRequest, ValuesMap,
};
use slog::Drain;
use std::collections::BTreeSet;
use std::error::Error;
use std::sync::Arc;
use tokio::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let logger = create_root_logger();
    let network = LocalNetwork::new();

    let mut nodes = Vec::new();
    for id in 1..=4 {
        nodes.push(start_node(&network, NodeId(id), logger.clone()).await?);
    }

    let members: BTreeSet<NodeId> = (1..=3).map(NodeId).collect();
    let mut initial = ValuesMap::new();
    initial.insert("A".to_string(), vec!["10.0.0.1".to_string()]);
    nodes[0].create_record("helloworld", members, initial).await?;
    // Other members start their instances when the Start message reaches them.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let append = UpdateRequest::new("helloworld", "A", UpdateOperation::Append, vec!["10.0.0.2".to_string()]);
    let outcome = nodes[1].submit_update(append).await?;
    slog::info!(logger, "Append outcome: {:?}", outcome);

    let next_members: BTreeSet<NodeId> = (2..=4).map(NodeId).collect();
    let accepted = nodes[0].submit_reconfiguration("helloworld", next_members).await?;
    slog::info!(logger, "Reconfigured: {:?}", accepted);

    tokio::time::sleep(Duration::from_millis(500)).await;
    for node in &nodes {
        match node.lookup("helloworld", "A").await {
            Ok(values) => slog::info!(logger, "Node {} sees A = {:?}", node.me(), values),
            Err(e) => slog::info!(logger, "Node {} lookup failed: {}", node.me(), e),
        }
    }

    for node in &nodes {
        node.shutdown().await;
    }
    Ok(())
}

async fn start_node(network: &LocalNetwork, me: NodeId, logger: slog::Logger) -> Result<NameService, Box<dyn Error>> {
    let (transport, inbox) = network.join(me);
    let service = try_create_name_service(NameServiceConfig {
        me,
        store: Arc::new(InMemoryRecordStore::new()),
        transport: Arc::new(transport),
        access_control: Arc::new(AllowAll),
        info_logger: logger,
        options: ServiceOptions {
            sync_interval: Some(Duration::from_millis(50)),
            coordinator_timeout: Some(Duration::from_millis(500)),
            ..Default::default()
        },
    })
    .await?;
    service.spawn_inbound(inbox);
    Ok(service)
}

fn create_root_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}
