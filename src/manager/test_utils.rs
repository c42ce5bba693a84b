use crate::instance::InstanceServices;
use crate::instance::LifecycleNotice;
use crate::manager::InstanceManager;
use crate::manager::ManagerConfig;
use crate::record::InMemoryRecordStore;
use crate::record::NodeId;
use crate::time::{mocked_clock, MockClock, MockClockController};
use crate::transport::LocalNetwork;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub(crate) struct TestNode {
    pub(crate) manager: Arc<InstanceManager<MockClock>>,
    pub(crate) clock: MockClockController,
    pub(crate) store: Arc<InMemoryRecordStore>,
    pub(crate) services: InstanceServices,
    pub(crate) notices: mpsc::UnboundedReceiver<LifecycleNotice>,
}

pub(crate) fn test_config(me: NodeId) -> ManagerConfig {
    ManagerConfig {
        me,
        instance_capacity: 100,
        morgue_delay: Duration::from_secs(30),
        deactivation_period: Duration::from_secs(60),
        pause_enabled: true,
        hibernate_enabled: false,
        can_create_timeout: Duration::from_secs(5),
        wait_to_get_created_timeout: Duration::from_secs(2),
        disable_persistent_logging: false,
        coordinator_timeout: Duration::from_secs(3),
        decided_window: 1024,
        catch_up_threshold: 512,
    }
}

/// A manager for node `me` on its own network, driven by a mock clock. Instances of groups with
/// other members send into the void.
pub(crate) fn test_node(me: NodeId, adjust: impl FnOnce(&mut ManagerConfig)) -> TestNode {
    let mut config = test_config(me);
    adjust(&mut config);

    let store = Arc::new(InMemoryRecordStore::new());
    let (transport, _inbox) = LocalNetwork::new().join(me);
    let (notices_tx, notices) = mpsc::unbounded_channel();
    let services = InstanceServices {
        store: store.clone(),
        transport: Arc::new(transport),
        notices: notices_tx,
        sync_interval: Duration::from_millis(100),
    };
    let (clock, controller) = mocked_clock();
    let logger = slog::Logger::root(slog::Discard, slog::o!());

    TestNode {
        manager: Arc::new(InstanceManager::new(logger, config, clock, services.clone())),
        clock: controller,
        store,
        services,
        notices,
    }
}

/// Waits for the next lifecycle notice, failing the test instead of hanging.
pub(crate) async fn next_notice(notices: &mut mpsc::UnboundedReceiver<LifecycleNotice>) -> LifecycleNotice {
    tokio::time::timeout(Duration::from_secs(5), notices.recv())
        .await
        .expect("Unexpected timeout")
        .expect("Notice channel closed")
}
