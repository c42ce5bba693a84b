use crate::api::access_control::AccessControl;
use crate::api::options::ServiceOptions;
use crate::api::options::ServiceOptionsValidated;
use crate::api::service::{NameService, ServiceInner};
use crate::instance::InstanceServices;
use crate::instance::LifecycleNotice;
use crate::manager::InstanceManager;
use crate::manager::ManagerConfig;
use crate::reconfiguration::ReconfigurationCoordinator;
use crate::record::CounterBatcher;
use crate::record::NodeId;
use crate::record::RecordStore;
use crate::time::RealClock;
use crate::transport::GroupTransport;
use std::convert::TryFrom;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct NameServiceConfig {
    pub me: NodeId,
    pub store: Arc<dyn RecordStore>,
    pub transport: Arc<dyn GroupTransport>,
    pub access_control: Arc<dyn AccessControl>,
    pub info_logger: slog::Logger,
    pub options: ServiceOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum NameServiceCreationError {
    #[error("Illegal options for configuring the name service: {0}")]
    IllegalOptions(String),
}

/// Builds one node of the name service and spawns its background tasks: lifecycle notice
/// handling, deactivation sweeps and counter flushes. Inbound messages are fed through
/// `NameService::handle_message` or `NameService::spawn_inbound`.
pub async fn try_create_name_service(config: NameServiceConfig) -> Result<NameService, NameServiceCreationError> {
    let root_logger = config.info_logger.new(slog::o!("Node" => config.me.as_u32()));

    let options = ServiceOptionsValidated::try_from(config.options)
        .map_err(|e| NameServiceCreationError::IllegalOptions(e.to_string()))?;

    let (notices_tx, notices_rx) = mpsc::unbounded_channel();
    let services = InstanceServices {
        store: config.store.clone(),
        transport: config.transport.clone(),
        notices: notices_tx,
        sync_interval: options.sync_interval,
    };

    let manager = Arc::new(InstanceManager::new(
        root_logger.clone(),
        manager_config(config.me, &options),
        RealClock,
        services,
    ));
    let reconfiguration = Arc::new(ReconfigurationCoordinator::new(
        root_logger.clone(),
        manager.clone(),
        config.store.clone(),
        config.transport,
        options.request_timeout,
    ));

    let shutdown = CancellationToken::new();
    tokio::spawn(run_notice_loop(
        notices_rx,
        reconfiguration.clone(),
        shutdown.child_token(),
    ));
    tokio::spawn(manager.clone().run_deactivation_sweeps());

    let service = NameService::new(ServiceInner {
        logger: root_logger.clone(),
        me: config.me,
        options,
        store: config.store,
        access_control: config.access_control,
        manager,
        reconfiguration,
        counters: CounterBatcher::new(),
        shutdown,
    });
    tokio::spawn(service.clone().run_counter_flushes());

    slog::info!(root_logger, "Name service node {} is up", config.me);
    Ok(service)
}

fn manager_config(me: NodeId, options: &ServiceOptionsValidated) -> ManagerConfig {
    ManagerConfig {
        me,
        instance_capacity: options.instance_capacity,
        morgue_delay: options.morgue_delay,
        deactivation_period: options.deactivation_period,
        pause_enabled: options.pause_enabled,
        hibernate_enabled: options.hibernate_enabled,
        can_create_timeout: options.can_create_timeout,
        wait_to_get_created_timeout: options.wait_to_get_created_timeout,
        disable_persistent_logging: options.disable_persistent_logging,
        coordinator_timeout: options.coordinator_timeout,
        decided_window: options.decided_window,
        catch_up_threshold: options.catch_up_threshold,
    }
}

// Each notice gets its own task: a handoff waits on instance creation, which may itself wait on
// the retirement that another notice triggers.
async fn run_notice_loop(
    mut notices: mpsc::UnboundedReceiver<LifecycleNotice>,
    reconfiguration: Arc<ReconfigurationCoordinator<RealClock>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            notice = notices.recv() => match notice {
                Some(notice) => {
                    let reconfiguration = reconfiguration.clone();
                    tokio::spawn(async move { reconfiguration.handle_notice(notice).await });
                }
                None => break,
            },
        }
    }
}
