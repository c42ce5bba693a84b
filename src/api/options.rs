use std::convert::TryFrom;
use tokio::time::Duration;

#[derive(Clone, Default)]
pub struct ServiceOptions {
    pub instance_capacity: Option<usize>,
    pub morgue_delay: Option<Duration>,
    pub deactivation_period: Option<Duration>,
    pub pause_enabled: Option<bool>,
    pub hibernate_enabled: Option<bool>,
    pub can_create_timeout: Option<Duration>,
    pub wait_to_get_created_timeout: Option<Duration>,
    /// Testing only. Pause checkpoints stay in memory instead of the record store.
    pub disable_persistent_logging: Option<bool>,
    pub sync_interval: Option<Duration>,
    pub coordinator_timeout: Option<Duration>,
    pub decided_window: Option<u64>,
    pub catch_up_threshold: Option<u64>,
    pub counter_flush_interval: Option<Duration>,
    pub request_timeout: Option<Duration>,
}

#[derive(Clone, Debug)]
pub(super) struct ServiceOptionsValidated {
    pub instance_capacity: usize,
    pub morgue_delay: Duration,
    pub deactivation_period: Duration,
    pub pause_enabled: bool,
    pub hibernate_enabled: bool,
    pub can_create_timeout: Duration,
    pub wait_to_get_created_timeout: Duration,
    pub disable_persistent_logging: bool,
    pub sync_interval: Duration,
    pub coordinator_timeout: Duration,
    pub decided_window: u64,
    pub catch_up_threshold: u64,
    pub counter_flush_interval: Duration,
    pub request_timeout: Duration,
}

impl ServiceOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.instance_capacity == 0 {
            return Err("Instance capacity must be positive");
        }
        if self.sync_interval == Duration::from_millis(0) {
            return Err("Sync interval must be positive");
        }
        if self.sync_interval >= self.coordinator_timeout {
            return Err("Sync interval must be less than the coordinator timeout");
        }
        if self.deactivation_period == Duration::from_millis(0) {
            return Err("Deactivation period must be positive");
        }
        if self.wait_to_get_created_timeout > self.can_create_timeout {
            return Err("Wait-to-get-created timeout must not exceed the can-create timeout");
        }
        if self.decided_window == 0 {
            return Err("Decided window must be positive");
        }
        if self.counter_flush_interval == Duration::from_millis(0) {
            return Err("Counter flush interval must be positive");
        }

        Ok(())
    }
}

impl TryFrom<ServiceOptions> for ServiceOptionsValidated {
    type Error = &'static str;

    fn try_from(options: ServiceOptions) -> Result<Self, Self::Error> {
        let values = ServiceOptionsValidated {
            instance_capacity: options.instance_capacity.unwrap_or(2_000_000),
            morgue_delay: options.morgue_delay.unwrap_or(Duration::from_secs(30)),
            deactivation_period: options.deactivation_period.unwrap_or(Duration::from_secs(60)),
            pause_enabled: options.pause_enabled.unwrap_or(true),
            hibernate_enabled: options.hibernate_enabled.unwrap_or(false),
            can_create_timeout: options.can_create_timeout.unwrap_or(Duration::from_secs(5)),
            wait_to_get_created_timeout: options
                .wait_to_get_created_timeout
                .unwrap_or(Duration::from_secs(2)),
            disable_persistent_logging: options.disable_persistent_logging.unwrap_or(false),
            sync_interval: options.sync_interval.unwrap_or(Duration::from_secs(1)),
            coordinator_timeout: options.coordinator_timeout.unwrap_or(Duration::from_secs(3)),
            decided_window: options.decided_window.unwrap_or(1024),
            catch_up_threshold: options.catch_up_threshold.unwrap_or(512),
            counter_flush_interval: options.counter_flush_interval.unwrap_or(Duration::from_secs(5)),
            request_timeout: options.request_timeout.unwrap_or(Duration::from_secs(10)),
        };

        values.validate()?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = ServiceOptionsValidated::try_from(ServiceOptions::default()).unwrap();
        assert_eq!(options.instance_capacity, 2_000_000);
        assert_eq!(options.morgue_delay, Duration::from_secs(30));
        assert_eq!(options.wait_to_get_created_timeout, Duration::from_secs(2));
        assert!(options.pause_enabled);
        assert!(!options.hibernate_enabled);
    }

    #[test]
    fn rejects_inconsistent_timeouts() {
        let options = ServiceOptions {
            sync_interval: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        assert!(ServiceOptionsValidated::try_from(options).is_err());

        let options = ServiceOptions {
            wait_to_get_created_timeout: Some(Duration::from_secs(10)),
            ..Default::default()
        };
        assert!(ServiceOptionsValidated::try_from(options).is_err());

        let options = ServiceOptions {
            instance_capacity: Some(0),
            ..Default::default()
        };
        assert!(ServiceOptionsValidated::try_from(options).is_err());
    }
}
