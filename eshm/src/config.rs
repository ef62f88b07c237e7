//! Configuration surface and timing constants.

use std::time::Duration;

use crate::error::EshmError;

/// Requested (or resolved) side of the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Owns the region: creates or takes it over, writes MASTER→SLAVE.
    Master,
    /// Attaches to an existing region, writes SLAVE→MASTER.
    Slave,
    /// Resolve at init: attach if the region exists, create otherwise.
    Auto,
}

/// What a SLAVE does when the MASTER stops heartbeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectPolicy {
    /// Stop the handle on the first staleness verdict.
    Immediately,
    /// Reattach until the reconnect bounds are exhausted.
    OnTimeout,
    /// Reattach forever; the total-wait bound is ignored.
    Never,
}

/// Heartbeat cadence.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1);

/// Liveness monitor cadence.
pub const MONITOR_INTERVAL: Duration = Duration::from_millis(10);

/// Pause between publishing a detached mapping pointer and unmapping it:
/// two heartbeat ticks plus two monitor ticks, rounded up.
pub const REATTACH_QUIESCE: Duration = Duration::from_millis(20);

/// Sleep between read poll iterations.
pub const READ_POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Timeout used by [`crate::EshmHandle::read`].
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// Flat record of everything a handle can be configured with.
///
/// [`EshmConfig::new`] materializes the documented defaults from just a
/// region name; fields are public so callers override what they need.
#[derive(Debug, Clone)]
pub struct EshmConfig {
    /// Caller-chosen region identifier (mapped to an shm object name).
    pub name: String,
    /// Requested role.
    pub role: Role,
    /// SLAVE behavior on a stale MASTER.
    pub disconnect_policy: DisconnectPolicy,
    /// Milliseconds without remote heartbeat progress before staleness.
    pub stale_threshold_ms: u32,
    /// Total reattach budget in milliseconds (0 = unbounded).
    pub reconnect_wait_ms: u32,
    /// Pause between reattach attempts in milliseconds.
    pub reconnect_retry_interval_ms: u32,
    /// Reattach attempt limit (0 = unbounded).
    pub max_reconnect_attempts: u32,
    /// Unlink the region name on destroy if this handle created it.
    pub auto_cleanup: bool,
    /// Run the heartbeat and monitor threads.
    pub use_background_tasks: bool,
}

impl EshmConfig {
    /// Defaults for the given region name: AUTO role, ON_TIMEOUT policy,
    /// 100 ms staleness threshold, 5000 ms reconnect budget, 100 ms retry
    /// interval, 50 attempts, auto-cleanup and background tasks on.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: Role::Auto,
            disconnect_policy: DisconnectPolicy::OnTimeout,
            stale_threshold_ms: 100,
            reconnect_wait_ms: 5000,
            reconnect_retry_interval_ms: 100,
            max_reconnect_attempts: 50,
            auto_cleanup: true,
            use_background_tasks: true,
        }
    }

    /// Reject configurations init cannot honor.
    pub fn validate(&self) -> Result<(), EshmError> {
        if self.name.is_empty() {
            return Err(EshmError::InvalidParam);
        }
        if self.stale_threshold_ms == 0 {
            return Err(EshmError::InvalidParam);
        }
        if self.reconnect_retry_interval_ms == 0 {
            return Err(EshmError::InvalidParam);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = EshmConfig::new("demo");
        assert_eq!(config.name, "demo");
        assert_eq!(config.role, Role::Auto);
        assert_eq!(config.disconnect_policy, DisconnectPolicy::OnTimeout);
        assert_eq!(config.stale_threshold_ms, 100);
        assert_eq!(config.reconnect_wait_ms, 5000);
        assert_eq!(config.reconnect_retry_interval_ms, 100);
        assert_eq!(config.max_reconnect_attempts, 50);
        assert!(config.auto_cleanup);
        assert!(config.use_background_tasks);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_name_is_invalid() {
        let config = EshmConfig::new("");
        assert_eq!(config.validate(), Err(EshmError::InvalidParam));
    }

    #[test]
    fn zero_intervals_are_invalid() {
        let mut config = EshmConfig::new("demo");
        config.stale_threshold_ms = 0;
        assert_eq!(config.validate(), Err(EshmError::InvalidParam));

        let mut config = EshmConfig::new("demo");
        config.reconnect_retry_interval_ms = 0;
        assert_eq!(config.validate(), Err(EshmError::InvalidParam));
    }
}
