use crate::error::{Result, TombolaError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tick_interval: Duration,
    /// Delay after creation before the announcement post is locked. Also the
    /// window during which the owner may still edit the lottery.
    pub post_lock_delay: Duration,
    pub winner_notification_delay: Duration,
    /// Global floor applied to every lottery's `min_participants`.
    pub min_participants_floor: u32,
    pub cleanup: CleanupPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupPolicy {
    pub enabled: bool,
    pub retention: Duration,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            retention: Duration::from_secs(365 * 24 * 3600), // 1 year
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            post_lock_delay: Duration::from_secs(30 * 60),
            winner_notification_delay: Duration::ZERO,
            min_participants_floor: 1,
            cleanup: CleanupPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(TombolaError::config("tick_interval must be greater than zero"));
        }

        if self.min_participants_floor == 0 {
            return Err(TombolaError::config(
                "min_participants_floor must be at least 1",
            ));
        }

        if self.cleanup.enabled && self.cleanup.retention.is_zero() {
            return Err(TombolaError::config(
                "cleanup retention must be greater than zero when cleanup is enabled",
            ));
        }

        Ok(())
    }
}
