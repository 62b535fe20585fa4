//! Engine configuration.
//!
//! Batching, retry, and timeout knobs live on the engine instance rather
//! than in process-wide constants so embedders and tests can tune them.

use std::time::Duration;

use crate::analysis::ProviderClass;
use crate::errors::ConfigError;

/// Nodes per collection batch.
const DEFAULT_HOST_BATCH_SIZE: usize = 5;

/// Result-store read attempts before the poller gives up.
const DEFAULT_NUM_RETRIES: u32 = 5;

/// Delay between result-store read attempts.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Headroom added to the verification window for the overall invocation
/// timeout surfaced to the outer scheduler.
const DEFAULT_STATE_TIMEOUT_BUFFER: Duration = Duration::from_secs(150 * 60);

/// Longest configurable verification window, in minutes.
const MAX_DURATION_MINUTES: u32 = 240;

impl ProviderClass {
    /// Per-task timeout headroom for this provider class. Metric providers
    /// backfill slowly and retry aggressively; log providers return fast.
    pub fn task_timeout_buffer(self) -> Duration {
        match self {
            Self::Metric => Duration::from_secs(120 * 60),
            Self::Log => Duration::from_secs(5 * 60),
        }
    }
}

/// Tunables for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum nodes per collection batch.
    pub host_batch_size: usize,
    /// Result-store read attempts before the poller reports an error.
    pub num_retries: u32,
    /// Delay between poll attempts.
    pub poll_interval: Duration,
    /// Headroom added to the verification window for the overall timeout.
    pub state_timeout_buffer: Duration,
    /// Upper bound on the configurable verification window, in minutes.
    pub max_duration_minutes: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host_batch_size: DEFAULT_HOST_BATCH_SIZE,
            num_retries: DEFAULT_NUM_RETRIES,
            poll_interval: DEFAULT_POLL_INTERVAL,
            state_timeout_buffer: DEFAULT_STATE_TIMEOUT_BUFFER,
            max_duration_minutes: MAX_DURATION_MINUTES,
        }
    }
}

impl EngineConfig {
    /// Validate the configuration itself.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.num_retries == 0 {
            return Err(ConfigError::ZeroRetryBudget);
        }
        Ok(())
    }

    /// Validate a requested verification window against the configured cap.
    pub fn validate_duration(&self, minutes: u32) -> Result<(), ConfigError> {
        if minutes == 0 || minutes > self.max_duration_minutes {
            return Err(ConfigError::DurationOutOfRange {
                minutes,
                max: self.max_duration_minutes,
            });
        }
        Ok(())
    }

    /// Overall invocation timeout exposed to the outer scheduler:
    /// verification window plus the state buffer.
    pub fn overall_timeout(&self, duration_minutes: u32) -> Duration {
        Duration::from_secs(u64::from(duration_minutes) * 60) + self.state_timeout_buffer
    }

    /// Per-task timeout for a batch: verification window plus the provider
    /// class headroom.
    pub fn task_timeout(&self, duration_minutes: u32, buffer: Duration) -> Duration {
        Duration::from_secs(u64::from(duration_minutes) * 60) + buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.host_batch_size, 5);
        assert_eq!(config.num_retries, 5);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.max_duration_minutes, 240);
        config.validate().unwrap();
    }

    #[test]
    fn duration_cap_is_four_hours() {
        let config = EngineConfig::default();
        config.validate_duration(240).unwrap();
        let err = config.validate_duration(241).unwrap_err();
        assert!(err.to_string().contains("4 hours"), "{err}");
    }

    #[test]
    fn zero_duration_is_rejected() {
        assert!(EngineConfig::default().validate_duration(0).is_err());
    }

    #[test]
    fn overall_timeout_adds_state_buffer() {
        let config = EngineConfig::default();
        assert_eq!(
            config.overall_timeout(15),
            Duration::from_secs(15 * 60) + Duration::from_secs(150 * 60)
        );
    }

    #[test]
    fn task_timeout_buffers_differ_by_provider_class() {
        assert_eq!(
            ProviderClass::Metric.task_timeout_buffer(),
            Duration::from_secs(120 * 60)
        );
        assert_eq!(
            ProviderClass::Log.task_timeout_buffer(),
            Duration::from_secs(5 * 60)
        );
    }

    #[test]
    fn invalid_knobs_are_rejected() {
        let mut config = EngineConfig::default();
        config.host_batch_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroBatchSize)));

        let mut config = EngineConfig::default();
        config.num_retries = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroRetryBudget)));
    }
}
