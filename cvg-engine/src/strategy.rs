//! Collection cadence selection.
//!
//! Pure function of configuration: decides whether the engine dispatches
//! collection tasks itself (one shot, at gate entry) or leaves collection
//! to the external per-minute scheduler and merely waits for its notify.

use cvg_common::ComparisonStrategy;

use crate::context::FeatureFlags;
use crate::interfaces::ProviderAdapter;

/// How telemetry collection is driven for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionCadence {
    /// The engine batches and dispatches collection tasks once.
    OneShot,
    /// An external scheduler collects every minute; the engine performs no
    /// dispatch and resumes on the scheduler's notify signal.
    PerMinute,
}

/// Select the cadence for a strategy/adapter/flags combination.
///
/// Predictive analysis always needs a continuously refreshed trailing
/// window; some providers only support per-minute collection; and the
/// per-minute feature flag opts eligible providers in.
pub fn collection_cadence(
    strategy: ComparisonStrategy,
    adapter: &dyn ProviderAdapter,
    flags: &FeatureFlags,
) -> CollectionCadence {
    if strategy == ComparisonStrategy::Predictive {
        return CollectionCadence::PerMinute;
    }
    if adapter.per_minute() {
        return CollectionCadence::PerMinute;
    }
    if flags.per_minute_collection {
        return CollectionCadence::PerMinute;
    }
    CollectionCadence::OneShot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticAdapter;
    use cvg_common::ProviderClass;

    #[test]
    fn predictive_is_always_per_minute() {
        let adapter = StaticAdapter::new(ProviderClass::Metric, "appd-prod");
        assert_eq!(
            collection_cadence(
                ComparisonStrategy::Predictive,
                &adapter,
                &FeatureFlags::default()
            ),
            CollectionCadence::PerMinute
        );
    }

    #[test]
    fn per_minute_adapter_overrides_strategy() {
        let adapter = StaticAdapter::new(ProviderClass::Log, "datadog-logs").per_minute();
        assert_eq!(
            collection_cadence(
                ComparisonStrategy::CompareWithCurrent,
                &adapter,
                &FeatureFlags::default()
            ),
            CollectionCadence::PerMinute
        );
    }

    #[test]
    fn flag_opts_providers_in() {
        let adapter = StaticAdapter::new(ProviderClass::Metric, "appd-prod");
        let flags = FeatureFlags { per_minute_collection: true, ..FeatureFlags::default() };
        assert_eq!(
            collection_cadence(ComparisonStrategy::CompareWithPrevious, &adapter, &flags),
            CollectionCadence::PerMinute
        );
    }

    #[test]
    fn default_is_one_shot() {
        let adapter = StaticAdapter::new(ProviderClass::Metric, "appd-prod");
        assert_eq!(
            collection_cadence(
                ComparisonStrategy::CompareWithPrevious,
                &adapter,
                &FeatureFlags::default()
            ),
            CollectionCadence::OneShot
        );
    }
}
