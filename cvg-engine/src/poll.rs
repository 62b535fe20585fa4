//! Bounded polling of the analysis result store.
//!
//! Runs after the join barrier opens, inside the resumed invocation. The
//! store is eventually consistent: the analysis backend writes summaries
//! minute by minute, so the poller tolerates a bounded amount of lag and
//! nothing more. It only ever reads; dispatch never happens from here.

use std::sync::Arc;

use tracing::{debug, info};

use cvg_common::{AnalysisSummary, AppId, EngineConfig, PollError, ProviderClass, StateExecutionId};

use crate::interfaces::ResultStore;

/// What the poller found once it stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// A summary covering the expected final minute.
    Summary(AnalysisSummary),
    /// The analysis ran out of input: no summary at all, or an explicitly
    /// empty result at or past the expected minute.
    NoData,
}

/// Bounded-retry reader over the result store.
pub struct ResultPoller {
    store: Arc<dyn ResultStore>,
}

impl ResultPoller {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self { store }
    }

    /// Poll until a summary for `expected_minute` appears, the store
    /// reports no data, or the retry budget runs out.
    ///
    /// Issues at most `config.num_retries` reads and sleeps at most
    /// `num_retries - 1` times; `expected_minute` is fixed by the caller
    /// at barrier-open time and never recomputed here.
    pub async fn await_summary(
        &self,
        config: &EngineConfig,
        state_execution_id: &StateExecutionId,
        app_id: &AppId,
        provider: ProviderClass,
        expected_minute: u32,
    ) -> Result<PollOutcome, PollError> {
        for attempt in 1..=config.num_retries {
            let summary = self
                .store
                .get_summary(state_execution_id, app_id, provider)
                .await?;

            match summary {
                None => {
                    info!(
                        state_execution_id = %state_execution_id,
                        attempt,
                        "no analysis summary; nothing was recorded for this window"
                    );
                    return Ok(PollOutcome::NoData);
                }
                Some(summary) if summary.empty_result
                    && summary.analysis_minute >= expected_minute =>
                {
                    info!(
                        state_execution_id = %state_execution_id,
                        analysis_minute = summary.analysis_minute,
                        "analysis finished with an empty result"
                    );
                    return Ok(PollOutcome::NoData);
                }
                Some(summary) if summary.analysis_minute < expected_minute => {
                    debug!(
                        state_execution_id = %state_execution_id,
                        analysis_minute = summary.analysis_minute,
                        expected_minute,
                        attempt,
                        "analysis not caught up yet"
                    );
                    if attempt < config.num_retries {
                        tokio::time::sleep(config.poll_interval).await;
                    }
                }
                Some(summary) => {
                    info!(
                        state_execution_id = %state_execution_id,
                        analysis_minute = summary.analysis_minute,
                        risk = %summary.risk_level,
                        "analysis summary ready"
                    );
                    return Ok(PollOutcome::Summary(summary));
                }
            }
        }

        Err(PollError::BudgetExhausted {
            expected_minute,
            attempts: config.num_retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedStore;
    use cvg_common::RiskLevel;
    use std::time::Duration;

    fn config() -> EngineConfig {
        EngineConfig {
            poll_interval: Duration::from_millis(1),
            ..EngineConfig::default()
        }
    }

    fn summary(minute: u32, risk: RiskLevel) -> AnalysisSummary {
        AnalysisSummary {
            analysis_minute: minute,
            risk_level: risk,
            empty_result: false,
            message: String::new(),
        }
    }

    async fn poll(store: ScriptedStore, expected_minute: u32) -> Result<PollOutcome, PollError> {
        let poller = ResultPoller::new(Arc::new(store));
        poller
            .await_summary(
                &config(),
                &StateExecutionId::new("se-1"),
                &AppId::new("app-1"),
                ProviderClass::Metric,
                expected_minute,
            )
            .await
    }

    #[tokio::test]
    async fn missing_summary_is_no_data() {
        let outcome = poll(ScriptedStore::default(), 15).await.unwrap();
        assert_eq!(outcome, PollOutcome::NoData);
    }

    #[tokio::test]
    async fn empty_result_at_expected_minute_is_no_data() {
        let mut done = summary(15, RiskLevel::Low);
        done.empty_result = true;
        let store = ScriptedStore::default().with_summary(done);
        assert_eq!(poll(store, 15).await.unwrap(), PollOutcome::NoData);
    }

    #[tokio::test]
    async fn empty_result_before_expected_minute_keeps_waiting() {
        let mut early = summary(3, RiskLevel::Low);
        early.empty_result = true;
        let store = ScriptedStore::default().with_summary(early);
        // Stale empty summaries never satisfy the poller; budget runs out.
        let err = poll(store, 15).await.unwrap_err();
        assert!(matches!(err, PollError::BudgetExhausted { attempts: 5, .. }));
    }

    #[tokio::test]
    async fn stale_then_ready_summary_is_returned() {
        let store = ScriptedStore::default()
            .with_summary_sequence(vec![
                Some(summary(10, RiskLevel::Low)),
                Some(summary(15, RiskLevel::Medium)),
            ]);
        let outcome = poll(store, 15).await.unwrap();
        assert_eq!(outcome, PollOutcome::Summary(summary(15, RiskLevel::Medium)));
    }

    #[tokio::test]
    async fn budget_exhaustion_is_an_error_not_success() {
        let store = ScriptedStore::default().with_summary(summary(2, RiskLevel::Low));
        let err = poll(store, 15).await.unwrap_err();
        assert!(matches!(
            err,
            PollError::BudgetExhausted { expected_minute: 15, attempts: 5 }
        ));
    }

    #[tokio::test]
    async fn read_count_is_bounded_by_budget() {
        let store = ScriptedStore::default().with_summary(summary(1, RiskLevel::Low));
        let reads = store.summary_reads();
        let _ = poll(store, 15).await;
        assert_eq!(reads.load(std::sync::atomic::Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn summary_past_expected_minute_counts_as_ready() {
        let store = ScriptedStore::default().with_summary(summary(17, RiskLevel::High));
        let outcome = poll(store, 15).await.unwrap();
        assert_eq!(outcome, PollOutcome::Summary(summary(17, RiskLevel::High)));
    }
}
