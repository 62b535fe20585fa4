//! Risk-to-verdict decision and the demo short-circuit.
//!
//! Pure functions only; everything here is trivially unit-testable and the
//! gate controller is the sole caller.

use tracing::info;

use cvg_common::{AnalysisTolerance, GateStatus, RiskLevel, Verdict};

/// Reserved connector-name suffix for the scripted failing demo fixture.
pub const DEMO_FAIL_SUFFIX: &str = "dev";

/// Reserved connector-name suffix for the scripted passing demo fixture.
pub const DEMO_PASS_SUFFIX: &str = "prod";

// ── Risk Decision ────────────────────────────────────────────────────────

/// Convert an observed risk level and the configured tolerance into the
/// gate outcome.
///
/// High risk always fails. Medium risk fails unless the tolerance is
/// `High`. Low risk fails only under the strictest tolerance.
pub fn decide(risk: RiskLevel, tolerance: AnalysisTolerance) -> GateStatus {
    let failed = match risk {
        RiskLevel::High => true,
        RiskLevel::Medium => tolerance <= AnalysisTolerance::Medium,
        RiskLevel::Low => tolerance == AnalysisTolerance::Low,
    };
    if failed { GateStatus::Failed } else { GateStatus::Success }
}

/// Verdict for a window with nothing to compare.
///
/// A first-ever run has nothing to compare by construction: its data is
/// recorded as the baseline for the next deployment and the gate passes.
/// Otherwise an empty window passes by default (a canary that received no
/// traffic is not evidence of a bad deployment) unless strict verification
/// is on, in which case it fails so a silent telemetry outage cannot pose
/// as a healthy canary.
pub fn decide_no_data(strict: bool, new_baseline: bool) -> Verdict {
    if new_baseline {
        Verdict::success(
            "No previous execution to compare against. This run becomes the baseline.",
        )
    } else if strict {
        Verdict::failed("No analysis result found.")
    } else {
        Verdict::success("No data found for comparison. Check load on the nodes. Skipping analysis.")
    }
}

// ── Demo Fixtures ────────────────────────────────────────────────────────

/// Scripted outcome selected by a demo connector's name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoScript {
    Passing,
    Failing,
}

/// Detect a demo fixture from the connector name. Only meaningful when the
/// account runs in demo mode; production accounts never reach this.
pub fn demo_script(connector_name: &str) -> Option<DemoScript> {
    let name = connector_name.to_lowercase();
    if name.ends_with(DEMO_FAIL_SUFFIX) {
        Some(DemoScript::Failing)
    } else if name.ends_with(DEMO_PASS_SUFFIX) {
        Some(DemoScript::Passing)
    } else {
        None
    }
}

impl DemoScript {
    /// The scripted verdict for this fixture.
    pub fn verdict(self) -> Verdict {
        match self {
            Self::Passing => Verdict::success("Demo verification passed."),
            Self::Failing => Verdict::failed("Demo verification failed."),
        }
    }

    /// Emit the synthetic minute-by-minute activity trail a real analysis
    /// would have produced over the configured window. Log-only: nothing
    /// is dispatched and nothing is persisted.
    pub fn emit_activity_log(self, state_execution_id: &str, duration_minutes: u32) {
        for minute in 1..=duration_minutes {
            let risk = match self {
                Self::Passing => RiskLevel::Low,
                // Scripted failures ramp up mid-window for a convincing demo.
                Self::Failing if minute * 2 > duration_minutes => RiskLevel::High,
                Self::Failing => RiskLevel::Low,
            };
            info!(
                state_execution_id,
                minute, risk = %risk,
                "demo analysis minute complete"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn high_risk_always_fails() {
        for tolerance in [
            AnalysisTolerance::Low,
            AnalysisTolerance::Medium,
            AnalysisTolerance::High,
        ] {
            assert_eq!(decide(RiskLevel::High, tolerance), GateStatus::Failed);
        }
    }

    #[test]
    fn medium_risk_fails_at_medium_or_low_tolerance() {
        assert_eq!(decide(RiskLevel::Medium, AnalysisTolerance::Low), GateStatus::Failed);
        assert_eq!(decide(RiskLevel::Medium, AnalysisTolerance::Medium), GateStatus::Failed);
        assert_eq!(decide(RiskLevel::Medium, AnalysisTolerance::High), GateStatus::Success);
    }

    #[test]
    fn low_risk_fails_only_at_low_tolerance() {
        assert_eq!(decide(RiskLevel::Low, AnalysisTolerance::Low), GateStatus::Failed);
        assert_eq!(decide(RiskLevel::Low, AnalysisTolerance::Medium), GateStatus::Success);
        assert_eq!(decide(RiskLevel::Low, AnalysisTolerance::High), GateStatus::Success);
    }

    #[test]
    fn no_data_passes_unless_strict() {
        assert_eq!(decide_no_data(false, false).status, GateStatus::Success);
        assert_eq!(decide_no_data(true, false).status, GateStatus::Failed);
    }

    #[test]
    fn baseline_run_passes_even_under_strict() {
        let verdict = decide_no_data(true, true);
        assert_eq!(verdict.status, GateStatus::Success);
        assert!(verdict.message.contains("baseline"));
    }

    #[test]
    fn demo_suffixes_select_scripts() {
        assert_eq!(demo_script("appdynamics-dev"), Some(DemoScript::Failing));
        assert_eq!(demo_script("AppDynamics-PROD"), Some(DemoScript::Passing));
        assert_eq!(demo_script("appdynamics-stage"), None);
    }

    #[test]
    fn demo_verdicts_are_scripted() {
        assert_eq!(DemoScript::Passing.verdict().status, GateStatus::Success);
        assert_eq!(DemoScript::Failing.verdict().status, GateStatus::Failed);
    }

    proptest! {
        /// High risk never maps to success, whatever the tolerance.
        #[test]
        fn high_never_succeeds(tolerance in prop_oneof![
            Just(AnalysisTolerance::Low),
            Just(AnalysisTolerance::Medium),
            Just(AnalysisTolerance::High),
        ]) {
            prop_assert_eq!(decide(RiskLevel::High, tolerance), GateStatus::Failed);
        }

        /// Raising the observed risk can only move the verdict toward failure.
        #[test]
        fn verdict_is_monotone_in_risk(tolerance in prop_oneof![
            Just(AnalysisTolerance::Low),
            Just(AnalysisTolerance::Medium),
            Just(AnalysisTolerance::High),
        ]) {
            let ladder = [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High];
            let mut seen_failure = false;
            for risk in ladder {
                let failed = decide(risk, tolerance) == GateStatus::Failed;
                if seen_failure {
                    prop_assert!(failed, "a lower risk failed but {risk} passed");
                }
                seen_failure = failed;
            }
        }
    }
}
