//! Fleet status summarizer
//!
//! Collapses every per-environment timeline of a stack into one verdict. The
//! rules are evaluated in order and the first match wins:
//!
//! 1. no targeted environments: `Unavailable`
//! 2. no environment has reported yet: `Deploying`
//! 3. every latest event is `Error`: `Failed`
//! 4. any timeline contains `PausedDeploying`: `Paused`
//! 5. fewer environments reported than are targeted: `Deploying`
//! 6. latest events mix `Running` and `Error` without `Deploying`: `PartiallyRunning`
//! 7. every latest event is `Completed`: `Completed`
//! 8. every latest event is `Running`: `Running`
//! 9. anything else: `Deploying`

use serde::{Deserialize, Serialize};

use crate::model::{EdgeStackStatus, StatusType};

/// Single status of a stack across its fleet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FleetVerdict {
    Unavailable,
    Deploying,
    Failed,
    Paused,
    PartiallyRunning,
    Completed,
    Running,
}

impl FleetVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            FleetVerdict::Unavailable => "Unavailable",
            FleetVerdict::Deploying => "Deploying",
            FleetVerdict::Failed => "Failed",
            FleetVerdict::Paused => "Paused",
            FleetVerdict::PartiallyRunning => "PartiallyRunning",
            FleetVerdict::Completed => "Completed",
            FleetVerdict::Running => "Running",
        }
    }
}

impl std::fmt::Display for FleetVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Verdict plus a human-readable reason
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetSummary {
    pub verdict: FleetVerdict,
    pub reason: String,
}

impl FleetSummary {
    fn new(verdict: FleetVerdict, reason: impl Into<String>) -> Self {
        Self {
            verdict,
            reason: reason.into(),
        }
    }
}

/// Summarize the timelines of one stack
pub fn summarize(statuses: &[EdgeStackStatus], num_deployments: u32) -> FleetSummary {
    if num_deployments == 0 {
        return FleetSummary::new(FleetVerdict::Unavailable, "Your edge stack is currently unavailable");
    }

    let last_per_env: Vec<StatusType> = statuses
        .iter()
        .filter_map(|s| s.last_event().map(|e| e.status_type))
        .collect();

    if last_per_env.is_empty() {
        return FleetSummary::new(FleetVerdict::Deploying, "Your edge stack is currently deploying");
    }

    let all = |status_type: StatusType| last_per_env.iter().all(|s| *s == status_type);
    let any = |status_type: StatusType| last_per_env.contains(&status_type);

    if all(StatusType::Error) {
        return FleetSummary::new(FleetVerdict::Failed, "Your edge stack failed to deploy");
    }

    if statuses
        .iter()
        .any(|s| s.has_event(StatusType::PausedDeploying))
    {
        return FleetSummary::new(FleetVerdict::Paused, "Your edge stack deployment is paused");
    }

    if (last_per_env.len() as u64) < num_deployments as u64 {
        return FleetSummary::new(
            FleetVerdict::Deploying,
            format!(
                "{} of {} environments have reported",
                last_per_env.len(),
                num_deployments
            ),
        );
    }

    if any(StatusType::Running) && any(StatusType::Error) && !any(StatusType::Deploying) {
        return FleetSummary::new(
            FleetVerdict::PartiallyRunning,
            "Your edge stack is running on some environments and failed on others",
        );
    }

    if all(StatusType::Completed) {
        return FleetSummary::new(FleetVerdict::Completed, "Your edge stack has completed");
    }

    if all(StatusType::Running) {
        return FleetSummary::new(FleetVerdict::Running, "Your edge stack is running");
    }

    FleetSummary::new(FleetVerdict::Deploying, "Your edge stack is currently deploying")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeploymentStatusEvent;
    use flotilla_common::{EdgeStackId, EnvironmentId};

    fn timeline(env: u32, events: &[StatusType]) -> EdgeStackStatus {
        let mut status = EdgeStackStatus::new(EdgeStackId::new(1), EnvironmentId::new(env));
        status.status = events
            .iter()
            .enumerate()
            .map(|(i, status_type)| DeploymentStatusEvent {
                time: i as i64,
                status_type: *status_type,
                error: None,
                version: 1,
            })
            .collect();
        status
    }

    #[test]
    fn test_no_deployments_is_unavailable() {
        let statuses = vec![timeline(1, &[StatusType::Running])];
        assert_eq!(summarize(&statuses, 0).verdict, FleetVerdict::Unavailable);
    }

    #[test]
    fn test_no_reports_is_deploying() {
        let statuses = vec![timeline(1, &[]), timeline(2, &[])];
        assert_eq!(summarize(&statuses, 2).verdict, FleetVerdict::Deploying);
    }

    #[test]
    fn test_all_errors_fail_even_when_incomplete() {
        let statuses = vec![timeline(1, &[StatusType::Error]), timeline(2, &[])];
        assert_eq!(summarize(&statuses, 2).verdict, FleetVerdict::Failed);
    }

    #[test]
    fn test_paused_anywhere_in_timeline() {
        let statuses = vec![
            timeline(1, &[StatusType::PausedDeploying, StatusType::Running]),
            timeline(2, &[StatusType::Running]),
        ];
        assert_eq!(summarize(&statuses, 2).verdict, FleetVerdict::Paused);
    }

    #[test]
    fn test_missing_reports_keep_deploying() {
        let statuses = vec![timeline(1, &[StatusType::Running])];
        let summary = summarize(&statuses, 2);
        assert_eq!(summary.verdict, FleetVerdict::Deploying);
        assert_eq!(summary.reason, "1 of 2 environments have reported");
    }

    #[test]
    fn test_running_and_error_is_partial() {
        let statuses = vec![
            timeline(1, &[StatusType::Running]),
            timeline(2, &[StatusType::Error]),
        ];
        assert_eq!(summarize(&statuses, 2).verdict, FleetVerdict::PartiallyRunning);

        let with_deploying = vec![
            timeline(1, &[StatusType::Running]),
            timeline(2, &[StatusType::Error]),
            timeline(3, &[StatusType::Deploying]),
        ];
        assert_eq!(summarize(&with_deploying, 3).verdict, FleetVerdict::Deploying);
    }

    #[test]
    fn test_single_environment_running() {
        // Deploying, Running, then a duplicate Running that never lands
        let statuses = vec![timeline(1, &[StatusType::Deploying, StatusType::Running])];
        assert_eq!(summarize(&statuses, 1).verdict, FleetVerdict::Running);
    }

    #[test]
    fn test_completed_and_error_falls_through() {
        let statuses = vec![
            timeline(1, &[StatusType::Completed]),
            timeline(2, &[StatusType::Error]),
        ];
        assert_eq!(summarize(&statuses, 2).verdict, FleetVerdict::Deploying);
    }

    #[test]
    fn test_all_completed() {
        let statuses = vec![
            timeline(1, &[StatusType::Running, StatusType::Completed]),
            timeline(2, &[StatusType::Completed]),
        ];
        assert_eq!(summarize(&statuses, 2).verdict, FleetVerdict::Completed);
    }

    mod proptest_summary {
        use super::*;
        use proptest::prelude::*;

        fn status_type() -> impl Strategy<Value = StatusType> {
            prop::sample::select(StatusType::ALL.to_vec())
        }

        fn timelines() -> impl Strategy<Value = Vec<Vec<StatusType>>> {
            prop::collection::vec(prop::collection::vec(status_type(), 0..5), 0..8)
        }

        proptest! {
            /// Same input always yields the same verdict and reason
            #[test]
            fn summarize_is_deterministic(events in timelines(), num in 0u32..10) {
                let statuses: Vec<_> = events
                    .iter()
                    .enumerate()
                    .map(|(i, e)| timeline(i as u32 + 1, e))
                    .collect();
                prop_assert_eq!(summarize(&statuses, num), summarize(&statuses, num));
            }

            /// Zero deployments is Unavailable whatever was reported
            #[test]
            fn zero_deployments_is_always_unavailable(events in timelines()) {
                let statuses: Vec<_> = events
                    .iter()
                    .enumerate()
                    .map(|(i, e)| timeline(i as u32 + 1, e))
                    .collect();
                prop_assert_eq!(summarize(&statuses, 0).verdict, FleetVerdict::Unavailable);
            }

            /// Completed and Running verdicts require every latest event to agree
            #[test]
            fn uniform_verdicts_require_agreement(events in timelines(), num in 1u32..10) {
                let statuses: Vec<_> = events
                    .iter()
                    .enumerate()
                    .map(|(i, e)| timeline(i as u32 + 1, e))
                    .collect();
                let summary = summarize(&statuses, num);
                let expected = match summary.verdict {
                    FleetVerdict::Completed => Some(StatusType::Completed),
                    FleetVerdict::Running => Some(StatusType::Running),
                    _ => None,
                };
                if let Some(expected) = expected {
                    prop_assert!(statuses
                        .iter()
                        .filter_map(|s| s.last_event())
                        .all(|e| e.status_type == expected));
                }
                prop_assert!(!summary.reason.is_empty());
            }
        }
    }
}
