//! Agent status reports
//!
//! A report is checked in a fixed order: the environment exists, the agent
//! may speak for it, the error message matches the status type, the stack and
//! its status record for the environment exist. Only then is it version-gated
//! and applied to the timeline. Reports never create records.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use flotilla_common::{EdgeStackId, EnvironmentId, FlotillaError, FlotillaResult};
use flotilla_persistence::Transaction;

use crate::environment::EnvironmentStore;
use crate::model::{DeploymentInfo, DeploymentStatusEvent, Environment, EventOutcome, StatusType};
use crate::stack_store::EdgeStackStore;
use crate::status::{EdgeStackStatusStore, is_stale_report};

/// Decides whether an agent may report for an environment
pub trait AgentAuthorizer: Send + Sync {
    fn authorize(&self, environment: &Environment, agent_identity: &str) -> FlotillaResult<()>;
}

/// Accepts agents presenting the environment's edge identifier
#[derive(Clone, Copy, Debug, Default)]
pub struct EdgeIdAuthorizer;

impl AgentAuthorizer for EdgeIdAuthorizer {
    fn authorize(&self, environment: &Environment, agent_identity: &str) -> FlotillaResult<()> {
        match environment.edge_id.as_deref() {
            Some(edge_id) if !edge_id.is_empty() && edge_id == agent_identity => Ok(()),
            _ => Err(FlotillaError::unauthorized(format!(
                "agent is not allowed to report for environment {}",
                environment.id
            ))),
        }
    }
}

/// A status update sent by an edge agent
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub stack_id: EdgeStackId,
    pub endpoint_id: EnvironmentId,
    #[serde(rename = "status")]
    pub status_type: StatusType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Unix timestamp, seconds; defaults to the time of receipt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
    /// Stack version the agent deployed, 0 when unknown
    #[serde(default)]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_info: Option<DeploymentInfo>,
}

impl StatusReport {
    fn validate(&self) -> FlotillaResult<()> {
        let has_error = self
            .error
            .as_deref()
            .is_some_and(|message| !message.trim().is_empty());
        match (self.status_type == StatusType::Error, has_error) {
            (true, false) => Err(FlotillaError::invalid_input(
                "error message is required when status is Error",
            )),
            (false, true) => Err(FlotillaError::invalid_input(format!(
                "error message is only allowed when status is Error, got {}",
                self.status_type
            ))),
            _ => Ok(()),
        }
    }
}

/// What applying a report did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportOutcome {
    Appended,
    /// Same status type already recorded, timeline unchanged
    Duplicate,
    /// Older than the stack's version, discarded
    Stale,
    /// Status record deleted
    Removed,
}

/// Applies agent reports to status records
pub struct StatusReportHandler {
    authorizer: Arc<dyn AgentAuthorizer>,
    environments: EnvironmentStore,
    stacks: EdgeStackStore,
    statuses: EdgeStackStatusStore,
}

impl StatusReportHandler {
    pub fn new(authorizer: Arc<dyn AgentAuthorizer>) -> Self {
        Self {
            authorizer,
            environments: EnvironmentStore,
            stacks: EdgeStackStore,
            statuses: EdgeStackStatusStore,
        }
    }

    pub fn apply(
        &self,
        tx: &mut dyn Transaction,
        report: &StatusReport,
        agent_identity: &str,
    ) -> FlotillaResult<ReportOutcome> {
        let environment = self.environments.get(tx, report.endpoint_id)?;
        self.authorizer.authorize(&environment, agent_identity)?;
        report.validate()?;
        let stack = self.stacks.get(tx, report.stack_id)?;
        let mut status = self.statuses.read(tx, report.stack_id, report.endpoint_id)?;

        if is_stale_report(report.version, stack.version) {
            warn!(
                stack_id = %report.stack_id,
                environment_id = %report.endpoint_id,
                report_version = report.version,
                stack_version = stack.version,
                "Discarding stale status report"
            );
            return Ok(ReportOutcome::Stale);
        }

        let info_changed = match &report.deployment_info {
            Some(info) if *info != status.deployment_info => {
                status.deployment_info = info.clone();
                true
            }
            _ => false,
        };

        let event = DeploymentStatusEvent {
            time: report
                .time
                .unwrap_or_else(|| chrono::Utc::now().timestamp()),
            status_type: report.status_type,
            error: report.error.clone(),
            version: report.version,
        };

        let outcome = match status.record_event(event) {
            EventOutcome::Remove => {
                self.statuses
                    .delete(tx, report.stack_id, report.endpoint_id)?;
                ReportOutcome::Removed
            }
            EventOutcome::Duplicate => {
                if info_changed {
                    self.statuses.update(tx, &status)?;
                }
                ReportOutcome::Duplicate
            }
            EventOutcome::Appended => {
                self.statuses.update(tx, &status)?;
                ReportOutcome::Appended
            }
        };

        debug!(
            stack_id = %report.stack_id,
            environment_id = %report.endpoint_id,
            status = %report.status_type,
            outcome = ?outcome,
            "Applied status report"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EnvironmentType;
    use flotilla_common::EnvironmentGroupId;

    fn environment(edge_id: Option<&str>) -> Environment {
        Environment {
            id: EnvironmentId::new(1),
            name: "edge-1".to_string(),
            environment_type: EnvironmentType::EdgeAgentOnDocker,
            group_id: EnvironmentGroupId::new(1),
            tag_ids: vec![],
            edge_id: edge_id.map(str::to_string),
        }
    }

    fn report(status_type: StatusType, error: Option<&str>) -> StatusReport {
        StatusReport {
            stack_id: EdgeStackId::new(1),
            endpoint_id: EnvironmentId::new(1),
            status_type,
            error: error.map(str::to_string),
            time: None,
            version: 0,
            deployment_info: None,
        }
    }

    #[test]
    fn test_edge_id_authorizer() {
        let authorizer = EdgeIdAuthorizer;
        assert!(authorizer.authorize(&environment(Some("agent-a")), "agent-a").is_ok());
        assert!(authorizer.authorize(&environment(Some("agent-a")), "agent-b").is_err());
        assert!(authorizer.authorize(&environment(None), "").is_err());
    }

    #[test]
    fn test_error_message_required_iff_error() {
        assert!(report(StatusType::Error, Some("boom")).validate().is_ok());
        assert!(report(StatusType::Error, None).validate().is_err());
        assert!(report(StatusType::Error, Some("  ")).validate().is_err());
        assert!(report(StatusType::Running, Some("boom")).validate().is_err());
        assert!(report(StatusType::Running, None).validate().is_ok());
    }

    #[test]
    fn test_report_json_shape() {
        let parsed: StatusReport = serde_json::from_str(
            r#"{"stackId":3,"endpointId":4,"status":"Error","error":"pull failed","version":2}"#,
        )
        .unwrap();
        assert_eq!(parsed.stack_id, EdgeStackId::new(3));
        assert_eq!(parsed.status_type, StatusType::Error);
        assert_eq!(parsed.time, None);
        assert!(parsed.deployment_info.is_none());
    }
}
