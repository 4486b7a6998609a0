//! Domain model for environments, edge groups, edge stacks, relations and
//! per-environment deployment statuses.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use flotilla_common::{EdgeGroupId, EdgeStackId, EnvironmentGroupId, EnvironmentId, TagId};

/// Environment group every environment belongs to unless told otherwise
pub const UNASSIGNED_ENVIRONMENT_GROUP: EnvironmentGroupId = EnvironmentGroupId::new(1);

/// Kind of host an environment represents
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnvironmentType {
    DockerLocal,
    DockerAgent,
    AzureAci,
    EdgeAgentOnDocker,
    KubernetesLocal,
    KubernetesAgent,
    EdgeAgentOnKubernetes,
}

impl EnvironmentType {
    /// Whether the environment is reached through an edge agent
    pub fn is_edge(self) -> bool {
        matches!(
            self,
            EnvironmentType::EdgeAgentOnDocker | EnvironmentType::EdgeAgentOnKubernetes
        )
    }

    pub fn is_docker(self) -> bool {
        matches!(
            self,
            EnvironmentType::DockerLocal
                | EnvironmentType::DockerAgent
                | EnvironmentType::EdgeAgentOnDocker
        )
    }

    pub fn is_kubernetes(self) -> bool {
        matches!(
            self,
            EnvironmentType::KubernetesLocal
                | EnvironmentType::KubernetesAgent
                | EnvironmentType::EdgeAgentOnKubernetes
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EnvironmentType::DockerLocal => "docker-local",
            EnvironmentType::DockerAgent => "docker-agent",
            EnvironmentType::AzureAci => "azure-aci",
            EnvironmentType::EdgeAgentOnDocker => "edge-docker",
            EnvironmentType::KubernetesLocal => "kubernetes-local",
            EnvironmentType::KubernetesAgent => "kubernetes-agent",
            EnvironmentType::EdgeAgentOnKubernetes => "edge-kubernetes",
        }
    }
}

impl std::fmt::Display for EnvironmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for EnvironmentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "docker-local" => Ok(EnvironmentType::DockerLocal),
            "docker-agent" => Ok(EnvironmentType::DockerAgent),
            "azure-aci" => Ok(EnvironmentType::AzureAci),
            "edge-docker" => Ok(EnvironmentType::EdgeAgentOnDocker),
            "kubernetes-local" => Ok(EnvironmentType::KubernetesLocal),
            "kubernetes-agent" => Ok(EnvironmentType::KubernetesAgent),
            "edge-kubernetes" => Ok(EnvironmentType::EdgeAgentOnKubernetes),
            _ => Err(format!("Invalid environment type: {}", s)),
        }
    }
}

/// A managed Docker or Kubernetes host
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub id: EnvironmentId,
    pub name: String,
    pub environment_type: EnvironmentType,
    pub group_id: EnvironmentGroupId,
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
    /// Identity presented by the environment's edge agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
}

/// Named set of environments whose tags are inherited by every member
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentGroup {
    pub id: EnvironmentGroupId,
    pub name: String,
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
}

/// A static or tag-driven selector over environments
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeGroup {
    pub id: EdgeGroupId,
    pub name: String,
    pub dynamic: bool,
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
    /// Static membership, unused when `dynamic`
    #[serde(default)]
    pub endpoints: Vec<EnvironmentId>,
    #[serde(default)]
    pub partial_match: bool,
}

/// How a stack's content is deployed on its environments
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeploymentType {
    Compose,
    Kubernetes,
}

impl DeploymentType {
    /// Whether environments of `environment_type` can run this kind of stack
    pub fn supports(self, environment_type: EnvironmentType) -> bool {
        match self {
            DeploymentType::Compose => environment_type.is_docker(),
            DeploymentType::Kubernetes => environment_type.is_kubernetes(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentType::Compose => "compose",
            DeploymentType::Kubernetes => "kubernetes",
        }
    }
}

impl std::fmt::Display for DeploymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DeploymentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compose" => Ok(DeploymentType::Compose),
            "kubernetes" => Ok(DeploymentType::Kubernetes),
            _ => Err(format!("Invalid deployment type: {}", s)),
        }
    }
}

/// A versioned deployment unit targeted at one or more edge groups
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeStack {
    pub id: EdgeStackId,
    pub name: String,
    pub deployment_type: DeploymentType,
    pub edge_groups: Vec<EdgeGroupId>,
    pub version: u32,
    /// Number of environments whose relation currently targets this stack
    pub num_deployments: u32,
    pub project_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<String>,
    /// Unix timestamp, seconds
    pub creation_date: i64,
    #[serde(default)]
    pub registries: Vec<u32>,
    #[serde(default)]
    pub use_manifest_namespaces: bool,
    /// Bumped on every content replacement
    #[serde(default)]
    pub file_version: u32,
    /// MD5 of the current manifest content
    #[serde(default)]
    pub config_hash: String,
    #[serde(default)]
    pub pre_pull_image: bool,
    #[serde(default)]
    pub re_pull_image: bool,
    #[serde(default)]
    pub retry_deploy: bool,
}

/// Per-environment record of which stacks currently target it
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointRelation {
    pub endpoint_id: EnvironmentId,
    #[serde(default)]
    pub edge_stacks: BTreeMap<EdgeStackId, bool>,
}

impl EndpointRelation {
    pub fn new(endpoint_id: EnvironmentId) -> Self {
        Self {
            endpoint_id,
            edge_stacks: BTreeMap::new(),
        }
    }

    /// Stacks whose flag is set
    pub fn active_stacks(&self) -> BTreeSet<EdgeStackId> {
        self.edge_stacks
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn targets(&self, stack_id: EdgeStackId) -> bool {
        self.edge_stacks.get(&stack_id).copied().unwrap_or(false)
    }
}

/// Lifecycle phase reported by an agent
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StatusType {
    Pending,
    DeploymentReceived,
    Error,
    Acknowledged,
    Removed,
    RemoteUpdateSuccess,
    ImagesPulled,
    Running,
    Deploying,
    Removing,
    PausedDeploying,
    RollingBack,
    RolledBack,
    Completed,
}

impl StatusType {
    pub const ALL: [StatusType; 14] = [
        StatusType::Pending,
        StatusType::DeploymentReceived,
        StatusType::Error,
        StatusType::Acknowledged,
        StatusType::Removed,
        StatusType::RemoteUpdateSuccess,
        StatusType::ImagesPulled,
        StatusType::Running,
        StatusType::Deploying,
        StatusType::Removing,
        StatusType::PausedDeploying,
        StatusType::RollingBack,
        StatusType::RolledBack,
        StatusType::Completed,
    ];
}

impl std::fmt::Display for StatusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One timestamped lifecycle event for a stack on an environment
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatusEvent {
    /// Unix timestamp, seconds
    pub time: i64,
    #[serde(rename = "type")]
    pub status_type: StatusType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub version: u32,
}

/// Content bookkeeping the agent reports back, kept across redeploys
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentInfo {
    pub version: u32,
    pub file_version: u32,
    #[serde(default)]
    pub config_hash: String,
}

/// Status timeline of one stack on one environment
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeStackStatus {
    pub edge_stack_id: EdgeStackId,
    pub endpoint_id: EnvironmentId,
    #[serde(default)]
    pub status: Vec<DeploymentStatusEvent>,
    #[serde(default)]
    pub deployment_info: DeploymentInfo,
    #[serde(default)]
    pub ready_re_pull_image: bool,
}

/// What recording an event did to a timeline
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventOutcome {
    Appended,
    /// An event of the same type is already present
    Duplicate,
    /// The record should be deleted
    Remove,
}

impl EdgeStackStatus {
    pub fn new(edge_stack_id: EdgeStackId, endpoint_id: EnvironmentId) -> Self {
        Self {
            edge_stack_id,
            endpoint_id,
            status: Vec::new(),
            deployment_info: DeploymentInfo::default(),
            ready_re_pull_image: false,
        }
    }

    /// Most recent event, if any
    pub fn last_event(&self) -> Option<&DeploymentStatusEvent> {
        self.status.last()
    }

    pub fn has_event(&self, status_type: StatusType) -> bool {
        self.status.iter().any(|e| e.status_type == status_type)
    }

    /// Apply the append rule: `Removed` asks for deletion, a type already in
    /// the timeline is ignored, anything else is appended.
    pub fn record_event(&mut self, event: DeploymentStatusEvent) -> EventOutcome {
        if event.status_type == StatusType::Removed {
            return EventOutcome::Remove;
        }
        if self.has_event(event.status_type) {
            return EventOutcome::Duplicate;
        }
        if event.status_type == StatusType::ImagesPulled {
            self.ready_re_pull_image = true;
        }
        self.status.push(event);
        EventOutcome::Appended
    }

    /// Reset the timeline, keeping deployment bookkeeping
    pub fn clear(&mut self) {
        self.status.clear();
        self.ready_re_pull_image = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_type_names_round_trip() {
        for environment_type in [
            EnvironmentType::DockerLocal,
            EnvironmentType::EdgeAgentOnDocker,
            EnvironmentType::EdgeAgentOnKubernetes,
        ] {
            assert_eq!(environment_type.as_str().parse(), Ok(environment_type));
        }
        assert!("edge".parse::<EnvironmentType>().is_err());
    }

    fn event(status_type: StatusType) -> DeploymentStatusEvent {
        DeploymentStatusEvent {
            time: 1,
            status_type,
            error: None,
            version: 1,
        }
    }

    #[test]
    fn test_environment_type_capabilities() {
        assert!(EnvironmentType::EdgeAgentOnDocker.is_edge());
        assert!(EnvironmentType::EdgeAgentOnKubernetes.is_edge());
        assert!(!EnvironmentType::DockerAgent.is_edge());
        assert!(!EnvironmentType::AzureAci.is_docker());
        assert!(!EnvironmentType::AzureAci.is_kubernetes());
    }

    #[test]
    fn test_deployment_type_support() {
        assert!(DeploymentType::Compose.supports(EnvironmentType::EdgeAgentOnDocker));
        assert!(!DeploymentType::Compose.supports(EnvironmentType::EdgeAgentOnKubernetes));
        assert!(DeploymentType::Kubernetes.supports(EnvironmentType::EdgeAgentOnKubernetes));
        assert!(!DeploymentType::Kubernetes.supports(EnvironmentType::EdgeAgentOnDocker));
        assert_eq!(
            "kubernetes".parse::<DeploymentType>().unwrap(),
            DeploymentType::Kubernetes
        );
    }

    #[test]
    fn test_record_event_dedups_by_type() {
        let mut status = EdgeStackStatus::new(EdgeStackId::new(1), EnvironmentId::new(1));
        assert_eq!(
            status.record_event(event(StatusType::Deploying)),
            EventOutcome::Appended
        );
        assert_eq!(
            status.record_event(event(StatusType::Running)),
            EventOutcome::Appended
        );
        assert_eq!(
            status.record_event(event(StatusType::Deploying)),
            EventOutcome::Duplicate
        );
        assert_eq!(status.status.len(), 2);
        assert_eq!(
            status.last_event().map(|e| e.status_type),
            Some(StatusType::Running)
        );
    }

    #[test]
    fn test_removed_never_appends() {
        let mut status = EdgeStackStatus::new(EdgeStackId::new(1), EnvironmentId::new(1));
        assert_eq!(
            status.record_event(event(StatusType::Removed)),
            EventOutcome::Remove
        );
        assert!(status.status.is_empty());
    }

    #[test]
    fn test_clear_keeps_deployment_info() {
        let mut status = EdgeStackStatus::new(EdgeStackId::new(1), EnvironmentId::new(1));
        status.deployment_info = DeploymentInfo {
            version: 3,
            file_version: 2,
            config_hash: "abc".to_string(),
        };
        status.record_event(event(StatusType::ImagesPulled));
        assert!(status.ready_re_pull_image);

        status.clear();
        assert!(status.status.is_empty());
        assert!(!status.ready_re_pull_image);
        assert_eq!(status.deployment_info.version, 3);
    }

    #[test]
    fn test_relation_json_uses_stack_id_keys() {
        let mut relation = EndpointRelation::new(EnvironmentId::new(4));
        relation.edge_stacks.insert(EdgeStackId::new(7), true);
        relation.edge_stacks.insert(EdgeStackId::new(8), false);

        let json = serde_json::to_string(&relation).unwrap();
        assert_eq!(json, r#"{"endpointId":4,"edgeStacks":{"7":true,"8":false}}"#);

        let back: EndpointRelation = serde_json::from_str(&json).unwrap();
        assert_eq!(back.active_stacks().len(), 1);
        assert!(back.targets(EdgeStackId::new(7)));
        assert!(!back.targets(EdgeStackId::new(8)));
    }
}
