//! Operator commands of the `flotilla-server` binary

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::Context;
use clap::Subcommand;
use tracing::info;

use flotilla_common::{EdgeGroupId, EdgeStackId, EnvironmentGroupId, EnvironmentId, TagId};
use flotilla_edge::{
    CreateEdgeGroupRequest, CreateStackRequest, DeploymentType, EdgeEngine, EnvironmentType,
    RegisterEnvironmentRequest, StatusReport,
};

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List edge stacks with their fleet verdict
    Stacks,
    /// Show one stack with its per-environment statuses as JSON
    Status { stack: EdgeStackId },
    /// Show which stacks an environment should be running
    Relations { environment: EnvironmentId },
    /// List edge groups and how many environments they select
    Groups,
    /// List registered environments
    Environments,
    /// Bump a stack's version so every agent deploys it again
    Redeploy { stack: EdgeStackId },
    /// Apply an agent status report read from a JSON file
    Report {
        file: PathBuf,
        /// Identity the agent authenticated with
        #[arg(long)]
        identity: String,
    },
    /// Register an environment
    RegisterEnvironment {
        name: String,
        #[arg(long = "type", default_value = "edge-docker")]
        environment_type: EnvironmentType,
        #[arg(long = "tag", value_delimiter = ',')]
        tags: Vec<TagId>,
        /// Environment group, the unassigned group when omitted
        #[arg(long)]
        group: Option<EnvironmentGroupId>,
        /// Identity the environment's agent reports with
        #[arg(long)]
        edge_id: Option<String>,
    },
    /// Create an edge group: dynamic with --tag, static with --member
    CreateGroup {
        name: String,
        #[arg(long = "tag", value_delimiter = ',', conflicts_with = "members")]
        tags: Vec<TagId>,
        #[arg(long = "member", value_delimiter = ',')]
        members: Vec<EnvironmentId>,
        /// Select environments carrying any of the tags instead of all
        #[arg(long, requires = "tags")]
        partial_match: bool,
    },
    /// Create a stack from a manifest file
    CreateStack {
        name: String,
        #[arg(long)]
        file: PathBuf,
        #[arg(long = "group", value_delimiter = ',', required = true)]
        groups: Vec<EdgeGroupId>,
        #[arg(long = "type", default_value = "compose")]
        deployment_type: DeploymentType,
    },
}

/// Run `command` against `engine` and return the text to print
pub fn execute(engine: &EdgeEngine, command: &Command) -> anyhow::Result<String> {
    let mut out = String::new();
    match command {
        Command::Stacks => {
            writeln!(
                out,
                "{:<6} {:<24} {:<8} {:<8} {:<17} REASON",
                "ID", "NAME", "VERSION", "TARGETS", "VERDICT"
            )?;
            for view in engine.list_stacks()? {
                writeln!(
                    out,
                    "{:<6} {:<24} {:<8} {:<8} {:<17} {}",
                    view.stack.id.value(),
                    view.stack.name,
                    view.stack.version,
                    view.stack.num_deployments,
                    view.summary.verdict.as_str(),
                    view.summary.reason
                )?;
            }
        }
        Command::Status { stack } => {
            let view = engine.get_stack(*stack)?;
            out.push_str(&serde_json::to_string_pretty(&view)?);
            out.push('\n');
        }
        Command::Relations { environment } => {
            let relation = engine.relation(*environment)?;
            writeln!(out, "{:<6} ACTIVE", "STACK")?;
            for (stack_id, active) in &relation.edge_stacks {
                writeln!(out, "{:<6} {}", stack_id.value(), active)?;
            }
        }
        Command::Groups => {
            writeln!(out, "{:<6} {:<24} {:<8} ENVIRONMENTS", "ID", "NAME", "KIND")?;
            for group in engine.list_edge_groups()? {
                let kind = match (group.dynamic, group.partial_match) {
                    (false, _) => "static",
                    (true, false) => "all-tags",
                    (true, true) => "any-tag",
                };
                let members = engine.edge_group_environments(group.id)?;
                writeln!(
                    out,
                    "{:<6} {:<24} {:<8} {}",
                    group.id.value(),
                    group.name,
                    kind,
                    members.len()
                )?;
            }
        }
        Command::Environments => {
            writeln!(out, "{:<6} {:<24} {:<22} {:<6} STACKS", "ID", "NAME", "TYPE", "GROUP")?;
            for environment in engine.list_environments()? {
                let stacks = engine.stacks_for_environment(environment.id)?;
                writeln!(
                    out,
                    "{:<6} {:<24} {:<22} {:<6} {}",
                    environment.id.value(),
                    environment.name,
                    environment.environment_type,
                    environment.group_id.value(),
                    stacks.len()
                )?;
            }
        }
        Command::Redeploy { stack } => {
            let view = engine.redeploy_stack(*stack)?;
            info!(stack_id = %view.stack.id, version = view.stack.version, "Stack redeployed");
            writeln!(out, "stack {} is now at version {}", view.stack.id, view.stack.version)?;
        }
        Command::Report { file, identity } => {
            let body = std::fs::read(file)
                .with_context(|| format!("failed to read report {}", file.display()))?;
            let report: StatusReport = serde_json::from_slice(&body)
                .with_context(|| format!("invalid report {}", file.display()))?;
            if let Some(view) = engine.report_status(&report, identity, false)? {
                writeln!(
                    out,
                    "stack {}: {} ({})",
                    view.stack.id, view.summary.verdict, view.summary.reason
                )?;
            }
        }
        Command::RegisterEnvironment {
            name,
            environment_type,
            tags,
            group,
            edge_id,
        } => {
            let environment = engine.register_environment(RegisterEnvironmentRequest {
                name: name.clone(),
                environment_type: *environment_type,
                group_id: *group,
                tag_ids: tags.clone(),
                edge_id: edge_id.clone(),
            })?;
            let stacks = engine.stacks_for_environment(environment.id)?;
            writeln!(
                out,
                "environment {} registered, targeted by {} stacks",
                environment.id,
                stacks.len()
            )?;
        }
        Command::CreateGroup {
            name,
            tags,
            members,
            partial_match,
        } => {
            let group = engine.create_edge_group(CreateEdgeGroupRequest {
                name: name.clone(),
                dynamic: !tags.is_empty(),
                tag_ids: tags.clone(),
                endpoints: members.clone(),
                partial_match: *partial_match,
            })?;
            let members = engine.edge_group_environments(group.id)?;
            writeln!(
                out,
                "edge group {} created with {} environments",
                group.id,
                members.len()
            )?;
        }
        Command::CreateStack {
            name,
            file,
            groups,
            deployment_type,
        } => {
            let content = std::fs::read(file)
                .with_context(|| format!("failed to read manifest {}", file.display()))?;
            let view = engine.create_stack(CreateStackRequest::new(
                name.clone(),
                *deployment_type,
                groups.clone(),
                content,
            ))?;
            info!(stack_id = %view.stack.id, name = %view.stack.name, "Stack created");
            writeln!(
                out,
                "stack {} created targeting {} environments",
                view.stack.id, view.stack.num_deployments
            )?;
        }
    }
    Ok(out)
}
