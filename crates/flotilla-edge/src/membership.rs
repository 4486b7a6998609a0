//! Edge group membership resolution
//!
//! Static groups list their environments explicitly. Dynamic groups select
//! every edge-capable environment whose effective tag set (its own tags plus
//! the tags of its environment group) matches the group's tags, either fully
//! (every group tag present) or partially (at least one group tag present).

use std::collections::{BTreeSet, HashMap};

use flotilla_common::{
    EdgeGroupId, EnvironmentGroupId, EnvironmentId, FlotillaError, FlotillaResult, TagId,
};

use crate::model::{EdgeGroup, Environment, EnvironmentGroup};

impl EdgeGroup {
    /// Reject groups whose selector cannot be evaluated
    pub fn validate(&self) -> FlotillaResult<()> {
        if self.name.trim().is_empty() {
            return Err(FlotillaError::invalid_input("edge group name is required"));
        }
        if self.dynamic && self.tag_ids.is_empty() {
            return Err(FlotillaError::invalid_input(format!(
                "dynamic edge group '{}' must select at least one tag",
                self.name
            )));
        }
        Ok(())
    }
}

/// Tags an environment carries directly or inherits from its group
pub fn effective_tags(
    environment: &Environment,
    environment_groups: &[EnvironmentGroup],
) -> BTreeSet<TagId> {
    let mut tags: BTreeSet<TagId> = environment.tag_ids.iter().copied().collect();
    if let Some(group) = environment_groups
        .iter()
        .find(|g| g.id == environment.group_id)
    {
        tags.extend(group.tag_ids.iter().copied());
    }
    tags
}

fn tags_match(group: &EdgeGroup, tags: &BTreeSet<TagId>) -> bool {
    if group.partial_match {
        group.tag_ids.iter().any(|t| tags.contains(t))
    } else {
        group.tag_ids.iter().all(|t| tags.contains(t))
    }
}

/// Whether `environment` belongs to `group`
pub fn edge_group_contains(
    group: &EdgeGroup,
    environment: &Environment,
    environment_groups: &[EnvironmentGroup],
) -> bool {
    if !group.dynamic {
        return group.endpoints.contains(&environment.id);
    }
    environment.environment_type.is_edge()
        && tags_match(group, &effective_tags(environment, environment_groups))
}

/// Environment IDs belonging to `group`
///
/// Static groups return their stored list verbatim, including IDs of
/// environments that no longer exist; callers validate their own invariants.
pub fn edge_group_related_endpoints(
    group: &EdgeGroup,
    environments: &[Environment],
    environment_groups: &[EnvironmentGroup],
) -> Vec<EnvironmentId> {
    if !group.dynamic {
        return group.endpoints.clone();
    }

    // Group tags looked up once per environment group rather than per environment
    let group_tags: HashMap<EnvironmentGroupId, &[TagId]> = environment_groups
        .iter()
        .map(|g| (g.id, g.tag_ids.as_slice()))
        .collect();

    environments
        .iter()
        .filter(|env| env.environment_type.is_edge())
        .filter(|env| {
            let mut tags: BTreeSet<TagId> = env.tag_ids.iter().copied().collect();
            if let Some(inherited) = group_tags.get(&env.group_id) {
                tags.extend(inherited.iter().copied());
            }
            tags_match(group, &tags)
        })
        .map(|env| env.id)
        .collect()
}

/// Flattened membership of several groups
///
/// Unknown group IDs contribute nothing. Environments present in more than one
/// group appear once per group.
pub fn related_endpoints(
    edge_group_ids: &[EdgeGroupId],
    environments: &[Environment],
    environment_groups: &[EnvironmentGroup],
    edge_groups: &[EdgeGroup],
) -> Vec<EnvironmentId> {
    edge_group_ids
        .iter()
        .filter_map(|id| edge_groups.iter().find(|g| g.id == *id))
        .flat_map(|group| edge_group_related_endpoints(group, environments, environment_groups))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EnvironmentType;

    fn env(id: u32, env_type: EnvironmentType, group: u32, tags: &[u32]) -> Environment {
        Environment {
            id: EnvironmentId::new(id),
            name: format!("env-{}", id),
            environment_type: env_type,
            group_id: EnvironmentGroupId::new(group),
            tag_ids: tags.iter().copied().map(TagId::new).collect(),
            edge_id: None,
        }
    }

    fn dynamic_group(id: u32, tags: &[u32], partial: bool) -> EdgeGroup {
        EdgeGroup {
            id: EdgeGroupId::new(id),
            name: format!("group-{}", id),
            dynamic: true,
            tag_ids: tags.iter().copied().map(TagId::new).collect(),
            endpoints: vec![],
            partial_match: partial,
        }
    }

    fn static_group(id: u32, endpoints: &[u32]) -> EdgeGroup {
        EdgeGroup {
            id: EdgeGroupId::new(id),
            name: format!("group-{}", id),
            dynamic: false,
            tag_ids: vec![],
            endpoints: endpoints.iter().copied().map(EnvironmentId::new).collect(),
            partial_match: false,
        }
    }

    #[test]
    fn test_full_match_requires_every_tag() {
        let envs = vec![
            env(1, EnvironmentType::EdgeAgentOnDocker, 1, &[1, 2, 3]),
            env(2, EnvironmentType::EdgeAgentOnDocker, 1, &[1]),
        ];
        let group = dynamic_group(1, &[1, 2], false);

        let members = edge_group_related_endpoints(&group, &envs, &[]);
        assert_eq!(members, vec![EnvironmentId::new(1)]);
    }

    #[test]
    fn test_partial_match_requires_any_tag() {
        let envs = vec![
            env(1, EnvironmentType::EdgeAgentOnDocker, 1, &[2]),
            env(2, EnvironmentType::EdgeAgentOnKubernetes, 1, &[5]),
        ];
        let group = dynamic_group(1, &[1, 2], true);

        let members = edge_group_related_endpoints(&group, &envs, &[]);
        assert_eq!(members, vec![EnvironmentId::new(1)]);
    }

    #[test]
    fn test_group_tags_are_inherited() {
        let envs = vec![env(1, EnvironmentType::EdgeAgentOnDocker, 7, &[1])];
        let env_groups = vec![EnvironmentGroup {
            id: EnvironmentGroupId::new(7),
            name: "site-a".to_string(),
            tag_ids: vec![TagId::new(2)],
        }];
        let group = dynamic_group(1, &[1, 2], false);

        assert_eq!(
            edge_group_related_endpoints(&group, &envs, &env_groups),
            vec![EnvironmentId::new(1)]
        );
        assert!(edge_group_contains(&group, &envs[0], &env_groups));
        assert!(!edge_group_contains(&group, &envs[0], &[]));
    }

    #[test]
    fn test_dynamic_groups_skip_non_edge_environments() {
        let envs = vec![
            env(1, EnvironmentType::DockerAgent, 1, &[1]),
            env(2, EnvironmentType::KubernetesLocal, 1, &[1]),
            env(3, EnvironmentType::EdgeAgentOnKubernetes, 1, &[1]),
        ];
        let group = dynamic_group(1, &[1], false);

        assert_eq!(
            edge_group_related_endpoints(&group, &envs, &[]),
            vec![EnvironmentId::new(3)]
        );
    }

    #[test]
    fn test_static_group_keeps_stale_ids() {
        // Environment 99 does not exist; static membership is returned as stored.
        let envs = vec![env(1, EnvironmentType::EdgeAgentOnDocker, 1, &[])];
        let group = static_group(1, &[1, 99]);

        assert_eq!(
            edge_group_related_endpoints(&group, &envs, &[]),
            vec![EnvironmentId::new(1), EnvironmentId::new(99)]
        );
    }

    #[test]
    fn test_related_endpoints_keeps_duplicates() {
        let envs = vec![env(1, EnvironmentType::EdgeAgentOnDocker, 1, &[1])];
        let groups = vec![static_group(1, &[1]), dynamic_group(2, &[1], false)];

        let related = related_endpoints(
            &[EdgeGroupId::new(1), EdgeGroupId::new(2), EdgeGroupId::new(3)],
            &envs,
            &[],
            &groups,
        );
        assert_eq!(related, vec![EnvironmentId::new(1), EnvironmentId::new(1)]);
    }

    #[test]
    fn test_validate_rejects_empty_dynamic_selector() {
        let group = dynamic_group(1, &[], false);
        assert!(group.validate().is_err());
        assert!(static_group(1, &[]).validate().is_ok());
    }
}
