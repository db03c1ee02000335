// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use workercluster_authz_types::PermissionTuple;
use workercluster_authz_types::ProviderError;
use workercluster_authz_types::RequirementProvider;

/// Name of the application agent's deployment
pub const APPLICATION_AGENT_DEPLOYMENT: &str = "primaza-app-agent";
/// Name of the service agent's deployment
pub const SERVICE_AGENT_DEPLOYMENT: &str = "primaza-svc-agent";

/// The kinds of agent deployed into a worker cluster
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Deserialize,
    Serialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// binds services into application workloads
    Application,
    /// discovers services and reports them back
    Service,
}

impl AgentKind {
    pub const ALL: [AgentKind; 2] = [AgentKind::Application, AgentKind::Service];

    pub fn deployment_name(self) -> &'static str {
        match self {
            AgentKind::Application => APPLICATION_AGENT_DEPLOYMENT,
            AgentKind::Service => SERVICE_AGENT_DEPLOYMENT,
        }
    }

    /// Permissions the agent needs in its namespace.
    ///
    /// Any agent may create deployments, but may only delete its own.
    pub fn required_permissions(self) -> Vec<PermissionTuple> {
        vec![
            PermissionTuple::new(["create"], "apps", "deployments"),
            PermissionTuple::new(["delete"], "apps", "deployments")
                .named(self.deployment_name()),
        ]
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AgentKind::Application => "application-agent",
            AgentKind::Service => "service-agent",
        })
    }
}

/// [`RequirementProvider`] serving the permissions of one agent kind
///
/// The permission list is computed once at construction and never changes.
#[derive(Clone, Debug)]
pub struct AgentRequirements {
    kind: AgentKind,
    name: String,
    permissions: Vec<PermissionTuple>,
}

impl AgentRequirements {
    pub fn new(kind: AgentKind) -> AgentRequirements {
        AgentRequirements {
            kind,
            name: kind.to_string(),
            permissions: kind.required_permissions(),
        }
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }
}

#[async_trait]
impl RequirementProvider for AgentRequirements {
    fn name(&self) -> &str {
        &self.name
    }

    async fn required_permissions(
        &self,
    ) -> Result<Vec<PermissionTuple>, ProviderError> {
        Ok(self.permissions.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn application_agent_permissions() {
        let perms = AgentKind::Application.required_permissions();
        assert_eq!(perms.len(), 2);

        let create = &perms[0];
        assert_eq!(create.verbs.iter().collect::<Vec<_>>(), vec!["create"]);
        assert_eq!(create.api_group, "apps");
        assert_eq!(create.api_version, "");
        assert_eq!(create.resource, "deployments");
        assert_eq!(create.resource_name, None);

        let delete = &perms[1];
        assert_eq!(delete.verbs.iter().collect::<Vec<_>>(), vec!["delete"]);
        assert_eq!(delete.api_group, "apps");
        assert_eq!(delete.api_version, "");
        assert_eq!(delete.resource, "deployments");
        assert_eq!(delete.resource_name.as_deref(), Some("primaza-app-agent"));
    }

    #[test]
    fn service_agent_permissions() {
        let perms = AgentKind::Service.required_permissions();
        assert_eq!(
            perms,
            vec![
                PermissionTuple::new(["create"], "apps", "deployments"),
                PermissionTuple::new(["delete"], "apps", "deployments")
                    .named("primaza-svc-agent"),
            ]
        );
    }

    #[test]
    fn agent_permissions_are_well_formed() {
        for kind in AgentKind::ALL {
            for tuple in kind.required_permissions() {
                tuple.validate().unwrap();
                assert!(tuple.unrecognized_verbs().is_empty());
            }
        }
    }

    #[tokio::test]
    async fn provider_serves_agent_permissions() {
        let provider = AgentRequirements::new(AgentKind::Service);
        assert_eq!(provider.name(), "service-agent");
        assert_eq!(
            provider.required_permissions().await.unwrap(),
            AgentKind::Service.required_permissions()
        );
    }

    #[test]
    fn agent_kind_parses_from_config() {
        #[derive(Deserialize)]
        struct Agents {
            agents: Vec<AgentKind>,
        }
        let parsed: Agents =
            toml::from_str(r#"agents = ["application", "service"]"#).unwrap();
        assert_eq!(parsed.agents, AgentKind::ALL.to_vec());
    }
}
