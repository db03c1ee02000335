// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Conversion between permission sets and Kubernetes RBAC policy rules

use crate::GrantRecord;
use crate::Identity;
use crate::InvalidPermission;
use crate::PermissionSet;
use crate::PermissionTuple;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

/// The shape of an `rbac.authorization.k8s.io/v1` `PolicyRule`
///
/// Policy rules carry no API version: RBAC rules apply to every version of
/// a group.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    #[serde(default)]
    pub api_groups: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_names: Vec<String>,
    pub verbs: Vec<String>,
}

impl PolicyRule {
    /// Expand this rule into one tuple per (group, resource, name)
    /// combination.
    ///
    /// Rules with no resource names produce unscoped tuples.  Rules without
    /// any group or resource don't describe resource permissions (e.g.,
    /// `nonResourceURLs` rules) and produce nothing.
    pub fn expand(&self) -> Vec<PermissionTuple> {
        let names: Vec<Option<&String>> = if self.resource_names.is_empty() {
            vec![None]
        } else {
            self.resource_names.iter().map(Some).collect()
        };

        let mut tuples = Vec::new();
        for group in &self.api_groups {
            for resource in &self.resources {
                for name in &names {
                    let tuple = PermissionTuple::new(
                        self.verbs.iter().cloned(),
                        group.clone(),
                        resource.clone(),
                    );
                    tuples.push(match name {
                        Some(name) => tuple.named(name.as_str()),
                        None => tuple,
                    });
                }
            }
        }
        tuples
    }
}

impl TryFrom<&PermissionTuple> for PolicyRule {
    type Error = InvalidPermission;

    /// Fails for a tuple naming an API version, which no rule can express.
    fn try_from(tuple: &PermissionTuple) -> Result<Self, Self::Error> {
        if !tuple.api_version.is_empty() {
            return Err(InvalidPermission::Versioned {
                resource: tuple.resource.clone(),
                api_version: tuple.api_version.clone(),
            });
        }
        Ok(PolicyRule {
            api_groups: vec![tuple.api_group.clone()],
            resources: vec![tuple.resource.clone()],
            resource_names: tuple.resource_name.iter().cloned().collect(),
            verbs: tuple.verbs.iter().cloned().collect(),
        })
    }
}

impl PermissionSet {
    /// Render this set as one policy rule per entry, in key order.
    ///
    /// Reading the rules back with [`GrantRecord::from_policy_rules`] yields
    /// this same set.  Sets holding a versioned entry can't be rendered.
    pub fn to_policy_rules(
        &self,
    ) -> Result<Vec<PolicyRule>, InvalidPermission> {
        self.tuples().map(|tuple| PolicyRule::try_from(&tuple)).collect()
    }
}

impl GrantRecord {
    /// Build the record of `identity` from the rules of the roles bound to
    /// it.
    pub fn from_policy_rules<'a>(
        identity: Identity,
        rules: impl IntoIterator<Item = &'a PolicyRule>,
    ) -> GrantRecord {
        GrantRecord::with_permissions(
            identity,
            rules.into_iter().flat_map(PolicyRule::expand),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn rules_render_in_rbac_shape() {
        let set: PermissionSet = [
            PermissionTuple::new(["create"], "apps", "deployments"),
            PermissionTuple::new(["delete"], "apps", "deployments")
                .named("primaza-app-agent"),
        ]
        .into_iter()
        .collect();

        let rules = serde_json::to_value(set.to_policy_rules().unwrap()).unwrap();
        assert_eq!(
            rules,
            serde_json::json!([
                {
                    "apiGroups": ["apps"],
                    "resources": ["deployments"],
                    "verbs": ["create"],
                },
                {
                    "apiGroups": ["apps"],
                    "resources": ["deployments"],
                    "resourceNames": ["primaza-app-agent"],
                    "verbs": ["delete"],
                },
            ])
        );
    }

    #[test]
    fn rules_expand_to_cartesian_product() {
        let rule: PolicyRule = serde_json::from_value(serde_json::json!({
            "apiGroups": ["", "apps"],
            "resources": ["pods", "deployments"],
            "resourceNames": ["a", "b"],
            "verbs": ["get"],
        }))
        .unwrap();
        let tuples = rule.expand();
        assert_eq!(tuples.len(), 8);
        assert!(tuples.contains(
            &PermissionTuple::new(["get"], "apps", "pods").named("b")
        ));

        let rule = PolicyRule {
            verbs: vec!["get".to_string()],
            ..Default::default()
        };
        assert!(rule.expand().is_empty());
    }

    #[test]
    fn grant_record_from_rules_merges_verbs() {
        let rules = vec![
            PolicyRule {
                api_groups: vec!["apps".to_string()],
                resources: vec!["deployments".to_string()],
                resource_names: vec![],
                verbs: vec!["create".to_string()],
            },
            PolicyRule {
                api_groups: vec!["apps".to_string()],
                resources: vec!["deployments".to_string()],
                resource_names: vec![],
                verbs: vec!["get".to_string()],
            },
        ];
        let record = GrantRecord::from_policy_rules(
            Identity::new("applications", "primaza-app-agent"),
            &rules,
        );
        assert_eq!(record.permissions.len(), 1);
        assert!(record.permissions.contains(&PermissionTuple::new(
            ["create", "get"],
            "apps",
            "deployments"
        )));
    }

    #[test]
    fn rules_read_back_as_the_rendered_set() {
        let identity = Identity::new("applications", "primaza-app-agent");
        let set: PermissionSet = [
            PermissionTuple::new(["get", "list"], "", "configmaps"),
            PermissionTuple::new(["create"], "apps", "deployments"),
            PermissionTuple::new(["delete"], "apps", "deployments")
                .named("primaza-app-agent"),
        ]
        .into_iter()
        .collect();

        let rules = set.to_policy_rules().unwrap();
        let record = GrantRecord::from_policy_rules(identity.clone(), &rules);
        assert_eq!(
            record,
            GrantRecord::with_permissions(identity, set.tuples())
        );

        let versioned: PermissionSet =
            [PermissionTuple::new(["get"], "apps", "deployments")
                .with_api_version("v1")]
            .into_iter()
            .collect();
        assert_matches!(
            versioned.to_policy_rules(),
            Err(InvalidPermission::Versioned { ref resource, .. })
                if resource == "deployments"
        );
    }
}
