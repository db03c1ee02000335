// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Computing the operations that converge live grants to requirements

use std::collections::BTreeSet;
use workercluster_authz_types::GrantRecord;
use workercluster_authz_types::OperationPlan;
use workercluster_authz_types::PermissionTuple;
use workercluster_authz_types::RequirementSet;

/// Compute the plan that makes `live` hold exactly the permissions in
/// `target`.
///
/// Grants are compared per permission key.  When both sides hold a key with
/// different verbs, the plan grants the verbs `live` lacks and revokes the
/// verbs `target` doesn't need, leaving the verbs they share untouched.
/// Anything `live` holds that `target` doesn't mention is revoked.
pub fn diff(target: &RequirementSet, live: &GrantRecord) -> OperationPlan {
    let desired = &target.permissions;
    let existing = &live.permissions;
    let mut grants = Vec::new();
    let mut revokes = Vec::new();

    // Everything desired that isn't fully present.
    for (key, verbs) in desired.iter() {
        match existing.verbs(key) {
            Some(live_verbs) if live_verbs == verbs => {}
            Some(live_verbs) => {
                let missing: BTreeSet<String> =
                    verbs.difference(live_verbs).cloned().collect();
                if !missing.is_empty() {
                    grants.push(PermissionTuple::from_parts(
                        key.clone(),
                        missing,
                    ));
                }
            }
            None => {
                grants
                    .push(PermissionTuple::from_parts(key.clone(), verbs.clone()));
            }
        }
    }

    // Everything existing that isn't desired.
    for (key, live_verbs) in existing.iter() {
        match desired.verbs(key) {
            Some(verbs) if verbs == live_verbs => {}
            Some(verbs) => {
                let extra: BTreeSet<String> =
                    live_verbs.difference(verbs).cloned().collect();
                if !extra.is_empty() {
                    revokes
                        .push(PermissionTuple::from_parts(key.clone(), extra));
                }
            }
            None => {
                revokes.push(PermissionTuple::from_parts(
                    key.clone(),
                    live_verbs.clone(),
                ));
            }
        }
    }

    OperationPlan::new(target.identity.clone(), grants, revokes)
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::collection::btree_set;
    use proptest::collection::vec;
    use proptest::prelude::*;
    use test_strategy::proptest;
    use workercluster_authz_agents::AgentKind;
    use workercluster_authz_types::Identity;
    use workercluster_authz_types::Operation;

    fn identity() -> Identity {
        Identity::new("applications", "primaza-app-agent")
    }

    fn app_agent_requirements() -> RequirementSet {
        RequirementSet::with_permissions(
            identity(),
            AgentKind::Application.required_permissions(),
        )
    }

    fn create_deployments() -> PermissionTuple {
        PermissionTuple::new(["create"], "apps", "deployments")
    }

    fn delete_own_deployment() -> PermissionTuple {
        PermissionTuple::new(["delete"], "apps", "deployments")
            .named("primaza-app-agent")
    }

    #[test]
    fn test_diff_empty_sets() {
        let plan = diff(
            &RequirementSet::new(identity()),
            &GrantRecord::empty(identity()),
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn test_diff_grants_everything_to_new_identity() {
        let plan =
            diff(&app_agent_requirements(), &GrantRecord::empty(identity()));
        assert_eq!(
            plan.operations(),
            &[
                Operation::Grant(create_deployments()),
                Operation::Grant(delete_own_deployment()),
            ]
        );
        assert_eq!(plan.revokes().count(), 0);
    }

    #[test]
    fn test_diff_revokes_stale_grants_after_new_ones() {
        let stale = PermissionTuple::new(["delete"], "", "pods");
        let live = GrantRecord::with_permissions(identity(), [stale.clone()]);

        let plan = diff(&app_agent_requirements(), &live);
        assert_eq!(
            plan.operations(),
            &[
                Operation::Grant(create_deployments()),
                Operation::Grant(delete_own_deployment()),
                Operation::Revoke(stale),
            ]
        );
    }

    #[test]
    fn test_diff_leaves_valid_grants() {
        let live = GrantRecord::with_permissions(
            identity(),
            AgentKind::Application.required_permissions(),
        );
        assert!(diff(&app_agent_requirements(), &live).is_empty());
    }

    #[test]
    fn test_diff_adjusts_verbs_within_a_key() {
        let target = RequirementSet::with_permissions(
            identity(),
            [PermissionTuple::new(["get", "list"], "", "pods")],
        );
        let live = GrantRecord::with_permissions(
            identity(),
            [PermissionTuple::new(["list", "delete"], "", "pods")],
        );

        let plan = diff(&target, &live);
        assert_eq!(
            plan.operations(),
            &[
                Operation::Grant(PermissionTuple::new(["get"], "", "pods")),
                Operation::Revoke(PermissionTuple::new(["delete"], "", "pods")),
            ]
        );
    }

    #[test]
    fn test_diff_never_collapses_names() {
        // An unscoped grant is broader than the scoped requirement, but
        // it's still a different grant.
        let target =
            RequirementSet::with_permissions(identity(), [delete_own_deployment()]);
        let live = GrantRecord::with_permissions(
            identity(),
            [PermissionTuple::new(["delete"], "apps", "deployments")],
        );

        let plan = diff(&target, &live);
        assert_eq!(
            plan.operations(),
            &[
                Operation::Grant(delete_own_deployment()),
                Operation::Revoke(PermissionTuple::new(
                    ["delete"],
                    "apps",
                    "deployments"
                )),
            ]
        );
    }

    fn arb_tuple() -> impl Strategy<Value = PermissionTuple> {
        (
            btree_set(
                prop::sample::select(vec!["get", "list", "create", "delete"]),
                1..4,
            ),
            prop::sample::select(vec!["", "apps"]),
            prop::sample::select(vec!["", "v1"]),
            prop::sample::select(vec!["pods", "deployments"]),
            prop::option::of(prop::sample::select(vec!["a", "b"])),
        )
            .prop_map(|(verbs, group, version, resource, name)| {
                let tuple = PermissionTuple::new(verbs, group, resource)
                    .with_api_version(version);
                match name {
                    Some(name) => tuple.named(name),
                    None => tuple,
                }
            })
    }

    #[proptest]
    fn applying_diff_converges(
        #[strategy(vec(arb_tuple(), 0..12))] target: Vec<PermissionTuple>,
        #[strategy(vec(arb_tuple(), 0..12))] live: Vec<PermissionTuple>,
    ) {
        let target = RequirementSet::with_permissions(identity(), target);
        let mut live = GrantRecord::with_permissions(identity(), live);

        let plan = diff(&target, &live);
        let mut seen_revoke = false;
        for operation in &plan {
            seen_revoke |= !operation.is_grant();
            prop_assert!(!(seen_revoke && operation.is_grant()));
            prop_assert!(live.apply(operation));
        }
        prop_assert_eq!(&live.permissions, &target.permissions);
        prop_assert!(diff(&target, &live).is_empty());
    }

    #[proptest]
    fn diff_with_self_is_empty(
        #[strategy(vec(arb_tuple(), 0..12))] tuples: Vec<PermissionTuple>,
    ) {
        let target = RequirementSet::with_permissions(identity(), tuples);
        let live = GrantRecord {
            identity: identity(),
            permissions: target.permissions.clone(),
        };
        prop_assert!(diff(&target, &live).is_empty());
    }
}
