// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::Identity;
use crate::PermissionTuple;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// A single change to an identity's live grants
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema,
)]
#[serde(tag = "kind", content = "permission", rename_all = "snake_case")]
pub enum Operation {
    /// Add the tuple's verbs to the grant with the tuple's key
    Grant(PermissionTuple),
    /// Remove the tuple's verbs from the grant with the tuple's key
    Revoke(PermissionTuple),
}

impl Operation {
    pub fn tuple(&self) -> &PermissionTuple {
        match self {
            Operation::Grant(tuple) | Operation::Revoke(tuple) => tuple,
        }
    }

    pub fn is_grant(&self) -> bool {
        matches!(self, Operation::Grant(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Operation::Grant(_) => "grant",
            Operation::Revoke(_) => "revoke",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.label(), self.tuple())
    }
}

/// Ordered set of operations that converges one identity's live grants to
/// its requirements
///
/// All grants come before all revokes, so that swapping one permission for
/// another never passes through a window where the identity holds neither.
/// Within each group, operations are ordered by permission key.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct OperationPlan {
    pub identity: Identity,
    operations: Vec<Operation>,
}

impl OperationPlan {
    pub fn new(
        identity: Identity,
        mut grants: Vec<PermissionTuple>,
        mut revokes: Vec<PermissionTuple>,
    ) -> OperationPlan {
        grants.sort_by_key(|t| t.key());
        revokes.sort_by_key(|t| t.key());
        let operations = grants
            .into_iter()
            .map(Operation::Grant)
            .chain(revokes.into_iter().map(Operation::Revoke))
            .collect();
        OperationPlan { identity, operations }
    }

    pub fn empty(identity: Identity) -> OperationPlan {
        OperationPlan { identity, operations: Vec::new() }
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn grants(&self) -> impl Iterator<Item = &PermissionTuple> + '_ {
        self.operations.iter().filter_map(|op| match op {
            Operation::Grant(tuple) => Some(tuple),
            Operation::Revoke(_) => None,
        })
    }

    pub fn revokes(&self) -> impl Iterator<Item = &PermissionTuple> + '_ {
        self.operations.iter().filter_map(|op| match op {
            Operation::Grant(_) => None,
            Operation::Revoke(tuple) => Some(tuple),
        })
    }

    /// Returns this plan with every revoke removed.
    pub fn without_revokes(mut self) -> OperationPlan {
        self.operations.retain(Operation::is_grant);
        self
    }
}

impl<'a> IntoIterator for &'a OperationPlan {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn plan_orders_grants_before_revokes() {
        let plan = OperationPlan::new(
            Identity::new("services", "primaza-svc-agent"),
            vec![
                PermissionTuple::new(["delete"], "apps", "deployments")
                    .named("primaza-svc-agent"),
                PermissionTuple::new(["create"], "apps", "deployments"),
            ],
            vec![PermissionTuple::new(["delete"], "", "pods")],
        );

        let labels: Vec<_> =
            plan.operations().iter().map(|op| op.to_string()).collect();
        assert_eq!(
            labels,
            vec![
                "grant [create] deployments.apps",
                "grant [delete] deployments.apps/primaza-svc-agent",
                "revoke [delete] pods",
            ]
        );

        let grants_only = plan.without_revokes();
        assert_eq!(grants_only.len(), 2);
        assert_eq!(grants_only.revokes().count(), 0);
    }

    #[test]
    fn operation_serialization() {
        let op = Operation::Revoke(PermissionTuple::new(["delete"], "", "pods"));
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"], "revoke");
        assert_eq!(json["permission"]["resource"], "pods");
    }
}
