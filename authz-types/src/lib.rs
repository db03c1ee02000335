// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types describing the permissions granted to agents in a worker cluster.
//!
//! The central type is [`PermissionTuple`]: one allow-rule over a verb set,
//! an API group and version, a resource kind, and optionally a single named
//! object.  Tuples are collected into a [`PermissionSet`], which backs both
//! the desired state ([`RequirementSet`]) and the observed state
//! ([`GrantRecord`]) of an [`Identity`].  The difference between the two is
//! expressed as an [`OperationPlan`].

mod identity;
mod permission;
mod plan;
mod policy_rule;
mod provider;
mod set;

pub use identity::*;
pub use permission::*;
pub use plan::*;
pub use policy_rule::*;
pub use provider::*;
pub use set::*;
