// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Requirement providers for workloads in a worker cluster.
//!
//! Two agents are deployed into every worker cluster: the application agent
//! (in each application namespace) and the service agent (in each service
//! namespace).  Both need to create deployments and to delete their own
//! deployment when they are uninstalled.  [`AgentKind`] enumerates them and
//! [`AgentRequirements`] serves their permissions to the aggregator.
//! [`StaticRequirements`] serves an arbitrary fixed list, e.g., extra
//! permissions declared in configuration.

mod agent;
mod static_provider;

pub use agent::*;
pub use static_provider::*;
