// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Keeps the grants of worker-cluster identities converged to what their
//! agents require
//!
//! For each registered [`Identity`](workercluster_authz_types::Identity), a
//! pass aggregates the requirements of its providers, reads what the
//! identity currently holds in the cluster, computes the difference as an
//! ordered plan of grants and revokes, and applies it.  The [`Driver`] runs
//! passes per identity on a period and on request.

pub mod aggregator;
pub mod backoff;
pub mod config;
pub mod diff;
pub mod driver;
pub mod executor;
#[cfg(any(test, feature = "testing"))]
pub mod fakes;
pub mod live_state;
pub mod locks;
pub mod observer;
pub mod pass;

pub use aggregator::aggregate;
pub use aggregator::Aggregation;
pub use aggregator::AggregationError;
pub use config::Config;
pub use config::LoadError;
pub use diff::diff;
pub use driver::Driver;
pub use driver::DriverError;
pub use driver::IdentityStatus;
pub use executor::execute_plan;
pub use executor::ExecutionError;
pub use executor::ExecutionOutcome;
pub use executor::PlanExecution;
pub use live_state::read_live_grants;
pub use live_state::ApplyError;
pub use live_state::ClusterAuthz;
pub use live_state::ReadGrantsError;
pub use locks::IdentityLocks;
pub use locks::PassToken;
pub use observer::LogObserver;
pub use observer::ReconcilerEvent;
pub use observer::ReconcilerObserver;
pub use pass::IdentityReconciler;
pub use pass::PassError;
pub use pass::PassOutcome;
pub use pass::PassReport;
pub use pass::PassState;
