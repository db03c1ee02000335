// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::PermissionTuple;
use async_trait::async_trait;

/// A source of permission requirements for an identity
///
/// Each kind of workload that needs permissions in a worker cluster (an
/// agent, a service) implements this to declare what it needs.  Providers
/// are registered per identity and consulted on every reconciliation pass.
/// Implementations must be free of side effects: the aggregator may call
/// them concurrently and any number of times.
#[async_trait]
pub trait RequirementProvider: Send + Sync {
    /// Name used to attribute requirements and errors to this provider
    fn name(&self) -> &str;

    /// Returns the permissions this provider currently requires.
    async fn required_permissions(
        &self,
    ) -> Result<Vec<PermissionTuple>, ProviderError>;
}

/// Failure reported by a [`RequirementProvider`]
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// the provider's permission data is unusable
    #[error("misconfigured permission data: {0}")]
    Misconfigured(String),

    /// the provider could not determine its requirements
    #[error("requirements unavailable")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}
