// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use async_trait::async_trait;
use workercluster_authz_types::PermissionTuple;
use workercluster_authz_types::ProviderError;
use workercluster_authz_types::RequirementProvider;

/// [`RequirementProvider`] serving a fixed list of permissions
///
/// The list is served as given.  Validation is left to the aggregator so
/// that bad data is reported the same way regardless of where it came from.
#[derive(Clone, Debug)]
pub struct StaticRequirements {
    name: String,
    permissions: Vec<PermissionTuple>,
}

impl StaticRequirements {
    pub fn new(
        name: impl Into<String>,
        permissions: Vec<PermissionTuple>,
    ) -> StaticRequirements {
        StaticRequirements { name: name.into(), permissions }
    }
}

#[async_trait]
impl RequirementProvider for StaticRequirements {
    fn name(&self) -> &str {
        &self.name
    }

    async fn required_permissions(
        &self,
    ) -> Result<Vec<PermissionTuple>, ProviderError> {
        Ok(self.permissions.clone())
    }
}
