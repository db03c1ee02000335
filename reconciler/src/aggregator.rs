// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Collecting the permissions an identity requires from its providers

use futures::future::join_all;
use slog::debug;
use slog::warn;
use slog::Logger;
use slog_error_chain::InlineErrorChain;
use slog_error_chain::SlogInlineError;
use std::sync::Arc;
use workercluster_authz_types::Identity;
use workercluster_authz_types::InvalidPermission;
use workercluster_authz_types::PermissionTuple;
use workercluster_authz_types::ProviderError;
use workercluster_authz_types::RequirementProvider;
use workercluster_authz_types::RequirementSet;

/// A provider whose requirements were left out of an aggregation
#[derive(Debug, thiserror::Error, SlogInlineError)]
pub enum AggregationError {
    #[error("requirement provider {provider:?} failed")]
    Provider {
        provider: String,
        #[source]
        err: ProviderError,
    },
    #[error("requirement provider {provider:?} declared invalid permission {tuple}")]
    InvalidPermission {
        provider: String,
        tuple: PermissionTuple,
        #[source]
        err: InvalidPermission,
    },
}

impl AggregationError {
    pub fn provider(&self) -> &str {
        match self {
            AggregationError::Provider { provider, .. }
            | AggregationError::InvalidPermission { provider, .. } => provider,
        }
    }
}

/// Result of asking every provider of an identity for its requirements
#[derive(Debug)]
pub struct Aggregation {
    /// Union of the requirements of every provider that reported cleanly
    pub requirements: RequirementSet,
    /// One entry for each provider that was excluded
    pub warnings: Vec<AggregationError>,
}

impl Aggregation {
    /// Whether `requirements` reflects every provider
    pub fn is_complete(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Ask every provider for its requirements and merge them.
///
/// Providers are queried concurrently.  A provider that fails, or whose
/// output contains any invalid tuple, is excluded as a whole and reported
/// in `warnings`; the other providers' requirements are still returned.
pub async fn aggregate(
    log: &Logger,
    identity: &Identity,
    providers: &[Arc<dyn RequirementProvider>],
) -> Aggregation {
    let results = join_all(providers.iter().map(|provider| async move {
        (provider.name(), provider.required_permissions().await)
    }))
    .await;

    let mut requirements = RequirementSet::new(identity.clone());
    let mut warnings = Vec::new();
    for (name, result) in results {
        let tuples = match result {
            Ok(tuples) => tuples,
            Err(err) => {
                warnings.push(AggregationError::Provider {
                    provider: name.to_string(),
                    err,
                });
                continue;
            }
        };

        if let Some((tuple, err)) = tuples
            .iter()
            .find_map(|tuple| tuple.validate().err().map(|err| (tuple, err)))
        {
            warnings.push(AggregationError::InvalidPermission {
                provider: name.to_string(),
                tuple: tuple.clone(),
                err,
            });
            continue;
        }

        debug!(
            log,
            "collected requirements";
            "provider" => name,
            "count" => tuples.len(),
        );
        for tuple in tuples {
            requirements.insert(tuple);
        }
    }

    for warning in &warnings {
        warn!(
            log,
            "excluding requirement provider";
            "provider" => warning.provider(),
            "error" => InlineErrorChain::new(warning),
        );
    }

    Aggregation { requirements, warnings }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use workercluster_authz_agents::AgentKind;
    use workercluster_authz_agents::AgentRequirements;
    use workercluster_authz_agents::StaticRequirements;
    use workercluster_authz_test_utils::dev::test_setup_log;

    struct BrokenProvider;

    #[async_trait::async_trait]
    impl RequirementProvider for BrokenProvider {
        fn name(&self) -> &str {
            "broken"
        }

        async fn required_permissions(
            &self,
        ) -> Result<Vec<PermissionTuple>, ProviderError> {
            Err(ProviderError::Misconfigured(String::from("no data")))
        }
    }

    fn identity() -> Identity {
        Identity::new("applications", "primaza-app-agent")
    }

    #[tokio::test]
    async fn duplicate_tuples_are_merged() {
        let logctx = test_setup_log("duplicate_tuples_are_merged");
        let create = PermissionTuple::new(["create"], "apps", "deployments");
        let providers: Vec<Arc<dyn RequirementProvider>> = vec![
            Arc::new(StaticRequirements::new("one", vec![create.clone()])),
            Arc::new(StaticRequirements::new("two", vec![create.clone()])),
        ];

        let aggregation = aggregate(&logctx.log, &identity(), &providers).await;
        assert!(aggregation.is_complete());
        let tuples: Vec<_> =
            aggregation.requirements.permissions.tuples().collect();
        assert_eq!(tuples, vec![create]);
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn scoped_and_unscoped_stay_distinct() {
        let logctx = test_setup_log("scoped_and_unscoped_stay_distinct");
        let providers: Vec<Arc<dyn RequirementProvider>> =
            vec![Arc::new(AgentRequirements::new(AgentKind::Application))];

        let aggregation = aggregate(&logctx.log, &identity(), &providers).await;
        assert!(aggregation.is_complete());
        let tuples: Vec<_> =
            aggregation.requirements.permissions.tuples().collect();
        assert_eq!(
            tuples,
            vec![
                PermissionTuple::new(["create"], "apps", "deployments"),
                PermissionTuple::new(["delete"], "apps", "deployments")
                    .named("primaza-app-agent"),
            ]
        );
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn bad_providers_are_excluded() {
        let logctx = test_setup_log("bad_providers_are_excluded");
        let good = PermissionTuple::new(["get"], "", "pods");
        let providers: Vec<Arc<dyn RequirementProvider>> = vec![
            Arc::new(BrokenProvider),
            Arc::new(StaticRequirements::new(
                "wildcard",
                vec![
                    PermissionTuple::new(["list"], "", "services"),
                    PermissionTuple::new(["*"], "", "secrets"),
                ],
            )),
            Arc::new(StaticRequirements::new(
                "no-resource",
                vec![
                    PermissionTuple::new(["watch"], "", "events"),
                    PermissionTuple::new(["get"], "", ""),
                ],
            )),
            Arc::new(StaticRequirements::new(
                "versioned",
                vec![PermissionTuple::new(["create"], "apps", "deployments")
                    .with_api_version("v1")],
            )),
            Arc::new(StaticRequirements::new("good", vec![good.clone()])),
        ];

        let aggregation = aggregate(&logctx.log, &identity(), &providers).await;
        assert!(!aggregation.is_complete());
        assert_eq!(aggregation.warnings.len(), 4);
        assert_matches!(
            &aggregation.warnings[0],
            AggregationError::Provider { provider, .. } if provider == "broken"
        );
        assert_matches!(
            &aggregation.warnings[1],
            AggregationError::InvalidPermission {
                provider,
                err: InvalidPermission::Wildcard { .. },
                ..
            } if provider == "wildcard"
        );
        assert_matches!(
            &aggregation.warnings[2],
            AggregationError::InvalidPermission {
                provider,
                tuple,
                err: InvalidPermission::EmptyResource,
            } if provider == "no-resource" && tuple.resource.is_empty()
        );
        assert_matches!(
            &aggregation.warnings[3],
            AggregationError::InvalidPermission {
                provider,
                err: InvalidPermission::Versioned { .. },
                ..
            } if provider == "versioned"
        );

        // Each excluded provider's valid tuples go with it.
        let tuples: Vec<_> =
            aggregation.requirements.permissions.tuples().collect();
        assert_eq!(tuples, vec![good]);
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn no_providers_require_nothing() {
        let logctx = test_setup_log("no_providers_require_nothing");
        let aggregation = aggregate(&logctx.log, &identity(), &[]).await;
        assert!(aggregation.is_complete());
        assert!(aggregation.requirements.permissions.is_empty());
        logctx.cleanup_successful();
    }
}
