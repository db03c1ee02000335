// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces for parsing configuration files and working with a reconciler
//! configuration

use camino::Utf8Path;
use camino::Utf8PathBuf;
use dropshot::ConfigLogging;
use serde::Deserialize;
use serde::Serialize;
use slog::Logger;
use slog_error_chain::SlogInlineError;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use workercluster_authz_agents::AgentKind;
use workercluster_authz_agents::AgentRequirements;
use workercluster_authz_agents::StaticRequirements;
use workercluster_authz_types::Identity;
use workercluster_authz_types::PermissionTuple;
use workercluster_authz_types::RequirementProvider;

/// Configuration for the worker-cluster authorization reconciler
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Config {
    /// Behavior of the convergence loop.
    pub reconciler: ReconcilerConfig,
    /// Server-wide logging configuration.
    pub log: ConfigLogging,
    /// Identities to reconcile and the workloads they serve.
    #[serde(default)]
    pub identities: Vec<IdentityConfig>,
}

impl Config {
    /// Load a `Config` from the given TOML file
    pub fn from_file(path: &Utf8Path) -> Result<Config, LoadError> {
        let file_contents = std::fs::read_to_string(path)
            .map_err(|err| LoadError::Io { path: path.into(), err })?;
        let config_parsed: Config = toml::from_str(&file_contents)
            .map_err(|err| LoadError::Parse { path: path.into(), err })?;
        config_parsed
            .validate()
            .map_err(|err| LoadError::Invalid { path: path.into(), err })?;
        Ok(config_parsed)
    }

    /// Build the root logger described by the `[log]` section.
    pub fn to_logger(&self, name: &str) -> Result<Logger, std::io::Error> {
        self.log.to_logger(name)
    }

    /// Check constraints that can't be expressed in the file format.
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.reconciler.period_secs == 0 {
            return Err(InvalidConfig::ZeroPeriod);
        }
        if self.reconciler.retry.max_attempts == 0 {
            return Err(InvalidConfig::ZeroAttempts);
        }

        let mut seen = BTreeSet::new();
        for identity in &self.identities {
            let id = identity.identity();
            if !seen.insert(id.clone()) {
                return Err(InvalidConfig::DuplicateIdentity(id));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ReconcilerConfig {
    /// How often each identity is reconciled when nothing else triggers it.
    pub period_secs: u64,
    /// Retry policy for individual calls to the cluster.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Delay policy after a pass fails with a transient error.
    #[serde(default)]
    pub error_backoff: ErrorBackoffConfig,
}

impl ReconcilerConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RetryConfig {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            initial_interval_ms: 100,
            max_interval_ms: 5_000,
            max_attempts: 5,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ErrorBackoffConfig {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
}

impl Default for ErrorBackoffConfig {
    fn default() -> Self {
        ErrorBackoffConfig {
            initial_interval_ms: 1_000,
            max_interval_ms: 5 * 60 * 1_000,
        }
    }
}

/// An identity to reconcile
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct IdentityConfig {
    pub namespace: String,
    pub service_account: String,
    /// Agents whose requirements this identity must satisfy.
    #[serde(default)]
    pub agents: Vec<AgentKind>,
    /// Additional permissions beyond those of `agents`.
    #[serde(default)]
    pub extra_permissions: Vec<PermissionTuple>,
}

impl IdentityConfig {
    pub fn identity(&self) -> Identity {
        Identity::new(&self.namespace, &self.service_account)
    }

    /// Build the requirement providers for this identity.
    pub fn providers(&self) -> Vec<Arc<dyn RequirementProvider>> {
        let mut providers: Vec<Arc<dyn RequirementProvider>> = self
            .agents
            .iter()
            .map(|kind| {
                Arc::new(AgentRequirements::new(*kind))
                    as Arc<dyn RequirementProvider>
            })
            .collect();
        if !self.extra_permissions.is_empty() {
            providers.push(Arc::new(StaticRequirements::new(
                "extra-permissions",
                self.extra_permissions.clone(),
            )));
        }
        providers
    }
}

#[derive(Debug, Error, SlogInlineError)]
pub enum LoadError {
    #[error("error reading \"{path}\": {err}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("error parsing \"{path}\": {err}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },
    #[error("invalid configuration in \"{path}\"")]
    Invalid {
        path: Utf8PathBuf,
        #[source]
        err: InvalidConfig,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidConfig {
    #[error("reconciler.period_secs must be positive")]
    ZeroPeriod,
    #[error("reconciler.retry.max_attempts must be at least 1")]
    ZeroAttempts,
    #[error("identity {0} is configured more than once")]
    DuplicateIdentity(Identity),
}
