// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Access to the authorization state of the target cluster

use crate::backoff::retry_transient;
use crate::backoff::RetryableError;
use crate::config::RetryConfig;
use slog::debug;
use slog::Logger;
use slog_error_chain::SlogInlineError;
use std::future::Future;
use workercluster_authz_types::GrantRecord;
use workercluster_authz_types::Identity;
use workercluster_authz_types::Operation;

/// The authorization API of a worker cluster
///
/// The cluster is the source of truth for what an identity holds.  Nothing
/// read through this trait is cached across passes.
pub trait ClusterAuthz: Send + Sync + 'static {
    /// Read everything currently granted to `identity`.
    fn read_grants(
        &self,
        identity: &Identity,
    ) -> impl Future<Output = Result<GrantRecord, ReadGrantsError>> + Send;

    /// Apply one operation to `identity`'s grants.
    ///
    /// Applying an operation whose effect is already present must succeed.
    fn apply(
        &self,
        identity: &Identity,
        operation: &Operation,
    ) -> impl Future<Output = Result<(), ApplyError>> + Send;
}

#[derive(Debug, thiserror::Error, SlogInlineError)]
pub enum ReadGrantsError {
    /// The identity has no bindings at all.  This is an ordinary state for
    /// an identity that was never reconciled.
    #[error("identity has no bindings")]
    NotFound,
    #[error("failed to read grants")]
    Transient(#[source] anyhow::Error),
    #[error("cluster refused to read grants")]
    Fatal(#[source] anyhow::Error),
}

impl RetryableError for ReadGrantsError {
    fn is_transient(&self) -> bool {
        matches!(self, ReadGrantsError::Transient(_))
    }
}

#[derive(Debug, thiserror::Error, SlogInlineError)]
pub enum ApplyError {
    #[error("failed to apply operation")]
    Transient(#[source] anyhow::Error),
    #[error("cluster rejected operation")]
    Fatal(#[source] anyhow::Error),
}

impl RetryableError for ApplyError {
    fn is_transient(&self) -> bool {
        matches!(self, ApplyError::Transient(_))
    }
}

/// Read the live grants of `identity`, retrying transient failures.
///
/// An identity with no bindings yields an empty record.
pub async fn read_live_grants<T: ClusterAuthz>(
    log: &Logger,
    cluster: &T,
    identity: &Identity,
    retry: &RetryConfig,
) -> Result<GrantRecord, ReadGrantsError> {
    let result = retry_transient(log, retry, "read live grants", || {
        cluster.read_grants(identity)
    })
    .await;
    match result {
        Ok(record) => Ok(record),
        Err(ReadGrantsError::NotFound) => {
            debug!(log, "identity has no bindings yet");
            Ok(GrantRecord::empty(identity.clone()))
        }
        Err(err) => Err(err),
    }
}
