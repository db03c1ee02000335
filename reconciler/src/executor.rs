// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Applying an [`OperationPlan`] to the cluster

use crate::backoff::retry_transient;
use crate::backoff::RetryableError;
use crate::config::RetryConfig;
use crate::live_state::ApplyError;
use crate::live_state::ClusterAuthz;
use slog::debug;
use slog::info;
use slog::o;
use slog::Logger;
use slog_error_chain::SlogInlineError;
use tokio::sync::watch;
use workercluster_authz_types::Operation;
use workercluster_authz_types::OperationPlan;

#[derive(Debug, thiserror::Error, SlogInlineError)]
pub enum ExecutionError {
    #[error("refusing to {operation}: unrecognized verbs {verbs:?}")]
    UnrecognizedVerbs { operation: Operation, verbs: Vec<String> },
    #[error("failed to {operation}")]
    Apply {
        operation: Operation,
        #[source]
        err: ApplyError,
    },
}

impl ExecutionError {
    pub fn operation(&self) -> &Operation {
        match self {
            ExecutionError::UnrecognizedVerbs { operation, .. }
            | ExecutionError::Apply { operation, .. } => operation,
        }
    }
}

impl RetryableError for ExecutionError {
    fn is_transient(&self) -> bool {
        match self {
            ExecutionError::UnrecognizedVerbs { .. } => false,
            ExecutionError::Apply { err, .. } => err.is_transient(),
        }
    }
}

#[derive(Debug)]
pub enum ExecutionOutcome {
    /// Every operation in the plan was applied.
    Completed,
    /// Cancellation was requested before `remaining` operations could be
    /// started.
    Cancelled { remaining: usize },
    /// The operation named by the error was not applied, nor was anything
    /// after it.
    Failed(ExecutionError),
}

/// What happened when applying a plan
#[derive(Debug)]
pub struct PlanExecution {
    /// The prefix of the plan that took effect, in order
    pub applied: Vec<Operation>,
    pub outcome: ExecutionOutcome,
}

/// Apply `plan` to the cluster, one operation at a time in plan order.
///
/// `cancel` is checked before each operation; once it reads `true`, no
/// further operation is started.  Operations already applied stay applied.
pub async fn execute_plan<T: ClusterAuthz>(
    log: &Logger,
    cluster: &T,
    plan: &OperationPlan,
    retry: &RetryConfig,
    cancel: &watch::Receiver<bool>,
) -> PlanExecution {
    let identity = &plan.identity;
    let mut applied = Vec::with_capacity(plan.len());

    for (i, operation) in plan.operations().iter().enumerate() {
        if *cancel.borrow() {
            let remaining = plan.len() - i;
            info!(
                log,
                "cancelled while applying plan";
                "applied" => applied.len(),
                "remaining" => remaining,
            );
            return PlanExecution {
                applied,
                outcome: ExecutionOutcome::Cancelled { remaining },
            };
        }

        if let Operation::Grant(tuple) = operation {
            let verbs = tuple.unrecognized_verbs();
            if !verbs.is_empty() {
                let verbs = verbs.into_iter().map(String::from).collect();
                return PlanExecution {
                    applied,
                    outcome: ExecutionOutcome::Failed(
                        ExecutionError::UnrecognizedVerbs {
                            operation: operation.clone(),
                            verbs,
                        },
                    ),
                };
            }
        }

        let op_log = log.new(o!("operation" => operation.to_string()));
        let result = retry_transient(&op_log, retry, operation.label(), || {
            cluster.apply(identity, operation)
        })
        .await;
        if let Err(err) = result {
            return PlanExecution {
                applied,
                outcome: ExecutionOutcome::Failed(ExecutionError::Apply {
                    operation: operation.clone(),
                    err,
                }),
            };
        }

        debug!(op_log, "applied operation");
        applied.push(operation.clone());
    }

    PlanExecution { applied, outcome: ExecutionOutcome::Completed }
}
