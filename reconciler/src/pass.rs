// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A single reconciliation pass for one identity

use crate::aggregator::aggregate;
use crate::aggregator::Aggregation;
use crate::aggregator::AggregationError;
use crate::backoff::RetryableError;
use crate::config::RetryConfig;
use crate::diff::diff;
use crate::executor::execute_plan;
use crate::executor::ExecutionError;
use crate::executor::ExecutionOutcome;
use crate::live_state::read_live_grants;
use crate::live_state::ClusterAuthz;
use crate::live_state::ReadGrantsError;
use crate::locks::IdentityLocks;
use crate::observer::ReconcilerEvent;
use crate::observer::ReconcilerObserver;
use slog::error;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use slog_error_chain::InlineErrorChain;
use slog_error_chain::SlogInlineError;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use workercluster_authz_types::Identity;
use workercluster_authz_types::Operation;
use workercluster_authz_types::OperationPlan;
use workercluster_authz_types::RequirementProvider;

/// Where an identity is in its reconciliation cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassState {
    Idle,
    Aggregating,
    Diffing,
    Applying,
    /// The last pass failed or was incomplete.  The next pass starts only
    /// after returning to `Idle`.
    Error,
}

impl PassState {
    fn can_transition_to(self, next: PassState) -> bool {
        use PassState::*;
        matches!(
            (self, next),
            (Idle, Aggregating)
                | (Aggregating, Diffing)
                | (Diffing, Applying)
                | (Diffing, Idle)
                | (Applying, Idle)
                | (Error, Idle)
                | (Aggregating | Diffing | Applying, Error)
        )
    }
}

impl fmt::Display for PassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PassState::Idle => "idle",
            PassState::Aggregating => "aggregating",
            PassState::Diffing => "diffing",
            PassState::Applying => "applying",
            PassState::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error, SlogInlineError)]
pub enum PassError {
    #[error("failed to read live grants")]
    ReadGrants(#[source] ReadGrantsError),
    #[error("failed to apply plan")]
    Execution(#[source] ExecutionError),
}

impl RetryableError for PassError {
    fn is_transient(&self) -> bool {
        match self {
            PassError::ReadGrants(err) => err.is_transient(),
            PassError::Execution(err) => err.is_transient(),
        }
    }
}

/// How a pass ended
#[derive(Debug)]
pub enum PassOutcome {
    /// Live grants already matched the requirements.
    Converged,
    /// Live grants now match the requirements.
    Applied,
    /// Some providers were excluded, so only grants were applied and
    /// `withheld_revokes` revokes were skipped.
    Degraded { withheld_revokes: usize },
    /// Cancellation stopped the pass with `remaining` operations unapplied.
    Cancelled { remaining: usize },
    Failed(PassError),
}

impl PassOutcome {
    /// Whether this outcome leaves the identity in [`PassState::Error`]
    pub fn is_error(&self) -> bool {
        matches!(self, PassOutcome::Degraded { .. } | PassOutcome::Failed(_))
    }

    pub fn is_transient_failure(&self) -> bool {
        matches!(self, PassOutcome::Failed(err) if err.is_transient())
    }
}

/// Everything a pass found and did
#[derive(Debug)]
pub struct PassReport {
    pub identity: Identity,
    /// Providers excluded from this pass's requirements
    pub warnings: Vec<AggregationError>,
    /// Plan computed by the pass, if it got that far.  Revokes withheld
    /// because of `warnings` are not included.
    pub plan: Option<OperationPlan>,
    /// Operations that took effect
    pub applied: Vec<Operation>,
    pub outcome: PassOutcome,
}

/// Runs reconciliation passes for a single identity
pub struct IdentityReconciler<T> {
    identity: Identity,
    providers: Vec<Arc<dyn RequirementProvider>>,
    cluster: Arc<T>,
    retry: RetryConfig,
    locks: IdentityLocks,
    observer: Arc<dyn ReconcilerObserver>,
    state_tx: watch::Sender<PassState>,
    log: Logger,
}

impl<T: ClusterAuthz> IdentityReconciler<T> {
    pub fn new(
        log: &Logger,
        identity: Identity,
        providers: Vec<Arc<dyn RequirementProvider>>,
        cluster: Arc<T>,
        retry: RetryConfig,
        locks: IdentityLocks,
        observer: Arc<dyn ReconcilerObserver>,
    ) -> IdentityReconciler<T> {
        let log = log.new(o!("identity" => identity.to_string()));
        let (state_tx, _) = watch::channel(PassState::Idle);
        IdentityReconciler {
            identity,
            providers,
            cluster,
            retry,
            locks,
            observer,
            state_tx,
            log,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn state(&self) -> PassState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PassState> {
        self.state_tx.subscribe()
    }

    fn transition(&self, next: PassState) {
        let prev = self.state_tx.send_replace(next);
        debug_assert!(
            prev.can_transition_to(next),
            "invalid transition {prev} -> {next}"
        );
        self.observer.record(&ReconcilerEvent::Transition {
            identity: self.identity.clone(),
            from: prev,
            to: next,
        });
    }

    /// Leave [`PassState::Error`], if the last pass ended there.
    pub fn recover(&self) {
        if self.state() == PassState::Error {
            self.transition(PassState::Idle);
        }
    }

    /// Converge this identity's live grants to its providers' requirements.
    ///
    /// Waits for any other pass on the same identity to finish first.
    /// `cancel` is checked between operations; see [`execute_plan`].
    pub async fn run_pass(&self, cancel: &watch::Receiver<bool>) -> PassReport {
        let _token = self.locks.acquire(&self.identity).await;
        self.recover();
        let log = &self.log;

        self.transition(PassState::Aggregating);
        let Aggregation { requirements, warnings } =
            aggregate(log, &self.identity, &self.providers).await;
        for warning in &warnings {
            self.observer.record(&ReconcilerEvent::AggregationWarning {
                identity: self.identity.clone(),
                provider: warning.provider().to_string(),
                message: InlineErrorChain::new(warning).to_string(),
            });
        }

        self.transition(PassState::Diffing);
        let live = match read_live_grants(
            log,
            &*self.cluster,
            &self.identity,
            &self.retry,
        )
        .await
        {
            Ok(live) => live,
            Err(err) => {
                return self.fail(
                    warnings,
                    None,
                    Vec::new(),
                    PassError::ReadGrants(err),
                );
            }
        };

        let mut plan = diff(&requirements, &live);
        let mut withheld_revokes = 0;
        if !warnings.is_empty() {
            withheld_revokes = plan.revokes().count();
            plan = plan.without_revokes();
            if withheld_revokes > 0 {
                warn!(
                    log,
                    "requirements are incomplete, withholding revokes";
                    "withheld" => withheld_revokes,
                );
            }
        }

        let execution = if plan.is_empty() {
            None
        } else {
            self.transition(PassState::Applying);
            Some(
                execute_plan(log, &*self.cluster, &plan, &self.retry, cancel)
                    .await,
            )
        };
        let (applied, outcome) = match execution {
            None => (Vec::new(), ExecutionOutcome::Completed),
            Some(execution) => (execution.applied, execution.outcome),
        };

        let outcome = match outcome {
            ExecutionOutcome::Failed(err) => {
                return self.fail(
                    warnings,
                    Some(plan),
                    applied,
                    PassError::Execution(err),
                );
            }
            ExecutionOutcome::Cancelled { remaining } => {
                PassOutcome::Cancelled { remaining }
            }
            ExecutionOutcome::Completed if !warnings.is_empty() => {
                PassOutcome::Degraded { withheld_revokes }
            }
            ExecutionOutcome::Completed if plan.is_empty() => {
                PassOutcome::Converged
            }
            ExecutionOutcome::Completed => PassOutcome::Applied,
        };

        if outcome.is_error() {
            self.transition(PassState::Error);
        } else {
            self.transition(PassState::Idle);
        }
        info!(
            log,
            "reconciliation pass finished";
            "outcome" => ?outcome,
            "applied" => applied.len(),
            "planned" => plan.len(),
        );

        PassReport {
            identity: self.identity.clone(),
            warnings,
            plan: Some(plan),
            applied,
            outcome,
        }
    }

    fn fail(
        &self,
        warnings: Vec<AggregationError>,
        plan: Option<OperationPlan>,
        applied: Vec<Operation>,
        err: PassError,
    ) -> PassReport {
        let transient = err.is_transient();
        if transient {
            warn!(
                self.log,
                "reconciliation pass failed";
                "applied" => applied.len(),
                "error" => InlineErrorChain::new(&err),
            );
        } else {
            error!(
                self.log,
                "reconciliation pass failed";
                "applied" => applied.len(),
                "error" => InlineErrorChain::new(&err),
            );
        }
        self.transition(PassState::Error);
        self.observer.record(&ReconcilerEvent::Failure {
            identity: self.identity.clone(),
            transient,
            message: InlineErrorChain::new(&err).to_string(),
        });
        PassReport {
            identity: self.identity.clone(),
            warnings,
            plan,
            applied,
            outcome: PassOutcome::Failed(err),
        }
    }
}
