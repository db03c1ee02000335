// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Manages the convergence loop of every reconciled identity

use crate::backoff::error_backoff_policy;
use crate::backoff::Backoff;
use crate::backoff::ExponentialBackoff;
use crate::config::Config;
use crate::config::InvalidConfig;
use crate::config::ReconcilerConfig;
use crate::live_state::ClusterAuthz;
use crate::locks::IdentityLocks;
use crate::observer::ReconcilerObserver;
use crate::pass::IdentityReconciler;
use crate::pass::PassOutcome;
use crate::pass::PassReport;
use crate::pass::PassState;
use chrono::DateTime;
use chrono::Utc;
use slog::debug;
use slog::info;
use slog::o;
use slog::Logger;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use tokio::sync::watch;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use workercluster_authz_types::Identity;
use workercluster_authz_types::RequirementProvider;

/// Why a pass was started
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivationReason {
    /// someone called [`Driver::activate()`]
    Signaled,
    /// the period elapsed (including the first pass at startup)
    Timeout,
}

#[derive(Clone, Debug)]
pub enum CurrentStatus {
    /// no pass is running
    Idle,
    /// a pass is running
    Running(CurrentStatusRunning),
}

impl CurrentStatus {
    pub fn is_idle(&self) -> bool {
        matches!(self, CurrentStatus::Idle)
    }
}

#[derive(Clone, Debug)]
pub struct CurrentStatusRunning {
    pub start_time: DateTime<Utc>,
    pub start_instant: Instant,
    pub reason: ActivationReason,
    pub iteration: u64,
}

#[derive(Clone, Debug)]
pub enum LastPass {
    NeverCompleted,
    Completed(LastPassCompleted),
}

impl LastPass {
    /// Iteration of the last completed pass, or 0 if none has completed
    pub fn iteration(&self) -> u64 {
        match self {
            LastPass::NeverCompleted => 0,
            LastPass::Completed(last) => last.iteration,
        }
    }

    pub fn completed(&self) -> Option<&LastPassCompleted> {
        match self {
            LastPass::NeverCompleted => None,
            LastPass::Completed(last) => Some(last),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LastPassCompleted {
    pub iteration: u64,
    pub start_time: DateTime<Utc>,
    pub reason: ActivationReason,
    pub elapsed: Duration,
    pub report: Arc<PassReport>,
}

/// Runtime status of one identity's convergence loop
#[derive(Clone, Debug)]
pub struct IdentityStatus {
    pub state: PassState,
    pub current: CurrentStatus,
    pub last: LastPass,
}

#[derive(Clone, Debug)]
struct TaskStatus {
    current: CurrentStatus,
    last: LastPass,
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("identity {0} is not registered")]
    UnknownIdentity(Identity),
    #[error("convergence loop for identity {0} has stopped")]
    Stopped(Identity),
}

/// Drives the convergence loops of all registered identities
///
/// Each identity gets its own tokio task, which runs a pass at startup,
/// every period after that, and whenever [`Driver::activate()`] asks for
/// one.  Identities reconcile independently of each other.  Passes for a
/// single identity are serialized through an [`IdentityLocks`] that callers
/// running passes of their own can share via [`Driver::locks()`].
pub struct Driver {
    tasks: BTreeMap<Identity, Task>,
    locks: IdentityLocks,
    shutdown_tx: watch::Sender<bool>,
    log: Logger,
}

/// Driver-side state of one identity's convergence loop
struct Task {
    /// configured period of the loop
    period: Duration,
    /// updates from the tokio task about the pass it's running
    status: watch::Receiver<TaskStatus>,
    /// state of the identity's reconciler
    state: watch::Receiver<PassState>,
    /// join handle for the tokio task running the loop
    tokio_task: tokio::task::JoinHandle<()>,
    /// wakes up the tokio task for an explicit activation
    notify: Arc<Notify>,
}

impl Driver {
    pub fn new(log: &Logger) -> Driver {
        let (shutdown_tx, _) = watch::channel(false);
        Driver {
            tasks: BTreeMap::new(),
            locks: IdentityLocks::new(),
            shutdown_tx,
            log: log.new(o!("component" => "ReconcilerDriver")),
        }
    }

    /// Build a driver with one convergence loop per configured identity.
    pub fn from_config<T: ClusterAuthz>(
        log: &Logger,
        config: &Config,
        cluster: Arc<T>,
        observer: Arc<dyn ReconcilerObserver>,
    ) -> Result<Driver, InvalidConfig> {
        config.validate()?;
        let mut driver = Driver::new(log);
        for identity in &config.identities {
            driver.register(
                identity.identity(),
                identity.providers(),
                Arc::clone(&cluster),
                &config.reconciler,
                Arc::clone(&observer),
            );
        }
        Ok(driver)
    }

    /// Start reconciling `identity` against the requirements of
    /// `providers`.
    ///
    /// The first pass starts right away.  This function panics if
    /// `identity` is already registered.
    pub fn register<T: ClusterAuthz>(
        &mut self,
        identity: Identity,
        providers: Vec<Arc<dyn RequirementProvider>>,
        cluster: Arc<T>,
        config: &ReconcilerConfig,
        observer: Arc<dyn ReconcilerObserver>,
    ) {
        let (status_tx, status_rx) = watch::channel(TaskStatus {
            current: CurrentStatus::Idle,
            last: LastPass::NeverCompleted,
        });
        let notify = Arc::new(Notify::new());

        let reconciler = IdentityReconciler::new(
            &self.log,
            identity.clone(),
            providers,
            cluster,
            config.retry.clone(),
            self.locks.clone(),
            observer,
        );
        let state = reconciler.subscribe_state();
        let period = config.period();
        let task_exec = TaskExec {
            period,
            log: self.log.new(o!("identity" => identity.to_string())),
            reconciler,
            notify: Arc::clone(&notify),
            shutdown: self.shutdown_tx.subscribe(),
            status_tx,
            error_backoff: error_backoff_policy(&config.error_backoff),
            iteration: 0,
        };
        let tokio_task = tokio::task::spawn(task_exec.run());

        let task =
            Task { period, status: status_rx, state, tokio_task, notify };
        if self.tasks.insert(identity.clone(), task).is_some() {
            panic!("registered identity {identity} twice");
        }
    }

    /// Enumerate all registered identities
    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.tasks.keys()
    }

    /// Locks held by every pass this driver runs
    pub fn locks(&self) -> &IdentityLocks {
        &self.locks
    }

    fn task(&self, identity: &Identity) -> Result<&Task, DriverError> {
        self.tasks
            .get(identity)
            .ok_or_else(|| DriverError::UnknownIdentity(identity.clone()))
    }

    pub fn period(&self, identity: &Identity) -> Result<Duration, DriverError> {
        Ok(self.task(identity)?.period)
    }

    /// Request a pass for `identity`
    ///
    /// If a pass is already running, another one starts when it finishes.
    pub fn activate(&self, identity: &Identity) -> Result<(), DriverError> {
        self.task(identity)?.notify.notify_one();
        Ok(())
    }

    /// Returns the runtime status of `identity`'s convergence loop
    pub fn status(
        &self,
        identity: &Identity,
    ) -> Result<IdentityStatus, DriverError> {
        let task = self.task(identity)?;
        // Borrowing from a watch channel's receiver blocks the sender, so
        // clone rather than hand out references.
        let TaskStatus { current, last } = task.status.borrow().clone();
        let state = *task.state.borrow();
        Ok(IdentityStatus { state, current, last })
    }

    /// Wait until `identity` has completed pass number `iteration` (or a
    /// later one) and return the latest report.
    ///
    /// At least one pass must have completed, so an `iteration` of 0 waits
    /// for the first.
    pub async fn wait_for_pass(
        &self,
        identity: &Identity,
        iteration: u64,
    ) -> Result<Arc<PassReport>, DriverError> {
        let mut status = self.task(identity)?.status.clone();
        let status = status
            .wait_for(|status| {
                status
                    .last
                    .completed()
                    .is_some_and(|last| last.iteration >= iteration)
            })
            .await
            .map_err(|_| DriverError::Stopped(identity.clone()))?;
        status
            .last
            .completed()
            .map(|last| Arc::clone(&last.report))
            .ok_or_else(|| DriverError::Stopped(identity.clone()))
    }

    /// Stop every convergence loop.
    ///
    /// Running passes stop before their next operation.  Returns once all
    /// loops have exited.
    pub async fn shutdown(mut self) {
        info!(self.log, "shutting down"; "identities" => self.tasks.len());
        self.shutdown_tx.send_replace(true);
        let tasks = std::mem::take(&mut self.tasks);
        for (identity, task) in tasks {
            if let Err(err) = task.tokio_task.await {
                info!(
                    self.log,
                    "convergence loop did not exit cleanly";
                    "identity" => %identity,
                    "error" => %err,
                );
            }
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        for (_, t) in &self.tasks {
            t.tokio_task.abort();
        }
    }
}

/// State of the tokio task that runs one identity's convergence loop
struct TaskExec<T> {
    period: Duration,
    log: Logger,
    reconciler: IdentityReconciler<T>,
    notify: Arc<Notify>,
    /// set to `true` when the driver shuts down; doubles as the pass
    /// cancellation signal
    shutdown: watch::Receiver<bool>,
    status_tx: watch::Sender<TaskStatus>,
    /// delay after a transient failure, growing over consecutive failures
    error_backoff: ExponentialBackoff,
    /// counts passes, for debuggability
    iteration: u64,
}

impl<T: ClusterAuthz> TaskExec<T> {
    async fn run(mut self) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let notify = Arc::clone(&self.notify);
        let mut shutdown = self.shutdown.clone();

        while !*shutdown.borrow_and_update() {
            tokio::select! {
                _ = interval.tick() => {
                    if self.activate(ActivationReason::Timeout).await {
                        interval.reset_immediately();
                    }
                }

                _ = notify.notified() => {
                    if self.activate(ActivationReason::Signaled).await {
                        interval.reset_immediately();
                    }
                }

                result = shutdown.changed() => {
                    if result.is_err() {
                        break;
                    }
                }
            }
        }
        debug!(self.log, "convergence loop stopped");
    }

    /// Run one pass.  Returns true if the pass failed transiently, in which
    /// case the error backoff has already elapsed and the next pass is due.
    async fn activate(&mut self, reason: ActivationReason) -> bool {
        self.iteration += 1;
        let iteration = self.iteration;
        let start_time = Utc::now();
        let start_instant = Instant::now();

        debug!(
            self.log,
            "activating";
            "reason" => ?reason,
            "iteration" => iteration,
        );

        self.status_tx.send_modify(|status| {
            status.current = CurrentStatus::Running(CurrentStatusRunning {
                start_time,
                start_instant,
                reason,
                iteration,
            });
        });

        let report = self.reconciler.run_pass(&self.shutdown).await;
        let elapsed = start_instant.elapsed();
        let transient = report.outcome.is_transient_failure();
        let succeeded = matches!(
            report.outcome,
            PassOutcome::Converged | PassOutcome::Applied
        );

        self.status_tx.send_modify(|status| {
            *status = TaskStatus {
                current: CurrentStatus::Idle,
                last: LastPass::Completed(LastPassCompleted {
                    iteration,
                    start_time,
                    reason,
                    elapsed,
                    report: Arc::new(report),
                }),
            };
        });

        debug!(
            self.log,
            "activation complete";
            "elapsed" => ?elapsed,
            "iteration" => iteration,
        );

        if succeeded {
            self.error_backoff.reset();
        }
        if transient {
            let delay = self
                .error_backoff
                .next_backoff()
                .unwrap_or(self.error_backoff.max_interval);
            info!(
                self.log,
                "backing off after transient failure";
                "delay" => ?delay,
            );
            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.wait_for(|stop| *stop) => {}
            }
        }
        self.reconciler.recover();
        transient
    }
}
