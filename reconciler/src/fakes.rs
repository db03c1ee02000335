// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory stand-in for a worker cluster's authorization API

use crate::live_state::ApplyError;
use crate::live_state::ClusterAuthz;
use crate::live_state::ReadGrantsError;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use workercluster_authz_types::GrantRecord;
use workercluster_authz_types::Identity;
use workercluster_authz_types::Operation;

/// A scripted failure for the next call to [`FakeCluster`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FakeFailure {
    Transient,
    Fatal,
    /// Only meaningful for reads
    NotFound,
}

type ApplyHook = Box<dyn Fn(&Identity, &Operation) + Send + Sync>;

/// A [`ClusterAuthz`] that keeps grants in memory
///
/// Besides storing grants, it can be scripted to fail upcoming calls, to
/// take time applying operations, and to run a hook after each successful
/// apply.  It also tracks how many applies overlap for each identity.
#[derive(Default)]
pub struct FakeCluster {
    inner: Mutex<FakeClusterInner>,
    after_apply: Mutex<Option<ApplyHook>>,
}

#[derive(Default)]
struct FakeClusterInner {
    records: BTreeMap<Identity, GrantRecord>,
    read_failures: BTreeMap<Identity, VecDeque<FakeFailure>>,
    reads: BTreeMap<Identity, usize>,
    apply_failures: VecDeque<Option<FakeFailure>>,
    apply_attempts: usize,
    applied: Vec<(Identity, Operation)>,
    apply_delay: Duration,
    in_flight: BTreeMap<Identity, usize>,
    max_in_flight: BTreeMap<Identity, usize>,
    total_in_flight: usize,
    max_total_in_flight: usize,
}

impl FakeCluster {
    pub fn new() -> FakeCluster {
        FakeCluster::default()
    }

    /// Replace whatever is stored for the record's identity.
    pub fn set_record(&self, record: GrantRecord) {
        let mut inner = self.inner.lock().unwrap();
        inner.records.insert(record.identity.clone(), record);
    }

    pub fn record(&self, identity: &Identity) -> Option<GrantRecord> {
        self.inner.lock().unwrap().records.get(identity).cloned()
    }

    /// Fail the next reads of `identity`, one failure per read.
    pub fn fail_reads(
        &self,
        identity: &Identity,
        failures: impl IntoIterator<Item = FakeFailure>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .read_failures
            .entry(identity.clone())
            .or_default()
            .extend(failures);
    }

    /// Script the next apply attempts, for any identity, in order.  `None`
    /// lets that attempt succeed.
    pub fn fail_applies(
        &self,
        failures: impl IntoIterator<Item = Option<FakeFailure>>,
    ) {
        self.inner.lock().unwrap().apply_failures.extend(failures);
    }

    /// Make every apply take `delay` before it takes effect.
    pub fn set_apply_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().apply_delay = delay;
    }

    /// Run `hook` after every successful apply.
    pub fn set_apply_hook(
        &self,
        hook: impl Fn(&Identity, &Operation) + Send + Sync + 'static,
    ) {
        *self.after_apply.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn read_count(&self, identity: &Identity) -> usize {
        self.inner.lock().unwrap().reads.get(identity).copied().unwrap_or(0)
    }

    pub fn apply_attempts(&self) -> usize {
        self.inner.lock().unwrap().apply_attempts
    }

    /// Operations that took effect for `identity`, in order
    pub fn applied_operations(&self, identity: &Identity) -> Vec<Operation> {
        self.inner
            .lock()
            .unwrap()
            .applied
            .iter()
            .filter(|(id, _)| id == identity)
            .map(|(_, op)| op.clone())
            .collect()
    }

    /// Largest number of applies ever in progress at once for `identity`
    pub fn max_concurrent_applies(&self, identity: &Identity) -> usize {
        self.inner
            .lock()
            .unwrap()
            .max_in_flight
            .get(identity)
            .copied()
            .unwrap_or(0)
    }

    /// Largest number of applies ever in progress at once overall
    pub fn max_total_concurrent_applies(&self) -> usize {
        self.inner.lock().unwrap().max_total_in_flight
    }

    fn begin_apply(&self, identity: &Identity) -> (Option<FakeFailure>, Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.apply_attempts += 1;
        let failure = inner.apply_failures.pop_front().flatten();

        let in_flight = inner.in_flight.entry(identity.clone()).or_default();
        *in_flight += 1;
        let in_flight = *in_flight;
        let max = inner.max_in_flight.entry(identity.clone()).or_default();
        *max = (*max).max(in_flight);
        inner.total_in_flight += 1;
        inner.max_total_in_flight =
            inner.max_total_in_flight.max(inner.total_in_flight);

        (failure, inner.apply_delay)
    }

    fn finish_apply(
        &self,
        identity: &Identity,
        operation: &Operation,
        failure: Option<FakeFailure>,
    ) -> Result<(), ApplyError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(in_flight) = inner.in_flight.get_mut(identity) {
                *in_flight -= 1;
            }
            inner.total_in_flight -= 1;

            match failure {
                Some(FakeFailure::Transient) => {
                    return Err(ApplyError::Transient(anyhow::anyhow!(
                        "simulated timeout"
                    )));
                }
                Some(FakeFailure::Fatal | FakeFailure::NotFound) => {
                    return Err(ApplyError::Fatal(anyhow::anyhow!(
                        "simulated rejection"
                    )));
                }
                None => (),
            }

            inner
                .records
                .entry(identity.clone())
                .or_insert_with(|| GrantRecord::empty(identity.clone()))
                .apply(operation);
            inner.applied.push((identity.clone(), operation.clone()));
        }

        if let Some(hook) = &*self.after_apply.lock().unwrap() {
            hook(identity, operation);
        }
        Ok(())
    }
}

impl ClusterAuthz for FakeCluster {
    async fn read_grants(
        &self,
        identity: &Identity,
    ) -> Result<GrantRecord, ReadGrantsError> {
        let mut inner = self.inner.lock().unwrap();
        *inner.reads.entry(identity.clone()).or_default() += 1;
        let failure = inner
            .read_failures
            .get_mut(identity)
            .and_then(|failures| failures.pop_front());
        match failure {
            Some(FakeFailure::Transient) => Err(ReadGrantsError::Transient(
                anyhow::anyhow!("simulated timeout"),
            )),
            Some(FakeFailure::Fatal) => Err(ReadGrantsError::Fatal(
                anyhow::anyhow!("simulated rejection"),
            )),
            Some(FakeFailure::NotFound) => Err(ReadGrantsError::NotFound),
            None => inner
                .records
                .get(identity)
                .cloned()
                .ok_or(ReadGrantsError::NotFound),
        }
    }

    async fn apply(
        &self,
        identity: &Identity,
        operation: &Operation,
    ) -> Result<(), ApplyError> {
        let (failure, delay) = self.begin_apply(identity);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.finish_apply(identity, operation, failure)
    }
}
