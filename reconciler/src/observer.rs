// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reporting what the reconciler does

use crate::pass::PassState;
use slog::debug;
use slog::error;
use slog::o;
use slog::warn;
use slog::Logger;
use workercluster_authz_types::Identity;

/// Something an observer may want to know about
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcilerEvent {
    Transition {
        identity: Identity,
        from: PassState,
        to: PassState,
    },
    AggregationWarning {
        identity: Identity,
        provider: String,
        message: String,
    },
    Failure {
        identity: Identity,
        transient: bool,
        message: String,
    },
}

impl ReconcilerEvent {
    pub fn identity(&self) -> &Identity {
        match self {
            ReconcilerEvent::Transition { identity, .. }
            | ReconcilerEvent::AggregationWarning { identity, .. }
            | ReconcilerEvent::Failure { identity, .. } => identity,
        }
    }
}

/// Receives [`ReconcilerEvent`]s as they happen
///
/// Called inline from reconciliation passes, so implementations shouldn't
/// block.
pub trait ReconcilerObserver: Send + Sync {
    fn record(&self, event: &ReconcilerEvent);
}

/// Observer that writes every event to a log
pub struct LogObserver {
    log: Logger,
}

impl LogObserver {
    pub fn new(log: &Logger) -> LogObserver {
        LogObserver { log: log.new(o!("component" => "ReconcilerObserver")) }
    }
}

impl ReconcilerObserver for LogObserver {
    fn record(&self, event: &ReconcilerEvent) {
        let log = &self.log;
        match event {
            ReconcilerEvent::Transition { identity, from, to } => {
                debug!(
                    log,
                    "state transition";
                    "identity" => %identity,
                    "from" => %from,
                    "to" => %to,
                );
            }
            ReconcilerEvent::AggregationWarning {
                identity,
                provider,
                message,
            } => {
                warn!(
                    log,
                    "requirements incomplete";
                    "identity" => %identity,
                    "provider" => provider,
                    "error" => message,
                );
            }
            ReconcilerEvent::Failure { identity, transient: true, message } => {
                warn!(
                    log,
                    "reconciliation failed";
                    "identity" => %identity,
                    "error" => message,
                );
            }
            ReconcilerEvent::Failure { identity, transient: false, message } => {
                error!(
                    log,
                    "reconciliation failed";
                    "identity" => %identity,
                    "error" => message,
                );
            }
        }
    }
}

#[cfg(any(test, feature = "testing"))]
pub use recording::RecordingObserver;

#[cfg(any(test, feature = "testing"))]
mod recording {
    use super::ReconcilerEvent;
    use super::ReconcilerObserver;
    use std::sync::Mutex;

    /// Observer that keeps every event for later inspection
    #[derive(Debug, Default)]
    pub struct RecordingObserver {
        events: Mutex<Vec<ReconcilerEvent>>,
    }

    impl RecordingObserver {
        pub fn new() -> RecordingObserver {
            RecordingObserver::default()
        }

        pub fn events(&self) -> Vec<ReconcilerEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn clear(&self) {
            self.events.lock().unwrap().clear();
        }
    }

    impl ReconcilerObserver for RecordingObserver {
        fn record(&self, event: &ReconcilerEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }
}
