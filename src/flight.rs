//! Single-flight guards: at most one in-flight run per operation kind.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use crate::errors::{EngineError, OperationKind};

/// Signals shared between a run and whoever wants to stop it.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    stop: CancellationToken,
    kill: CancellationToken,
}

impl RunControl {
    pub fn stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Cancelled when the in-flight external process should be terminated.
    pub fn kill_token(&self) -> &CancellationToken {
        &self.kill
    }

    /// Signals that fire with this run's, and may also fire on their own.
    pub fn child(&self) -> RunControl {
        RunControl {
            stop: self.stop.child_token(),
            kill: self.kill.child_token(),
        }
    }
}

#[derive(Debug)]
struct ActiveRun {
    id: u64,
    control: RunControl,
}

#[derive(Debug)]
pub struct SingleFlight {
    kind: OperationKind,
    active: Mutex<Option<ActiveRun>>,
    next_id: AtomicU64,
}

impl SingleFlight {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Claims the flag, or fails with `AlreadyRunning` without touching the current run.
    pub fn begin(&self) -> Result<FlightGuard<'_>, EngineError> {
        self.claim(RunControl::default())
    }

    /// Like [`begin`](Self::begin), but a stop or kill of `parent` also reaches this run.
    pub fn begin_within(&self, parent: &RunControl) -> Result<FlightGuard<'_>, EngineError> {
        self.claim(parent.child())
    }

    fn claim(&self, control: RunControl) -> Result<FlightGuard<'_>, EngineError> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.is_some() {
            return Err(EngineError::AlreadyRunning(self.kind));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *active = Some(ActiveRun {
            id,
            control: control.clone(),
        });
        tracing::debug!(operation = %self.kind, run = id, "single-flight acquired");
        Ok(FlightGuard {
            flight: self,
            id,
            control,
        })
    }

    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Clears the flag and asks the current run to stop before its next step.
    /// The external process of the current step keeps running.
    pub fn stop(&self) -> bool {
        match self.take() {
            Some(run) => {
                run.control.stop.cancel();
                tracing::info!(operation = %self.kind, run = run.id, "stop requested");
                true
            }
            None => false,
        }
    }

    /// Like [`stop`](Self::stop), and also terminates the in-flight external process.
    pub fn kill(&self) -> bool {
        match self.take() {
            Some(run) => {
                run.control.stop.cancel();
                run.control.kill.cancel();
                tracing::info!(operation = %self.kind, run = run.id, "kill requested");
                true
            }
            None => false,
        }
    }

    fn take(&self) -> Option<ActiveRun> {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn release(&self, id: u64) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        // A stopped run must not clear the flag of a run started after it.
        if active.as_ref().is_some_and(|run| run.id == id) {
            *active = None;
            tracing::debug!(operation = %self.kind, run = id, "single-flight released");
        }
    }
}

/// Held for the lifetime of one run; dropping it releases the flag.
#[derive(Debug)]
pub struct FlightGuard<'a> {
    flight: &'a SingleFlight,
    id: u64,
    control: RunControl,
}

impl FlightGuard<'_> {
    pub fn control(&self) -> &RunControl {
        &self.control
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flight.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_begin_is_rejected_until_release() {
        let flight = SingleFlight::new(OperationKind::Backup);
        let guard = flight.begin().expect("first run");
        assert!(flight.is_running());
        assert!(matches!(
            flight.begin(),
            Err(EngineError::AlreadyRunning(OperationKind::Backup))
        ));

        drop(guard);
        assert!(!flight.is_running());
        assert!(flight.begin().is_ok());
    }

    #[test]
    fn stop_clears_flag_and_flags_the_run() {
        let flight = SingleFlight::new(OperationKind::Restore);
        let guard = flight.begin().expect("first run");

        assert!(flight.stop());
        assert!(guard.control().stop_requested());
        assert!(!guard.control().kill_token().is_cancelled());
        assert!(!flight.is_running());
        assert!(!flight.stop());
    }

    #[test]
    fn stale_guard_does_not_release_newer_run() {
        let flight = SingleFlight::new(OperationKind::Backup);
        let stale = flight.begin().expect("first run");
        flight.stop();

        let current = flight.begin().expect("second run after stop");
        drop(stale);
        assert!(flight.is_running());
        drop(current);
        assert!(!flight.is_running());
    }

    #[test]
    fn nested_run_follows_its_parent() {
        let outer = SingleFlight::new(OperationKind::Restore);
        let inner = SingleFlight::new(OperationKind::Backup);
        let parent = outer.begin().expect("outer run");
        let nested = inner.begin_within(parent.control()).expect("nested run");

        assert!(outer.kill());
        assert!(nested.control().stop_requested());
        assert!(nested.control().kill_token().is_cancelled());
        // The nested run still owns its own flag until it unwinds.
        assert!(inner.is_running());
        drop(nested);
        assert!(!inner.is_running());
    }

    #[test]
    fn nested_stop_does_not_reach_the_parent() {
        let outer = SingleFlight::new(OperationKind::Restore);
        let inner = SingleFlight::new(OperationKind::Backup);
        let parent = outer.begin().expect("outer run");
        let _nested = inner.begin_within(parent.control()).expect("nested run");

        assert!(inner.stop());
        assert!(!parent.control().stop_requested());
        assert!(outer.is_running());
    }

    #[test]
    fn kill_cancels_the_kill_token() {
        let flight = SingleFlight::new(OperationKind::Backup);
        let guard = flight.begin().expect("run");
        assert!(flight.kill());
        assert!(guard.control().kill_token().is_cancelled());
        assert!(guard.control().stop_requested());
    }
}
