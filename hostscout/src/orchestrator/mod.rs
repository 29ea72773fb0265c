//! Parallel orchestration of (check, host) units over a bounded worker pool.
//!
//! A run plans every applicable unit up front, then keeps exactly
//! `worker_count` units in flight, launching the next pending unit as each
//! one finishes. Interrupts arrive through an [`InterruptHandle`]:
//!
//! 1. the first cancels everything still pending and lets running units drain;
//! 2. the second abandons running units and returns at once;
//! 3. the third is left to the host process (see [`InterruptStage::Abort`]).
//!
//! Every planned unit ends up with exactly one [`SearchResult`].

mod interrupt;
mod launcher;
mod progress;

pub use interrupt::{InterruptHandle, InterruptStage};
pub use launcher::{
    Completion, ProcessLauncher, ThreadLauncher, UnitFn, WorkerHandle, WorkerLauncher,
};
pub use progress::{NoProgress, Notice, ProgressSink, ProgressUpdate};

use crossbeam_channel::{select, unbounded};
use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::definitions::CheckSpec;
use crate::hosts::HostDocument;
use crate::results::{self, SearchResult, UnitStatus};
use progress::{estimate_remaining, pad_label};

/// One check paired with one host it applies to
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub index: usize,
    pub check: Arc<CheckSpec>,
    pub host: Arc<HostDocument>,
}

impl WorkUnit {
    /// `"<check id> @ <host name>"`
    pub fn label(&self) -> String {
        format!("{} @ {}", self.check.id, self.host.name)
    }

    fn result_with(&self, status: UnitStatus) -> SearchResult {
        SearchResult::with_status(&self.check.id, &self.host.id, &self.host.name, status)
    }
}

/// Pairs every check with every host it applies to, check-major
pub fn plan(checks: &[Arc<CheckSpec>], hosts: &[Arc<HostDocument>]) -> Vec<WorkUnit> {
    let mut units = Vec::new();
    for check in checks {
        for host in hosts {
            if check.applies_to(&host.classification) {
                units.push(WorkUnit {
                    index: units.len(),
                    check: Arc::clone(check),
                    host: Arc::clone(host),
                });
            }
        }
    }
    units
}

/// Display width shared by every progress label of a run
pub fn label_width(units: &[WorkUnit]) -> usize {
    units
        .iter()
        .map(|unit| unit.label().chars().count())
        .max()
        .unwrap_or(0)
}

struct Running {
    unit: WorkUnit,
    handle: Box<dyn WorkerHandle>,
}

/// Per-run bookkeeping, owned by the coordinating thread
struct RunState<'a> {
    sink: &'a dyn ProgressSink,
    started: Instant,
    width: usize,
    total: usize,
    pending: VecDeque<WorkUnit>,
    in_flight: HashMap<usize, Running>,
    results: Vec<SearchResult>,
    completed: usize,
    cancelled: usize,
    drain_announced: bool,
}

impl RunState<'_> {
    fn finish(&mut self, unit: &WorkUnit, result: SearchResult) {
        self.results.push(result);
        self.completed += 1;

        let elapsed = self.started.elapsed();
        let remaining = self.total - self.completed - self.cancelled;
        self.sink.on_progress(&ProgressUpdate {
            label: pad_label(&unit.label(), self.width),
            completed: self.completed,
            cancelled: self.cancelled,
            in_flight: self.in_flight.len(),
            total: self.total,
            elapsed,
            estimated_remaining: estimate_remaining(elapsed, self.completed, remaining),
        });
    }

    /// Records every pending unit as cancelled, once
    fn cancel_pending(&mut self) {
        if self.drain_announced {
            return;
        }
        self.drain_announced = true;

        let cancelled = self.pending.len();
        for unit in self.pending.drain(..) {
            self.results.push(unit.result_with(UnitStatus::Cancelled));
        }
        self.cancelled += cancelled;
        info!(
            "Interrupt: {} pending units cancelled, {} draining",
            cancelled,
            self.in_flight.len()
        );
        self.sink.on_notice(&Notice::Interrupted {
            cancelled,
            draining: self.in_flight.len(),
        });
    }

    /// Abandons every running unit; their late replies are discarded
    fn terminate_in_flight(&mut self) {
        let terminated = self.in_flight.len();
        let mut running: Vec<Running> = self.in_flight.drain().map(|(_, r)| r).collect();
        running.sort_by_key(|r| r.unit.index);
        for mut entry in running {
            entry.handle.abandon();
            self.results
                .push(entry.unit.result_with(UnitStatus::Terminated));
        }
        warn!("Forced stop: {} running units abandoned", terminated);
        self.sink.on_notice(&Notice::Terminated { terminated });
    }
}

/// Drives units to completion over a pool of workers
pub struct Orchestrator {
    launcher: Arc<dyn WorkerLauncher>,
    worker_count: NonZeroUsize,
    interrupt: InterruptHandle,
}

impl Orchestrator {
    pub fn new(
        launcher: Arc<dyn WorkerLauncher>,
        worker_count: NonZeroUsize,
        interrupt: InterruptHandle,
    ) -> Self {
        Self {
            launcher,
            worker_count,
            interrupt,
        }
    }

    pub fn interrupt(&self) -> &InterruptHandle {
        &self.interrupt
    }

    /// Runs `units` and returns one result per unit, ordered by (check, host).
    ///
    /// Never fails: launch failures and crashed workers become `Failed`
    /// results, interrupts become `Cancelled` and `Terminated` ones.
    pub fn run(&self, units: Vec<WorkUnit>, sink: &dyn ProgressSink) -> Vec<SearchResult> {
        let (done_tx, done_rx) = unbounded::<Completion>();
        let wake_rx = self.interrupt.wake_receiver();

        let mut state = RunState {
            sink,
            started: Instant::now(),
            width: label_width(&units),
            total: units.len(),
            pending: units.into(),
            in_flight: HashMap::new(),
            results: Vec::new(),
            completed: 0,
            cancelled: 0,
            drain_announced: false,
        };
        debug!(
            "Running {} units on {} workers",
            state.total, self.worker_count
        );

        loop {
            if self.interrupt.is_force() {
                state.cancel_pending();
                state.terminate_in_flight();
                break;
            }
            if self.interrupt.is_requested() {
                state.cancel_pending();
            }

            while state.in_flight.len() < self.worker_count.get() && !self.interrupt.is_requested()
            {
                let Some(unit) = state.pending.pop_front() else {
                    break;
                };
                match self.launcher.launch(&unit, done_tx.clone()) {
                    Ok(handle) => {
                        state.in_flight.insert(unit.index, Running { unit, handle });
                    }
                    Err(e) => {
                        warn!("Failed to start {}: {}", unit.label(), e);
                        let result = unit.result_with(UnitStatus::Failed {
                            error: format!("failed to start worker: {}", e),
                        });
                        state.finish(&unit, result);
                    }
                }
            }

            if state.in_flight.is_empty() && state.pending.is_empty() {
                break;
            }

            // A wake-up only means the interrupt stage changed
            let completion = select! {
                recv(done_rx) -> completion => completion.ok(),
                recv(wake_rx) -> _ => None,
            };
            if let Some(completion) = completion {
                if let Some(running) = state.in_flight.remove(&completion.index) {
                    let result = accept(&running.unit, completion.result);
                    state.finish(&running.unit, result);
                }
            }
        }

        results::collect(state.results)
    }
}

/// Turns a worker's answer into the unit's result
fn accept(unit: &WorkUnit, reply: Result<SearchResult, String>) -> SearchResult {
    match reply {
        Ok(result) if result.check_id == unit.check.id && result.host_id == unit.host.id => result,
        Ok(result) => {
            warn!(
                "{}: worker answered for {} @ {}",
                unit.label(),
                result.check_id,
                result.host_name
            );
            unit.result_with(UnitStatus::Failed {
                error: "worker replied for a different unit".to_string(),
            })
        }
        Err(error) => {
            warn!("{}: {}", unit.label(), error);
            unit.result_with(UnitStatus::Failed { error })
        }
    }
}

/// Plans and runs every applicable (check, host) unit
pub fn run_searches(
    checks: &[Arc<CheckSpec>],
    hosts: &[Arc<HostDocument>],
    worker_count: NonZeroUsize,
    sink: &dyn ProgressSink,
    interrupt: &InterruptHandle,
    launcher: Arc<dyn WorkerLauncher>,
) -> Vec<SearchResult> {
    let units = plan(checks, hosts);
    info!(
        "Planned {} units from {} checks and {} hosts",
        units.len(),
        checks.len(),
        hosts.len()
    );
    Orchestrator::new(launcher, worker_count, interrupt.clone()).run(units, sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{Classification, OsFamily, Producer};
    use crate::definitions::Target;
    use crate::errors::{ScanError, ScanResult};
    use crate::hosts::EncodingMode;
    use crossbeam_channel::Sender;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn check(id: &str, target: Target) -> Arc<CheckSpec> {
        Arc::new(CheckSpec {
            id: id.to_string(),
            target,
            producer: None,
            distribution: None,
            pattern: "x".to_string(),
            multiline: false,
            case_insensitive: false,
            captures: vec![],
            fields: BTreeMap::new(),
            description: None,
            source: PathBuf::new(),
        })
    }

    fn host(name: &str, os_family: OsFamily) -> Arc<HostDocument> {
        let mut doc =
            HostDocument::from_bytes(name, format!("x {}\n", name).into_bytes(), EncodingMode::Lossy);
        doc.classification = Classification {
            os_family,
            producer: Producer::UnixCollector,
            distribution: None,
        };
        Arc::new(doc)
    }

    #[derive(Default)]
    struct Recorder {
        updates: Mutex<Vec<ProgressUpdate>>,
        notices: Mutex<Vec<Notice>>,
    }

    impl ProgressSink for Recorder {
        fn on_progress(&self, update: &ProgressUpdate) {
            self.updates.lock().unwrap().push(update.clone());
        }

        fn on_notice(&self, notice: &Notice) {
            self.notices.lock().unwrap().push(*notice);
        }
    }

    #[test]
    fn test_plan_respects_applicability() {
        let checks = vec![check("a", Target::Any), check("b", Target::Os(OsFamily::Linux))];
        let hosts = vec![host("h1", OsFamily::Linux), host("h2", OsFamily::Windows)];
        let units = plan(&checks, &hosts);
        let labels: Vec<_> = units.iter().map(WorkUnit::label).collect();
        assert_eq!(labels, vec!["a @ h1", "a @ h2", "b @ h1"]);
        assert!(units.iter().enumerate().all(|(i, u)| u.index == i));
    }

    #[test]
    fn test_label_width_counts_check_and_host() {
        let checks = vec![check("short", Target::Any), check("a-much-longer-id", Target::Any)];
        let hosts = vec![host("h1", OsFamily::Linux), host("long-host-name", OsFamily::Linux)];
        let units = plan(&checks, &hosts);
        assert_eq!(label_width(&units), "a-much-longer-id @ long-host-name".len());
        assert_eq!(label_width(&[]), 0);
    }

    #[test]
    fn test_run_reports_padded_monotonic_progress() {
        let checks = vec![check("a", Target::Any), check("bbbbbbbb", Target::Any)];
        let hosts = vec![host("h1", OsFamily::Linux), host("h2", OsFamily::Linux)];
        let units = plan(&checks, &hosts);
        let width = label_width(&units);

        let recorder = Recorder::default();
        let orchestrator = Orchestrator::new(
            Arc::new(ThreadLauncher::new()),
            NonZeroUsize::new(2).unwrap(),
            InterruptHandle::new(),
        );
        let results = orchestrator.run(units, &recorder);
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.status == UnitStatus::Completed));

        let updates = recorder.updates.lock().unwrap();
        assert_eq!(updates.len(), 4);
        for (i, update) in updates.iter().enumerate() {
            assert_eq!(update.completed, i + 1);
            assert_eq!(update.total, 4);
            assert_eq!(update.label.chars().count(), width);
            assert!(update.completed + update.cancelled + update.in_flight <= update.total);
        }
        assert_eq!(updates[3].estimated_remaining, Some(std::time::Duration::ZERO));
        assert!(recorder.notices.lock().unwrap().is_empty());
    }

    struct FailingLauncher;

    impl WorkerLauncher for FailingLauncher {
        fn launch(
            &self,
            _unit: &WorkUnit,
            _done: Sender<Completion>,
        ) -> ScanResult<Box<dyn WorkerHandle>> {
            Err(ScanError::worker_protocol("no workers today"))
        }
    }

    #[test]
    fn test_launch_failures_become_failed_results() {
        let checks = vec![check("a", Target::Any)];
        let hosts = vec![host("h1", OsFamily::Linux), host("h2", OsFamily::Linux)];
        let results = run_searches(
            &checks,
            &hosts,
            NonZeroUsize::new(1).unwrap(),
            &NoProgress,
            &InterruptHandle::new(),
            Arc::new(FailingLauncher),
        );
        assert_eq!(results.len(), 2);
        for result in &results {
            match &result.status {
                UnitStatus::Failed { error } => assert!(error.contains("no workers today")),
                other => panic!("unexpected status {:?}", other),
            }
        }
    }

    #[test]
    fn test_mismatched_reply_is_rejected() {
        let checks = vec![check("a", Target::Any)];
        let hosts = vec![host("h1", OsFamily::Linux)];
        let unit_fn: UnitFn = Arc::new(|_: &CheckSpec, _: &HostDocument| -> SearchResult {
            SearchResult::completed("other", "nobody", "nowhere", vec![])
        });
        let results = run_searches(
            &checks,
            &hosts,
            NonZeroUsize::new(1).unwrap(),
            &NoProgress,
            &InterruptHandle::new(),
            Arc::new(ThreadLauncher::with_unit(unit_fn)),
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].check_id, "a");
        assert!(matches!(results[0].status, UnitStatus::Failed { .. }));
    }

    #[test]
    fn test_interrupt_before_run_cancels_everything() {
        let checks = vec![check("a", Target::Any)];
        let hosts = vec![host("h1", OsFamily::Linux), host("h2", OsFamily::Linux)];
        let interrupt = InterruptHandle::new();
        interrupt.trigger();

        let recorder = Recorder::default();
        let results = run_searches(
            &checks,
            &hosts,
            NonZeroUsize::new(4).unwrap(),
            &recorder,
            &interrupt,
            Arc::new(ThreadLauncher::new()),
        );
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.status == UnitStatus::Cancelled));
        assert_eq!(
            *recorder.notices.lock().unwrap(),
            vec![Notice::Interrupted {
                cancelled: 2,
                draining: 0
            }]
        );
    }

    #[test]
    fn test_empty_plan() {
        let results = run_searches(
            &[],
            &[],
            NonZeroUsize::new(2).unwrap(),
            &NoProgress,
            &InterruptHandle::new(),
            Arc::new(ThreadLauncher::new()),
        );
        assert!(results.is_empty());
    }
}
