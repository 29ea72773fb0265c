use crossbeam_channel::Sender;
use std::any::Any;
use std::ffi::OsString;
use std::io::{BufRead, BufReader};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, trace};

use super::WorkUnit;
use crate::definitions::CheckSpec;
use crate::errors::{ScanError, ScanResult};
use crate::hosts::HostDocument;
use crate::results::SearchResult;
use crate::search;
use crate::worker;

/// A finished unit, reported back to the coordinator
#[derive(Debug)]
pub struct Completion {
    pub index: usize,
    /// `Err` when the worker crashed or its reply could not be decoded
    pub result: Result<SearchResult, String>,
}

/// A unit that is running somewhere
pub trait WorkerHandle: Send {
    /// Stops caring about the unit. Best effort; must not block.
    fn abandon(&mut self);
}

/// Starts units; each launched unit eventually sends one [`Completion`]
/// unless it is abandoned first.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, unit: &WorkUnit, done: Sender<Completion>)
        -> ScanResult<Box<dyn WorkerHandle>>;
}

/// The function a [`ThreadLauncher`] runs for each unit
pub type UnitFn = Arc<dyn Fn(&CheckSpec, &HostDocument) -> SearchResult + Send + Sync>;

/// Runs each unit on its own detached thread.
///
/// Panics are caught and reported as failures. Abandoned threads cannot be
/// stopped; their results are simply dropped.
#[derive(Clone)]
pub struct ThreadLauncher {
    unit_fn: UnitFn,
}

impl ThreadLauncher {
    pub fn new() -> Self {
        Self::with_unit(Arc::new(search::execute))
    }

    pub fn with_unit(unit_fn: UnitFn) -> Self {
        Self { unit_fn }
    }
}

impl Default for ThreadLauncher {
    fn default() -> Self {
        Self::new()
    }
}

struct DetachedThread {
    index: usize,
}

impl WorkerHandle for DetachedThread {
    fn abandon(&mut self) {
        debug!("Abandoning in-process unit {}", self.index);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("worker panicked: {}", s)
    } else {
        "worker panicked".to_string()
    }
}

impl WorkerLauncher for ThreadLauncher {
    fn launch(
        &self,
        unit: &WorkUnit,
        done: Sender<Completion>,
    ) -> ScanResult<Box<dyn WorkerHandle>> {
        let index = unit.index;
        let check = Arc::clone(&unit.check);
        let host = Arc::clone(&unit.host);
        let unit_fn = Arc::clone(&self.unit_fn);

        thread::Builder::new()
            .name(format!("hostscout-unit-{}", index))
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| unit_fn(&check, &host)))
                    .map_err(panic_message);
                // The coordinator may already be gone after a forced stop
                let _ = done.send(Completion { index, result });
            })?;

        Ok(Box::new(DetachedThread { index }))
    }
}

/// Runs each unit in its own child process speaking the [`worker`] protocol
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Re-executes the running binary with `args` (typically its worker subcommand)
    pub fn current_exe(args: impl IntoIterator<Item = impl Into<OsString>>) -> ScanResult<Self> {
        Ok(Self::new(std::env::current_exe()?, args))
    }
}

struct ChildProcess {
    index: usize,
    child: Arc<Mutex<Child>>,
}

impl WorkerHandle for ChildProcess {
    fn abandon(&mut self) {
        // The lock is only held while reaping, after the reply was read;
        // that child is already on its way out.
        match self.child.try_lock() {
            Ok(mut child) => match child.kill() {
                Ok(()) => debug!("Killed worker for unit {}", self.index),
                Err(e) => trace!("Worker for unit {} already gone: {}", self.index, e),
            },
            Err(_) => trace!("Worker for unit {} is already exiting", self.index),
        }
    }
}

/// Waits for a child whose reply (or end of output) has been read
fn reap(child: &Mutex<Child>) -> Option<ExitStatus> {
    child.lock().ok()?.wait().ok()
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(
        &self,
        unit: &WorkUnit,
        done: Sender<Completion>,
    ) -> ScanResult<Box<dyn WorkerHandle>> {
        let index = unit.index;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ScanError::worker_protocol("worker stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ScanError::worker_protocol("worker stdout unavailable"))?;
        let stderr = child.stderr.take();
        let child = Arc::new(Mutex::new(child));

        if let Some(stderr) = stderr {
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    debug!("worker {}: {}", index, line);
                }
            });
        }

        let check = Arc::clone(&unit.check);
        let host = Arc::clone(&unit.host);
        let io_child = Arc::clone(&child);
        thread::Builder::new()
            .name(format!("hostscout-worker-{}", index))
            .spawn(move || {
                let outcome = worker::write_request(&mut stdin, &check, &host).and_then(|()| {
                    drop(stdin);
                    worker::read_reply(&mut BufReader::new(stdout))
                });
                let status = reap(&io_child);
                let result = outcome.map_err(|e| match status {
                    Some(status) if !status.success() => {
                        format!("{} (worker exited with {})", e, status)
                    }
                    _ => e.to_string(),
                });
                let _ = done.send(Completion { index, result });
            })?;

        Ok(Box::new(ChildProcess { index, child }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::Target;
    use crate::hosts::EncodingMode;
    use crate::results::UnitStatus;
    use crossbeam_channel::unbounded;
    use std::collections::BTreeMap;
    use std::time::{Duration, Instant};

    fn unit() -> WorkUnit {
        let check = CheckSpec {
            id: "a".to_string(),
            target: Target::Any,
            producer: None,
            distribution: None,
            pattern: "yes".to_string(),
            multiline: false,
            case_insensitive: false,
            captures: vec![],
            fields: BTreeMap::new(),
            description: None,
            source: PathBuf::new(),
        };
        let host = HostDocument::from_bytes("h1.txt", b"yes\n".to_vec(), EncodingMode::FailFast);
        WorkUnit {
            index: 7,
            check: Arc::new(check),
            host: Arc::new(host),
        }
    }

    #[test]
    fn test_thread_launcher_runs_unit() {
        let (tx, rx) = unbounded();
        let _handle = ThreadLauncher::new().launch(&unit(), tx).unwrap();
        let completion = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(completion.index, 7);
        let result = completion.result.unwrap();
        assert_eq!(result.status, UnitStatus::Completed);
        assert_eq!(result.matches.len(), 1);
    }

    #[test]
    fn test_thread_launcher_captures_panics() {
        let unit_fn: UnitFn = Arc::new(|_: &CheckSpec, _: &HostDocument| -> SearchResult {
            panic!("engine blew up")
        });
        let launcher = ThreadLauncher::with_unit(unit_fn);
        let (tx, rx) = unbounded();
        let _handle = launcher.launch(&unit(), tx).unwrap();
        let completion = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let err = completion.result.unwrap_err();
        assert!(err.contains("engine blew up"));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_launcher_reports_crash() {
        let launcher = ProcessLauncher::new("sh", ["-c", "cat > /dev/null; exit 3"]);
        let (tx, rx) = unbounded();
        let _handle = launcher.launch(&unit(), tx).unwrap();
        let completion = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        let err = completion.result.unwrap_err();
        assert!(err.contains("without a reply"), "{}", err);
        assert!(err.contains("exit"), "{}", err);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_launcher_rejects_garbled_reply() {
        let launcher = ProcessLauncher::new("sh", ["-c", "cat > /dev/null; echo garbage"]);
        let (tx, rx) = unbounded();
        let _handle = launcher.launch(&unit(), tx).unwrap();
        let completion = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(completion.result.unwrap_err().contains("undecodable reply"));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_abandon_kills_worker() {
        let launcher = ProcessLauncher::new("sh", ["-c", "exec sleep 30"]);
        let (tx, rx) = unbounded();
        let mut handle = launcher.launch(&unit(), tx).unwrap();
        handle.abandon();
        // The killed worker closes its pipes, so the io thread reports promptly
        let completion = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(completion.result.is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_process_abandon_does_not_wait_for_lingering_worker() {
        // Replies, then keeps running for a while before exiting
        let launcher = ProcessLauncher::new("sh", ["-c", "cat > /dev/null; echo garbage; exec sleep 2"]);
        let (tx, rx) = unbounded();
        let mut handle = launcher.launch(&unit(), tx).unwrap();
        std::thread::sleep(Duration::from_millis(300));

        let started = Instant::now();
        handle.abandon();
        assert!(started.elapsed() < Duration::from_secs(1));

        let completion = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(completion.result.unwrap_err().contains("undecodable reply"));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_exit_status_follows_reply() {
        let launcher = ProcessLauncher::new("sh", ["-c", "cat > /dev/null; echo garbage; exit 4"]);
        let (tx, rx) = unbounded();
        let _handle = launcher.launch(&unit(), tx).unwrap();
        let completion = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        let err = completion.result.unwrap_err();
        assert!(err.contains("undecodable reply"), "{}", err);
        assert!(err.contains("exit status: 4"), "{}", err);
    }

    #[test]
    fn test_spawn_failure_is_an_error() {
        let launcher = ProcessLauncher::new("/nonexistent/hostscout-worker", Vec::<OsString>::new());
        let (tx, _rx) = unbounded();
        assert!(launcher.launch(&unit(), tx).is_err());
    }
}
