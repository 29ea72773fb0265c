pub mod classify;
pub mod config;
pub mod definitions;
pub mod errors;
pub mod filters;
pub mod hosts;
pub mod metrics;
pub mod orchestrator;
pub mod results;
pub mod search;
pub mod worker;

pub use classify::{classify, Classification, Distribution, OsFamily, Producer};
pub use config::{CliOverrides, ScanConfig};
pub use definitions::{load_definitions, CheckSpec, LoadWarning, LoadedDefinitions, Target};
pub use errors::{ScanError, ScanResult};
pub use hosts::{enumerate_and_classify, CaptureBytes, EncodingMode, HostDocument, HostOptions};
pub use orchestrator::{
    plan, run_searches, InterruptHandle, InterruptStage, Notice, Orchestrator, ProcessLauncher,
    ProgressSink, ProgressUpdate, ThreadLauncher, WorkUnit, WorkerLauncher,
};
pub use results::{collect, Match, RunSummary, SearchResult, UnitStatus};
