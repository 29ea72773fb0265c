/// Per-unit search results and their aggregation.
///
/// A [`SearchResult`] is owned by whoever received it last: the worker hands
/// it to the orchestrator, the orchestrator hands it to [`collect`], and the
/// aggregated list goes to the renderer. Nothing mutates a result after it
/// has been handed off.
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Represents a single match in a host document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    /// 1-based line on which the match starts
    pub line_number: usize,
    /// The raw matched text
    pub text: String,
    /// Post-processed named capture values
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// How a unit of work ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UnitStatus {
    Completed,
    /// Never dispatched because an interrupt arrived first
    Cancelled,
    /// Abandoned mid-flight by a forced interrupt
    Terminated,
    Failed { error: String },
}

impl UnitStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, UnitStatus::Completed)
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Completed => f.write_str("completed"),
            UnitStatus::Cancelled => f.write_str("cancelled"),
            UnitStatus::Terminated => f.write_str("terminated"),
            UnitStatus::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

/// The outcome of running one check against one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub check_id: String,
    pub host_id: String,
    pub host_name: String,
    pub matches: Vec<Match>,
    pub status: UnitStatus,
}

impl SearchResult {
    pub fn completed(
        check_id: impl Into<String>,
        host_id: impl Into<String>,
        host_name: impl Into<String>,
        matches: Vec<Match>,
    ) -> Self {
        Self {
            check_id: check_id.into(),
            host_id: host_id.into(),
            host_name: host_name.into(),
            matches,
            status: UnitStatus::Completed,
        }
    }

    /// A result that carries no matches, only a terminal status
    pub fn with_status(
        check_id: impl Into<String>,
        host_id: impl Into<String>,
        host_name: impl Into<String>,
        status: UnitStatus,
    ) -> Self {
        Self {
            check_id: check_id.into(),
            host_id: host_id.into(),
            host_name: host_name.into(),
            matches: Vec::new(),
            status,
        }
    }

    pub fn failed(
        check_id: impl Into<String>,
        host_id: impl Into<String>,
        host_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self::with_status(
            check_id,
            host_id,
            host_name,
            UnitStatus::Failed {
                error: error.into(),
            },
        )
    }

    pub fn has_findings(&self) -> bool {
        !self.matches.is_empty()
    }
}

/// Orders results by (check id, host id), independent of completion order.
///
/// The sort is stable and results are passed through untouched.
pub fn collect(results: impl IntoIterator<Item = SearchResult>) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = results.into_iter().collect();
    results.sort_by(|a, b| {
        a.check_id
            .cmp(&b.check_id)
            .then_with(|| a.host_id.cmp(&b.host_id))
    });
    results
}

/// Aggregate counters over a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total_units: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub terminated: usize,
    pub total_matches: usize,
    /// Distinct hosts with at least one match
    pub hosts_with_findings: usize,
}

impl RunSummary {
    pub fn from_results(results: &[SearchResult]) -> Self {
        let mut summary = RunSummary {
            total_units: results.len(),
            ..Default::default()
        };
        let mut hosts = HashSet::new();
        for result in results {
            match result.status {
                UnitStatus::Completed => summary.completed += 1,
                UnitStatus::Cancelled => summary.cancelled += 1,
                UnitStatus::Terminated => summary.terminated += 1,
                UnitStatus::Failed { .. } => summary.failed += 1,
            }
            summary.total_matches += result.matches.len();
            if result.has_findings() {
                hosts.insert(result.host_id.as_str());
            }
        }
        summary.hosts_with_findings = hosts.len();
        summary
    }

    /// Whether every unit ran to completion
    pub fn is_complete(&self) -> bool {
        self.completed == self.total_units
    }
}
