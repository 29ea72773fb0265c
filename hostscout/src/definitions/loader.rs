use ignore::WalkBuilder;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use super::{CheckSpec, FieldRule, Target};
use crate::classify::{Distribution, Producer};
use crate::errors::{ScanError, ScanResult};
use crate::metrics::ScanMetrics;
use crate::search::matcher::{PatternKey, PatternMatcher};

const DEFINITION_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// A problem with one definition that did not stop the load
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadWarning {
    /// A later definition replaced an earlier one with the same id
    Overridden {
        id: String,
        previous: PathBuf,
        replacement: PathBuf,
    },
    /// The pattern failed to compile; the check was skipped
    InvalidPattern {
        id: String,
        source: PathBuf,
        error: String,
    },
    /// The file could not be read or parsed; it contributed nothing
    Unreadable { path: PathBuf, error: String },
    /// An include target does not exist
    MissingInclude { from: PathBuf, include: PathBuf },
    /// A check without an id was skipped
    EmptyIdentifier { source: PathBuf },
    /// A post-processing rule names a field the pattern does not capture
    UnknownField { id: String, field: String },
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadWarning::Overridden {
                id,
                previous,
                replacement,
            } => write!(
                f,
                "check '{}' from {} overridden by {}",
                id,
                previous.display(),
                replacement.display()
            ),
            LoadWarning::InvalidPattern { id, source, error } => write!(
                f,
                "check '{}' in {} skipped, invalid pattern: {}",
                id,
                source.display(),
                error
            ),
            LoadWarning::Unreadable { path, error } => {
                write!(f, "definition file {} skipped: {}", path.display(), error)
            }
            LoadWarning::MissingInclude { from, include } => write!(
                f,
                "{} includes missing file {}",
                from.display(),
                include.display()
            ),
            LoadWarning::EmptyIdentifier { source } => {
                write!(f, "check without an id skipped in {}", source.display())
            }
            LoadWarning::UnknownField { id, field } => write!(
                f,
                "check '{}' has rules for '{}', which is not a named capture group",
                id, field
            ),
        }
    }
}

/// Output of [`load_definitions`]
#[derive(Debug, Clone, Default)]
pub struct LoadedDefinitions {
    /// Merged checks, sorted by id
    pub checks: Vec<Arc<CheckSpec>>,
    pub warnings: Vec<LoadWarning>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DefinitionFile {
    #[serde(default)]
    include: Vec<PathBuf>,
    #[serde(default)]
    checks: Vec<CheckDefinition>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CheckDefinition {
    #[serde(default)]
    id: String,
    #[serde(default)]
    target: Target,
    #[serde(default)]
    producer: Option<Producer>,
    #[serde(default)]
    distribution: Option<Distribution>,
    pattern: String,
    #[serde(default)]
    multiline: bool,
    #[serde(default)]
    case_insensitive: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    fields: BTreeMap<String, Vec<FieldRule>>,
}

/// Loads every definition file under `root` into a flat set of checks.
///
/// Loading starts from the files nothing else includes, in sorted path order.
/// A file's `include` entries (relative to the including file) are loaded
/// depth-first before its own checks, and each file is loaded at most once.
/// Checks merge by id with the last one loaded winning, so an including file
/// overrides what it includes and `include: [a, b]` lets `b` override `a`
/// whatever the two files are called.
///
/// An include cycle aborts the load with [`ScanError::CircularInclude`].
/// Every other per-file or per-check problem becomes a [`LoadWarning`].
pub fn load_definitions(root: &Path) -> ScanResult<LoadedDefinitions> {
    load_definitions_with_metrics(root, &ScanMetrics::new())
}

/// Like [`load_definitions`], recording pattern cache use into `metrics`
pub fn load_definitions_with_metrics(
    root: &Path,
    metrics: &ScanMetrics,
) -> ScanResult<LoadedDefinitions> {
    if !root.is_dir() {
        return Err(ScanError::definitions_not_found(root));
    }
    info!("Loading check definitions from {}", root.display());

    let files: Vec<PathBuf> = discover_definition_files(root)
        .iter()
        .map(|path| normalize(path))
        .collect();
    debug!("Found {} definition files", files.len());

    let mut loader = Loader::new(metrics.clone());
    for file in &files {
        loader.parse(file);
    }

    // Files reachable only through a cycle still get visited, so the cycle
    // is reported instead of silently dropped.
    let included = loader.included_files();
    let (entry_points, included_only): (Vec<&PathBuf>, Vec<&PathBuf>) =
        files.iter().partition(|file| !included.contains(*file));
    trace!(
        "{} entry points, {} included files",
        entry_points.len(),
        included_only.len()
    );

    let mut stack = Vec::new();
    for file in entry_points.into_iter().chain(included_only) {
        loader.load_file(file, &mut stack)?;
    }

    let loaded = loader.finish();
    info!(
        "Loaded {} checks with {} warnings",
        loaded.checks.len(),
        loaded.warnings.len()
    );
    metrics.log_cache_stats();
    Ok(loaded)
}

fn discover_definition_files(root: &Path) -> Vec<PathBuf> {
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(true)
        .parents(false)
        .ignore(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false);

    let mut files: Vec<PathBuf> = builder
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable definition entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .map(|entry| entry.into_path())
        .filter(|path| is_definition_file(path))
        .collect();
    files.sort();
    files
}

fn is_definition_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            DEFINITION_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

fn normalize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn include_target(file: &Path, include: &Path) -> PathBuf {
    file.parent().unwrap_or_else(|| Path::new("")).join(include)
}

fn parse_definition_file(path: &Path) -> Result<DefinitionFile, String> {
    let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
    if content.trim().is_empty() {
        return Ok(DefinitionFile::default());
    }
    serde_yaml::from_str(&content).map_err(|e| e.to_string())
}

struct Loader {
    parsed: HashMap<PathBuf, Result<DefinitionFile, String>>,
    loaded: HashSet<PathBuf>,
    merged: HashMap<String, CheckSpec>,
    warnings: Vec<LoadWarning>,
    metrics: ScanMetrics,
}

impl Loader {
    fn new(metrics: ScanMetrics) -> Self {
        Self {
            parsed: HashMap::new(),
            loaded: HashSet::new(),
            merged: HashMap::new(),
            warnings: Vec::new(),
            metrics,
        }
    }

    fn parse(&mut self, path: &Path) {
        self.parsed
            .entry(path.to_path_buf())
            .or_insert_with(|| parse_definition_file(path));
    }

    /// Every existing file named by some parsed file's `include` list
    fn included_files(&self) -> HashSet<PathBuf> {
        self.parsed
            .iter()
            .filter_map(|(path, parsed)| parsed.as_ref().ok().map(|file| (path, file)))
            .flat_map(|(path, file)| {
                file.include
                    .iter()
                    .map(move |include| include_target(path, include))
            })
            .filter(|target| target.is_file())
            .map(|target| normalize(&target))
            .collect()
    }

    fn load_file(&mut self, path: &Path, stack: &mut Vec<PathBuf>) -> ScanResult<()> {
        let path = normalize(path);

        if let Some(start) = stack.iter().position(|p| *p == path) {
            let mut cycle = stack[start..].to_vec();
            cycle.push(path);
            return Err(ScanError::circular_include(cycle));
        }
        if self.loaded.contains(&path) {
            trace!("Already loaded {}", path.display());
            return Ok(());
        }

        let parsed = self
            .parsed
            .remove(&path)
            .unwrap_or_else(|| parse_definition_file(&path));
        let file = match parsed {
            Ok(file) => file,
            Err(error) => {
                warn!("Skipping definition file {}: {}", path.display(), error);
                self.warnings.push(LoadWarning::Unreadable {
                    path: path.clone(),
                    error,
                });
                self.loaded.insert(path);
                return Ok(());
            }
        };

        stack.push(path.clone());
        for include in &file.include {
            let target = include_target(&path, include);
            if !target.is_file() {
                warn!(
                    "{} includes missing file {}",
                    path.display(),
                    target.display()
                );
                self.warnings.push(LoadWarning::MissingInclude {
                    from: path.clone(),
                    include: target,
                });
                continue;
            }
            self.load_file(&target, stack)?;
        }
        stack.pop();

        trace!("Merging {} checks from {}", file.checks.len(), path.display());
        for definition in file.checks {
            self.add_check(definition, &path);
        }
        self.loaded.insert(path);
        Ok(())
    }

    fn add_check(&mut self, definition: CheckDefinition, source: &Path) {
        let id = definition.id.trim().to_string();
        if id.is_empty() {
            self.warnings.push(LoadWarning::EmptyIdentifier {
                source: source.to_path_buf(),
            });
            return;
        }

        let key = PatternKey::new(
            definition.pattern.clone(),
            definition.multiline,
            definition.case_insensitive,
        );
        let matcher = match PatternMatcher::with_metrics(&key, &self.metrics) {
            Ok(matcher) => matcher,
            Err(e) => {
                let error = match e {
                    ScanError::InvalidPattern(msg) => msg,
                    other => other.to_string(),
                };
                warn!("Check '{}' has an invalid pattern", id);
                self.warnings.push(LoadWarning::InvalidPattern {
                    id,
                    source: source.to_path_buf(),
                    error,
                });
                return;
            }
        };
        let captures = matcher.capture_names();

        let mut fields = definition.fields;
        let unknown: Vec<String> = fields
            .keys()
            .filter(|field| !captures.contains(field))
            .cloned()
            .collect();
        for field in unknown {
            fields.remove(&field);
            self.warnings.push(LoadWarning::UnknownField {
                id: id.clone(),
                field,
            });
        }

        let spec = CheckSpec {
            id: id.clone(),
            target: definition.target,
            producer: definition.producer,
            distribution: definition.distribution,
            pattern: definition.pattern,
            multiline: definition.multiline,
            case_insensitive: definition.case_insensitive,
            captures,
            fields,
            description: definition.description,
            source: source.to_path_buf(),
        };

        if let Some(previous) = self.merged.insert(id.clone(), spec) {
            debug!("Check '{}' overridden by {}", id, source.display());
            self.warnings.push(LoadWarning::Overridden {
                id,
                previous: previous.source,
                replacement: source.to_path_buf(),
            });
        }
    }

    fn finish(self) -> LoadedDefinitions {
        let mut checks: Vec<CheckSpec> = self.merged.into_values().collect();
        checks.sort_by(|a, b| a.id.cmp(&b.id));
        LoadedDefinitions {
            checks: checks.into_iter().map(Arc::new).collect(),
            warnings: self.warnings,
        }
    }
}
