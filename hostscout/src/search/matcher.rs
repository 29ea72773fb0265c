use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::sync::Arc;

use crate::definitions::CheckSpec;
use crate::errors::{ScanError, ScanResult};
use crate::metrics::ScanMetrics;

/// Upper bound on the compiled program size of a single check pattern
pub const REGEX_SIZE_LIMIT: usize = 16 * 1024 * 1024;

static PATTERN_CACHE: Lazy<DashMap<PatternKey, Arc<Regex>>> = Lazy::new(DashMap::new);

/// Everything that affects how a pattern compiles
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatternKey {
    pub pattern: String,
    pub multiline: bool,
    pub case_insensitive: bool,
}

impl PatternKey {
    pub fn new(pattern: impl Into<String>, multiline: bool, case_insensitive: bool) -> Self {
        Self {
            pattern: pattern.into(),
            multiline,
            case_insensitive,
        }
    }

    pub fn for_check(check: &CheckSpec) -> Self {
        Self::new(check.pattern.clone(), check.multiline, check.case_insensitive)
    }

    fn build(&self) -> ScanResult<Regex> {
        RegexBuilder::new(&self.pattern)
            .case_insensitive(self.case_insensitive)
            .multi_line(self.multiline)
            .dot_matches_new_line(self.multiline)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map_err(|e| ScanError::invalid_pattern(e.to_string()))
    }
}

/// A check's compiled pattern
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    regex: Arc<Regex>,
    multiline: bool,
}

impl PatternMatcher {
    /// Compiles (or fetches from the process-wide cache) the pattern for `key`
    pub fn new(key: &PatternKey) -> ScanResult<Self> {
        Self::lookup(key, None)
    }

    /// Like [`PatternMatcher::new`], recording cache hits and misses
    pub fn with_metrics(key: &PatternKey, metrics: &ScanMetrics) -> ScanResult<Self> {
        Self::lookup(key, Some(metrics))
    }

    fn lookup(key: &PatternKey, metrics: Option<&ScanMetrics>) -> ScanResult<Self> {
        let cached = PATTERN_CACHE.get(key).map(|entry| entry.clone());
        if let Some(metrics) = metrics {
            metrics.record_cache_operation(cached.is_some());
        }
        let regex = match cached {
            Some(regex) => regex,
            None => {
                let regex = Arc::new(key.build()?);
                PATTERN_CACHE.insert(key.clone(), regex.clone());
                regex
            }
        };

        Ok(Self {
            regex,
            multiline: key.multiline,
        })
    }

    pub fn for_check(check: &CheckSpec) -> ScanResult<Self> {
        Self::new(&PatternKey::for_check(check))
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub fn is_multiline(&self) -> bool {
        self.multiline
    }

    /// Names of the pattern's named capture groups, in pattern order
    pub fn capture_names(&self) -> Vec<String> {
        self.regex
            .capture_names()
            .flatten()
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(prefix: &str) -> String {
        format!(
            "{}_{}",
            prefix,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        )
    }

    #[test]
    fn test_capture_names() {
        let key = PatternKey::new(r"^(?P<key>\w+)\s*=\s*(?P<value>.*)$", false, false);
        let matcher = PatternMatcher::new(&key).unwrap();
        assert_eq!(matcher.capture_names(), vec!["key", "value"]);
        assert!(!matcher.is_multiline());
    }

    #[test]
    fn test_invalid_pattern() {
        let key = PatternKey::new(r"(unclosed", false, false);
        let err = PatternMatcher::new(&key).unwrap_err();
        assert!(matches!(err, ScanError::InvalidPattern(_)));
    }

    #[test]
    fn test_flags_affect_matching() {
        let insensitive = PatternMatcher::new(&PatternKey::new("permitrootlogin", false, true)).unwrap();
        assert!(insensitive.regex().is_match("PermitRootLogin yes"));

        let multiline = PatternMatcher::new(&PatternKey::new(r"^begin.*^end", true, false)).unwrap();
        assert!(multiline.regex().is_match("begin\nmiddle\nend\n"));
    }

    #[test]
    fn test_pattern_caching() {
        let pattern = unique("cache_probe");
        let metrics = ScanMetrics::new();
        let key = PatternKey::new(pattern.clone(), false, false);

        let _first = PatternMatcher::with_metrics(&key, &metrics).unwrap();
        assert_eq!(metrics.cache_hits(), 0);
        assert_eq!(metrics.cache_misses(), 1);

        let _second = PatternMatcher::with_metrics(&key, &metrics).unwrap();
        assert_eq!(metrics.cache_hits(), 1);
        assert_eq!(metrics.cache_misses(), 1);

        // Same text, different flags, is a different entry
        let other = PatternKey::new(pattern, false, true);
        let _third = PatternMatcher::with_metrics(&other, &metrics).unwrap();
        assert_eq!(metrics.cache_hits(), 1);
        assert_eq!(metrics.cache_misses(), 2);
    }
}
