use regex::Captures;
use std::collections::BTreeMap;
use tracing::{debug, trace};

use super::matcher::PatternMatcher;
use crate::definitions::CheckSpec;
use crate::hosts::HostDocument;
use crate::results::{Match, SearchResult};

/// Runs `check` against `host`.
///
/// In line mode the pattern is applied to each line separately; in multiline
/// mode it sees the whole document and a match is reported on the line where
/// it starts. A pattern that does not compile or a document that does not
/// decode yields a `Failed` result rather than an error.
pub fn execute(check: &CheckSpec, host: &HostDocument) -> SearchResult {
    let matcher = match PatternMatcher::for_check(check) {
        Ok(matcher) => matcher,
        Err(e) => {
            debug!("{} @ {}: {}", check.id, host.name, e);
            return SearchResult::failed(&check.id, &host.id, &host.name, e.to_string());
        }
    };

    let text = match host.text() {
        Ok(text) => text,
        Err(e) => {
            debug!("{} @ {}: {}", check.id, host.name, e);
            return SearchResult::failed(&check.id, &host.id, &host.name, e.to_string());
        }
    };

    let matches = if matcher.is_multiline() {
        find_in_document(check, &matcher, &text)
    } else {
        find_in_lines(check, &matcher, &text)
    };

    trace!(
        "{} @ {}: {} matches",
        check.id,
        host.name,
        matches.len()
    );
    SearchResult::completed(&check.id, &host.id, &host.name, matches)
}

fn find_in_lines(check: &CheckSpec, matcher: &PatternMatcher, text: &str) -> Vec<Match> {
    let mut matches = Vec::new();
    for (index, line) in text.lines().enumerate() {
        for caps in matcher.regex().captures_iter(line) {
            matches.push(to_match(check, matcher, &caps, index + 1));
        }
    }
    matches
}

fn find_in_document(check: &CheckSpec, matcher: &PatternMatcher, text: &str) -> Vec<Match> {
    let mut matches = Vec::new();
    // Line numbers are computed incrementally since matches arrive in order
    let mut line_number = 1;
    let mut counted_to = 0;
    for caps in matcher.regex().captures_iter(text) {
        let start = caps.get(0).map_or(0, |m| m.start());
        line_number += text.as_bytes()[counted_to..start]
            .iter()
            .filter(|&&b| b == b'\n')
            .count();
        counted_to = start;
        matches.push(to_match(check, matcher, &caps, line_number));
    }
    matches
}

fn to_match(
    check: &CheckSpec,
    matcher: &PatternMatcher,
    caps: &Captures<'_>,
    line_number: usize,
) -> Match {
    let mut fields = BTreeMap::new();
    for name in matcher.regex().capture_names().flatten() {
        // Groups that did not participate are left out
        if let Some(value) = caps.name(name) {
            fields.insert(name.to_string(), check.post_process(name, value.as_str()));
        }
    }

    Match {
        line_number,
        text: caps.get(0).map_or_else(String::new, |m| m.as_str().to_string()),
        fields,
    }
}
