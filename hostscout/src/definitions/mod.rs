//! Check definitions.
//!
//! A check is a named regex with optional scoping to a producer, an OS
//! family and a Linux distribution. Definitions live in YAML files under a
//! root directory and may pull in other files with `include`:
//!
//! ```yaml
//! include:
//!   - common/base.yaml
//! checks:
//!   - id: ssh-permit-root-login
//!     target: linux
//!     producer: unix-collector
//!     pattern: '^\s*PermitRootLogin\s+(?P<value>\S+)'
//!     fields:
//!       value: [trim, lowercase]
//! ```
//!
//! See [`load_definitions`] for the merge rules.

mod loader;

pub use loader::{load_definitions, load_definitions_with_metrics, LoadWarning, LoadedDefinitions};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::classify::{Classification, Distribution, OsFamily, Producer};

/// Which hosts a check targets by OS family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Target {
    /// Family-agnostic: applies regardless of OS family
    #[default]
    Any,
    /// Applies only to hosts of this family
    Os(OsFamily),
}

impl TryFrom<String> for Target {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let value = value.trim().to_ascii_lowercase();
        if value == "any" {
            return Ok(Target::Any);
        }
        let family: OsFamily = serde_yaml::from_str(&value)
            .map_err(|_| format!("unknown target '{}'", value))?;
        if family == OsFamily::Unknown {
            return Err("'unknown' cannot be used as a check target".to_string());
        }
        Ok(Target::Os(family))
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        target.to_string()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Any => f.write_str("any"),
            Target::Os(family) => write!(f, "{}", family),
        }
    }
}

/// Post-processing applied to an extracted field value before storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRule {
    Trim,
    Lowercase,
    Uppercase,
    CollapseWhitespace,
    StripQuotes,
}

impl FieldRule {
    pub fn apply(&self, value: String) -> String {
        match self {
            FieldRule::Trim => value.trim().to_string(),
            FieldRule::Lowercase => value.to_lowercase(),
            FieldRule::Uppercase => value.to_uppercase(),
            FieldRule::CollapseWhitespace => value.split_whitespace().collect::<Vec<_>>().join(" "),
            FieldRule::StripQuotes => {
                let trimmed = value.trim();
                let stripped = ['"', '\'']
                    .iter()
                    .find_map(|q| {
                        trimmed
                            .strip_prefix(*q)
                            .and_then(|rest| rest.strip_suffix(*q))
                    })
                    .unwrap_or(trimmed);
                stripped.to_string()
            }
        }
    }
}

/// One named, immutable search definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSpec {
    pub id: String,
    #[serde(default)]
    pub target: Target,
    #[serde(default)]
    pub producer: Option<Producer>,
    #[serde(default)]
    pub distribution: Option<Distribution>,
    pub pattern: String,
    /// Match against the whole document instead of line by line
    #[serde(default)]
    pub multiline: bool,
    #[serde(default)]
    pub case_insensitive: bool,
    /// Named capture groups of the compiled pattern, in pattern order
    #[serde(default)]
    pub captures: Vec<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, Vec<FieldRule>>,
    #[serde(default)]
    pub description: Option<String>,
    /// The definition file this check came from
    #[serde(default)]
    pub source: PathBuf,
}

impl CheckSpec {
    /// Whether this check should run against a host with `classification`.
    ///
    /// Unknown producers and OS families never satisfy a scoped check, so a
    /// host that could not be classified only receives family-agnostic,
    /// unscoped checks.
    pub fn applies_to(&self, classification: &Classification) -> bool {
        if let Some(producer) = self.producer {
            if classification.producer != producer {
                return false;
            }
        }
        if let Target::Os(family) = self.target {
            if classification.os_family != family {
                return false;
            }
        }
        if let Some(distribution) = self.distribution {
            if classification.distribution != Some(distribution) {
                return false;
            }
        }
        true
    }

    /// Applies the declared post-processing rules for `field`
    pub fn post_process(&self, field: &str, value: &str) -> String {
        let mut value = value.to_string();
        if let Some(rules) = self.fields.get(field) {
            for rule in rules {
                value = rule.apply(value);
            }
        }
        value
    }
}
