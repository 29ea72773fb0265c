//! Host classification.
//!
//! A captured export is classified in three steps, each driven by an ordered
//! table of signature rules where the first match wins:
//!
//! 1. the producing tool or vendor, from content markers and then filename
//!    fallbacks;
//! 2. the operating-system family, using only the table for the detected
//!    producer;
//! 3. the distribution family, only for Linux hosts.
//!
//! Anything that cannot be resolved stays `Unknown` (or `None` for the
//! distribution). Classification is a pure function of the filename and the
//! decoded text, so the same bytes always classify the same way.

mod signatures;

pub use signatures::{DocumentView, Signature, SignatureRule};

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

/// Operating-system family of a captured host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Linux,
    Windows,
    Solaris,
    Aix,
    Hpux,
    Macos,
    Freebsd,
    Ios,
    Nxos,
    Junos,
    Fortios,
    Unknown,
}

/// Tool or vendor that produced a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Producer {
    UnixCollector,
    WindowsCollector,
    Cisco,
    Juniper,
    Fortinet,
    Unknown,
}

/// Linux distribution family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    Debian,
    Redhat,
    Suse,
    Alpine,
    Arch,
}

impl OsFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Linux => "linux",
            OsFamily::Windows => "windows",
            OsFamily::Solaris => "solaris",
            OsFamily::Aix => "aix",
            OsFamily::Hpux => "hpux",
            OsFamily::Macos => "macos",
            OsFamily::Freebsd => "freebsd",
            OsFamily::Ios => "ios",
            OsFamily::Nxos => "nxos",
            OsFamily::Junos => "junos",
            OsFamily::Fortios => "fortios",
            OsFamily::Unknown => "unknown",
        }
    }
}

impl Producer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Producer::UnixCollector => "unix-collector",
            Producer::WindowsCollector => "windows-collector",
            Producer::Cisco => "cisco",
            Producer::Juniper => "juniper",
            Producer::Fortinet => "fortinet",
            Producer::Unknown => "unknown",
        }
    }
}

impl Distribution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distribution::Debian => "debian",
            Distribution::Redhat => "redhat",
            Distribution::Suse => "suse",
            Distribution::Alpine => "alpine",
            Distribution::Arch => "arch",
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved classification tags for one host document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Classification {
    pub os_family: OsFamily,
    pub producer: Producer,
    #[serde(default)]
    pub distribution: Option<Distribution>,
}

impl Classification {
    /// A classification where nothing could be resolved
    pub fn unknown() -> Self {
        Self {
            os_family: OsFamily::Unknown,
            producer: Producer::Unknown,
            distribution: None,
        }
    }

    /// Documents with no known producer only receive family-agnostic checks
    pub fn is_producer_known(&self) -> bool {
        self.producer != Producer::Unknown
    }
}

impl Default for Classification {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.producer, self.os_family)?;
        if let Some(distribution) = self.distribution {
            write!(f, "/{}", distribution)?;
        }
        Ok(())
    }
}

/// Classifies a captured document by its filename and decoded text
pub fn classify(file_name: &str, text: &str) -> Classification {
    let view = DocumentView::new(file_name, text);

    let Some(producer) = first_match(signatures::producer_rules(), &view) else {
        trace!("No producer signature matched {}", file_name);
        return Classification::unknown();
    };

    let os_family = first_match(signatures::os_rules(producer), &view).unwrap_or(OsFamily::Unknown);

    let distribution = if os_family == OsFamily::Linux {
        first_match(signatures::distribution_rules(), &view)
    } else {
        None
    };

    let classification = Classification {
        os_family,
        producer,
        distribution,
    };
    trace!("Classified {} as {}", file_name, classification);
    classification
}

fn first_match<T: Copy>(rules: &[SignatureRule<T>], view: &DocumentView<'_>) -> Option<T> {
    rules.iter().find_map(|rule| rule.matches(view))
}
