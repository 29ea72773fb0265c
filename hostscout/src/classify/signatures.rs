use glob::{MatchOptions, Pattern};
use once_cell::sync::Lazy;
use regex::Regex;

use super::{Distribution, OsFamily, Producer};

const FILE_NAME_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// The parts of a document that signatures look at
#[derive(Debug, Clone, Copy)]
pub struct DocumentView<'a> {
    pub file_name: &'a str,
    pub text: &'a str,
}

impl<'a> DocumentView<'a> {
    pub fn new(file_name: &'a str, text: &'a str) -> Self {
        Self { file_name, text }
    }
}

/// A single piece of evidence about a document
#[derive(Debug, Clone)]
pub enum Signature {
    /// Case-insensitive glob over the file name
    FileName(Pattern),
    /// Regex over the decoded content
    Content(Regex),
}

impl Signature {
    fn file_name(glob: &str) -> Self {
        Signature::FileName(Pattern::new(glob).expect("invalid built-in file name signature"))
    }

    fn content(regex: &str) -> Self {
        Signature::Content(Regex::new(regex).expect("invalid built-in content signature"))
    }

    pub fn is_match(&self, view: &DocumentView<'_>) -> bool {
        match self {
            Signature::FileName(pattern) => pattern.matches_with(view.file_name, FILE_NAME_OPTIONS),
            Signature::Content(regex) => regex.is_match(view.text),
        }
    }
}

/// Tags a document with `tag` when `signature` matches
#[derive(Debug, Clone)]
pub struct SignatureRule<T> {
    pub tag: T,
    pub signature: Signature,
}

impl<T: Copy> SignatureRule<T> {
    pub fn new(tag: T, signature: Signature) -> Self {
        Self { tag, signature }
    }

    pub fn matches(&self, view: &DocumentView<'_>) -> Option<T> {
        self.signature.is_match(view).then_some(self.tag)
    }
}

// Content markers come before file name fallbacks so a misnamed capture is
// still attributed to the tool that wrote it.
static PRODUCER_RULES: Lazy<Vec<SignatureRule<Producer>>> = Lazy::new(|| {
    vec![
        SignatureRule::new(
            Producer::UnixCollector,
            Signature::content(r"(?mi)^#\s*collector:\s*unix-audit\b"),
        ),
        SignatureRule::new(
            Producer::WindowsCollector,
            Signature::content(r"(?mi)^#\s*collector:\s*windows-audit\b"),
        ),
        SignatureRule::new(
            Producer::Cisco,
            Signature::content(r"(?m)^(Building configuration\.\.\.|Current configuration : \d+ bytes|!Command: show running-config)"),
        ),
        SignatureRule::new(
            Producer::Juniper,
            Signature::content(r"(?m)^## Last (commit|changed): "),
        ),
        SignatureRule::new(
            Producer::Fortinet,
            Signature::content(r"(?m)^#config-version=F"),
        ),
        SignatureRule::new(Producer::UnixCollector, Signature::file_name("*.unix.txt")),
        SignatureRule::new(Producer::UnixCollector, Signature::file_name("*_unix.txt")),
        SignatureRule::new(Producer::WindowsCollector, Signature::file_name("*.win.txt")),
        SignatureRule::new(Producer::WindowsCollector, Signature::file_name("*_win.txt")),
        SignatureRule::new(Producer::Cisco, Signature::file_name("*running-config*")),
        SignatureRule::new(Producer::Juniper, Signature::file_name("*.junos.conf")),
    ]
});

static UNIX_OS_RULES: Lazy<Vec<SignatureRule<OsFamily>>> = Lazy::new(|| {
    vec![
        SignatureRule::new(OsFamily::Linux, Signature::content(r"(?m)^Linux\s")),
        SignatureRule::new(OsFamily::Solaris, Signature::content(r"(?m)^SunOS\s")),
        SignatureRule::new(OsFamily::Aix, Signature::content(r"(?m)^AIX\s")),
        SignatureRule::new(OsFamily::Hpux, Signature::content(r"(?m)^HP-UX\s")),
        SignatureRule::new(OsFamily::Macos, Signature::content(r"(?m)^Darwin\s")),
        SignatureRule::new(OsFamily::Freebsd, Signature::content(r"(?m)^FreeBSD\s")),
    ]
});

static WINDOWS_OS_RULES: Lazy<Vec<SignatureRule<OsFamily>>> = Lazy::new(|| {
    vec![
        SignatureRule::new(
            OsFamily::Windows,
            Signature::content(r"(?mi)^OS Name:\s+Microsoft Windows"),
        ),
        SignatureRule::new(
            OsFamily::Windows,
            Signature::content(r"Microsoft Windows \[Version \d"),
        ),
    ]
});

static CISCO_OS_RULES: Lazy<Vec<SignatureRule<OsFamily>>> = Lazy::new(|| {
    vec![
        SignatureRule::new(OsFamily::Nxos, Signature::content(r"(?i)\bNX-?OS\b")),
        SignatureRule::new(
            OsFamily::Nxos,
            Signature::content(r"(?m)^(feature\s+\S+|version\s+\S+\s+Bios:)"),
        ),
        SignatureRule::new(OsFamily::Ios, Signature::content(r"(?m)^version \d+\.\d+")),
    ]
});

static JUNIPER_OS_RULES: Lazy<Vec<SignatureRule<OsFamily>>> = Lazy::new(|| {
    vec![SignatureRule::new(
        OsFamily::Junos,
        Signature::content(r"(?m)^(set )?version \S+"),
    )]
});

static FORTINET_OS_RULES: Lazy<Vec<SignatureRule<OsFamily>>> = Lazy::new(|| {
    vec![SignatureRule::new(
        OsFamily::Fortios,
        Signature::content(r"(?m)^#config-version=F[A-Z0-9]+-\d"),
    )]
});

// os-release ID lines, then ID_LIKE lines, then release-file banners.
static DISTRIBUTION_RULES: Lazy<Vec<SignatureRule<Distribution>>> = Lazy::new(|| {
    vec![
        SignatureRule::new(
            Distribution::Debian,
            Signature::content(r#"(?m)^ID="?(debian|ubuntu|linuxmint|raspbian|kali|pop)"?\s*$"#),
        ),
        SignatureRule::new(
            Distribution::Redhat,
            Signature::content(r#"(?m)^ID="?(rhel|centos|fedora|rocky|almalinux|ol|amzn)"?\s*$"#),
        ),
        SignatureRule::new(
            Distribution::Suse,
            Signature::content(r#"(?m)^ID="?(sles|sled|opensuse|opensuse-leap|opensuse-tumbleweed)"?\s*$"#),
        ),
        SignatureRule::new(
            Distribution::Alpine,
            Signature::content(r#"(?m)^ID="?alpine"?\s*$"#),
        ),
        SignatureRule::new(
            Distribution::Arch,
            Signature::content(r#"(?m)^ID="?(arch|manjaro|endeavouros)"?\s*$"#),
        ),
        SignatureRule::new(
            Distribution::Debian,
            Signature::content(r"(?m)^ID_LIKE=.*\b(debian|ubuntu)\b"),
        ),
        SignatureRule::new(
            Distribution::Redhat,
            Signature::content(r"(?m)^ID_LIKE=.*\b(rhel|fedora|centos)\b"),
        ),
        SignatureRule::new(
            Distribution::Suse,
            Signature::content(r"(?m)^ID_LIKE=.*\b(suse|opensuse)\b"),
        ),
        SignatureRule::new(
            Distribution::Arch,
            Signature::content(r"(?m)^ID_LIKE=.*\barch\b"),
        ),
        SignatureRule::new(
            Distribution::Redhat,
            Signature::content(r"(Red Hat Enterprise Linux|CentOS Linux|CentOS Stream|Rocky Linux) release \d"),
        ),
        SignatureRule::new(
            Distribution::Suse,
            Signature::content(r"SUSE Linux Enterprise Server \d"),
        ),
    ]
});

pub(crate) fn producer_rules() -> &'static [SignatureRule<Producer>] {
    &PRODUCER_RULES
}

pub(crate) fn os_rules(producer: Producer) -> &'static [SignatureRule<OsFamily>] {
    match producer {
        Producer::UnixCollector => &UNIX_OS_RULES,
        Producer::WindowsCollector => &WINDOWS_OS_RULES,
        Producer::Cisco => &CISCO_OS_RULES,
        Producer::Juniper => &JUNIPER_OS_RULES,
        Producer::Fortinet => &FORTINET_OS_RULES,
        Producer::Unknown => &[],
    }
}

pub(crate) fn distribution_rules() -> &'static [SignatureRule<Distribution>] {
    &DISTRIBUTION_RULES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_signature_ignores_case() {
        let signature = Signature::file_name("*.unix.txt");
        assert!(signature.is_match(&DocumentView::new("HOST01.UNIX.TXT", "")));
        assert!(!signature.is_match(&DocumentView::new("host01.txt", "")));
    }

    #[test]
    fn test_rule_returns_tag_only_on_match() {
        let rule = SignatureRule::new(OsFamily::Aix, Signature::content(r"(?m)^AIX\s"));
        assert_eq!(rule.matches(&DocumentView::new("x", "AIX host 3 7\n")), Some(OsFamily::Aix));
        assert_eq!(rule.matches(&DocumentView::new("x", "not aix\n")), None);
    }

    #[test]
    fn test_unknown_producer_has_no_os_rules() {
        assert!(os_rules(Producer::Unknown).is_empty());
        assert!(!os_rules(Producer::Cisco).is_empty());
    }

    #[test]
    fn test_builtin_tables_compile() {
        assert!(!producer_rules().is_empty());
        assert!(!distribution_rules().is_empty());
        for producer in [
            Producer::UnixCollector,
            Producer::WindowsCollector,
            Producer::Cisco,
            Producer::Juniper,
            Producer::Fortinet,
        ] {
            assert!(!os_rules(producer).is_empty());
        }
    }
}
