use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use once_cell::sync::Lazy;
use regex::Regex;

use super::FindingKind;

/// A single compiled pattern and the kind of finding it produces.
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub kind: FindingKind,
    pub regex: Regex,
}

/// A library whose presence with one of the listed versions is reported as outdated.
#[derive(Debug, Clone)]
pub struct DangerousLibrary {
    pub name: &'static str,
    pub versions: &'static [&'static str],
    pub reason: &'static str,
}

/// Static catalog of detection rules, compiled once per process.
pub struct RuleSet {
    pub patterns: Vec<PatternRule>,
    pub libraries: Vec<DangerousLibrary>,
    library_names: AhoCorasick,
}

const HARDCODED_CREDENTIALS: &[&str] = &[
    r#"(?i)(?:password|passwd)\s*[=:]\s*['"]([^'"]{3,})['"]"#,
    r#"(?i)(?:username|user|login)\s*[=:]\s*['"]([^'"]{3,})['"]"#,
    r#"(?i)(?:pass|pwd)\s*[=:]\s*['"]([^'"]{3,})['"]"#,
    r#"(?i)admin_pass(?:word)?\s*[=:]\s*['"]([^'"]{3,})['"]"#,
    r#"(?i)api_key\s*[=:]\s*['"]([^'"]{8,})['"]"#,
    r#"(?i)(?:secret|token)\s*[=:]\s*['"]([^'"]{8,})['"]"#,
    r#"(?i)define\s+['"]?(?:PASSWORD|PASS|PWD)['"]?\s+['"]([^'"]{3,})['"]"#,
];

const COMMAND_INJECTION: &[&str] = &[
    r"system\s*\([^)]+\)",
    r"exec\s*\([^)]+\)",
    r"popen\s*\([^)]+\)",
    r"shell_exec\s*\([^)]+\)",
    r"eval\s*\([^)]+\)",
];

const DANGEROUS_FUNCTIONS: &[&str] = &[
    r"strcpy\s*\(",
    r"strcat\s*\(",
    r"gets\s*\(",
    r"scanf\s*\([^)]*%s[^)]*\)",
    r"printf\s*\([^)]*%n[^)]*\)",
];

const DANGEROUS_CONFIG: &[&str] = &[
    r"(?i)debug\s*[=:]\s*(true|1|yes)",
    r"(?i)auth\s*[=:]\s*(false|0|no)",
    r"(?i)ssl_verify\s*[=:]\s*(false|0|no)",
    r"(?i)check_cert\s*[=:]\s*(false|0|no)",
];

const LIBRARY_VERSIONS: &[&str] = &[
    r"lib([a-z]+)[.-]([0-9.]+)",
    r#"([a-z]+)_version[=: ]+["']?([0-9.]+)"#,
    r#"VERSION[=: ]+["']?([0-9.]+)"#,
    r"([a-z-]+) version ([0-9.]+)",
    r"([a-z-]+)-([0-9.]+)\.so",
];

const UNSAFE_LIBRARIES: &[&str] = &[
    r"libcrypt\.so\.[0-9]",
    r"libssl\.so\.[0-9]",
    r"libcrypto\.so\.[0-9]",
];

const UNSAFE_SERVICES: &[&str] = &[
    r"telnetd",
    r"ftpd",
    r"/bin/ash",
    r"/bin/dash",
    r"telnet\s+stream\s+tcp\s+nowait",
    r"ftp\s+stream\s+tcp\s+nowait",
    r"rsh\s+stream\s+tcp\s+nowait",
    r"/etc/init\.d/(telnet|ftp|rsh)",
    r"inetd\.conf",
];

const PASSWORD_FILES: &[&str] = &[
    r"/etc/passwd[\w.]*",
    r"/etc/shadow[\w.]*",
    r"password[._-]?backup",
    r"\.htpasswd",
];

const DANGEROUS_LIBRARIES: &[DangerousLibrary] = &[
    DangerousLibrary {
        name: "openssl",
        versions: &["0.9.", "1.0.0", "1.0.1", "1.0.2"],
        reason: "Multiple critical vulnerabilities including Heartbleed",
    },
    DangerousLibrary {
        name: "busybox",
        versions: &["1.1", "1.2", "1.3", "1.4", "1.5", "1.6"],
        reason: "Multiple command injection vulnerabilities",
    },
    DangerousLibrary {
        name: "dropbear",
        versions: &["0.", "2015", "2016", "2017"],
        reason: "Multiple authentication bypass vulnerabilities",
    },
    DangerousLibrary {
        name: "dnsmasq",
        versions: &["2.7", "2.6", "2.5"],
        reason: "Multiple RCE vulnerabilities",
    },
    DangerousLibrary {
        name: "uClibc",
        versions: &["0.9.32", "0.9.33"],
        reason: "Format string vulnerabilities and buffer overflows",
    },
    DangerousLibrary {
        name: "iptables",
        versions: &["1.4", "1.3"],
        reason: "Multiple security bypass vulnerabilities",
    },
    DangerousLibrary {
        name: "miniupnpd",
        versions: &["1.0", "1.1", "1.2", "1.3", "1.4"],
        reason: "Buffer overflow vulnerabilities",
    },
    DangerousLibrary {
        name: "thttpd",
        versions: &["2.25", "2.24"],
        reason: "Directory traversal vulnerabilities",
    },
    DangerousLibrary {
        name: "mt7628",
        versions: &["4l_v15", "4l_v14"],
        reason: "Known buffer overflow in Wi-Fi driver",
    },
];

static DEFAULT_RULES: Lazy<RuleSet> =
    Lazy::new(|| RuleSet::new().expect("Failed to compile built-in rule set"));

impl RuleSet {
    pub fn new() -> anyhow::Result<Self> {
        let groups: [(FindingKind, &[&str]); 8] = [
            (FindingKind::HardcodedCredentials, HARDCODED_CREDENTIALS),
            (FindingKind::CommandInjection, COMMAND_INJECTION),
            (FindingKind::DangerousFunction, DANGEROUS_FUNCTIONS),
            (FindingKind::DangerousConfig, DANGEROUS_CONFIG),
            (FindingKind::LibraryVersion, LIBRARY_VERSIONS),
            (FindingKind::UnsafeLibrary, UNSAFE_LIBRARIES),
            (FindingKind::UnsafeService, UNSAFE_SERVICES),
            (FindingKind::PasswordFile, PASSWORD_FILES),
        ];

        let mut patterns = Vec::new();
        for (kind, sources) in groups {
            for source in sources {
                patterns.push(PatternRule {
                    kind,
                    regex: Regex::new(source)?,
                });
            }
        }

        let libraries = DANGEROUS_LIBRARIES.to_vec();
        let library_names = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .build(libraries.iter().map(|lib| lib.name))?;

        Ok(Self {
            patterns,
            libraries,
            library_names,
        })
    }

    /// Shared, lazily compiled default catalog.
    pub fn global() -> &'static RuleSet {
        &DEFAULT_RULES
    }

    /// Dangerous libraries whose name occurs anywhere in `content`, ignoring ASCII case.
    pub fn libraries_present(&self, content: &str) -> Vec<&DangerousLibrary> {
        let mut seen = vec![false; self.libraries.len()];
        for m in self.library_names.find_overlapping_iter(content) {
            seen[m.pattern().as_usize()] = true;
        }
        self.libraries
            .iter()
            .zip(seen)
            .filter_map(|(lib, present)| present.then_some(lib))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_set_compiles() {
        let rules = RuleSet::new().unwrap();
        assert!(rules.patterns.len() > 30);
        assert_eq!(rules.libraries.len(), 9);
    }

    #[test]
    fn test_library_names_match_case_insensitively() {
        let rules = RuleSet::global();
        let found: Vec<_> = rules
            .libraries_present("linked against UCLIBC and OpenSSL")
            .into_iter()
            .map(|lib| lib.name)
            .collect();
        assert_eq!(found, vec!["openssl", "uClibc"]);
    }
}
