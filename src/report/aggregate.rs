use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::scan::{Finding, FindingKind, Severity};

/// Report section a static finding is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Credentials,
    Libraries,
    Injection,
    DangerousConfig,
    Services,
    PasswordFiles,
    Anomalies,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Credentials,
        Category::Libraries,
        Category::Injection,
        Category::DangerousConfig,
        Category::Services,
        Category::PasswordFiles,
        Category::Anomalies,
    ];

    pub fn for_kind(kind: FindingKind) -> Option<Category> {
        match kind {
            FindingKind::HardcodedCredentials | FindingKind::DefaultCredentials => {
                Some(Category::Credentials)
            }
            FindingKind::LibraryVersion
            | FindingKind::OutdatedLibrary
            | FindingKind::UnsafeLibrary => Some(Category::Libraries),
            FindingKind::CommandInjection | FindingKind::DangerousFunction => {
                Some(Category::Injection)
            }
            FindingKind::DangerousConfig => Some(Category::DangerousConfig),
            FindingKind::UnsafeService => Some(Category::Services),
            FindingKind::PasswordFile => Some(Category::PasswordFiles),
            FindingKind::AnomalousEntropy | FindingKind::ExploitPattern => {
                Some(Category::Anomalies)
            }
            FindingKind::OpenPort | FindingKind::FuzzResult | FindingKind::Timeline => None,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Category::Credentials => "Credentials",
            Category::Libraries => "Libraries",
            Category::Injection => "Injection",
            Category::DangerousConfig => "Dangerous Config",
            Category::Services => "Services",
            Category::PasswordFiles => "Password Files",
            Category::Anomalies => "Anomalies",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub file: String,
    pub line: u64,
    #[serde(rename = "match")]
    pub matched: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicReport {
    pub open_ports: Vec<u16>,
    pub fuzzing_results: Vec<String>,
    pub timeline: Vec<String>,
}

impl DynamicReport {
    pub fn is_empty(&self) -> bool {
        self.open_ports.is_empty() && self.fuzzing_results.is_empty() && self.timeline.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(rename = "static")]
    pub static_findings: BTreeMap<Category, Vec<ReportEntry>>,
    pub dynamic: DynamicReport,
}

impl Default for Report {
    fn default() -> Self {
        Self {
            static_findings: Category::ALL.iter().map(|c| (*c, Vec::new())).collect(),
            dynamic: DynamicReport::default(),
        }
    }
}

impl Report {
    pub fn static_count(&self) -> usize {
        self.static_findings.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.static_count() == 0 && self.dynamic.is_empty()
    }

    pub fn entries(&self, category: Category) -> &[ReportEntry] {
        self.static_findings
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Merges static and dynamic finding streams into one report.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReportAggregator;

impl ReportAggregator {
    pub fn new() -> Self {
        Self
    }

    /// The first finding seen for a dedup key wins; later duplicates are dropped
    /// even when their confidence differs.
    pub fn aggregate<I>(&self, findings: I) -> Report
    where
        I: IntoIterator<Item = Finding>,
    {
        let mut report = Report::default();
        let mut seen = HashSet::new();
        let mut open_ports = BTreeSet::new();
        let mut duplicates = 0usize;

        for finding in findings {
            if !seen.insert(finding.dedup_key()) {
                duplicates += 1;
                continue;
            }

            match finding.kind {
                FindingKind::OpenPort => match u16::try_from(finding.line_or_offset) {
                    Ok(port) => {
                        open_ports.insert(port);
                    }
                    Err(_) => tracing::warn!("Ignoring out-of-range port {}", finding.line_or_offset),
                },
                FindingKind::FuzzResult => report.dynamic.fuzzing_results.push(finding.matched_text),
                FindingKind::Timeline => report.dynamic.timeline.push(finding.matched_text),
                kind => {
                    if let Some(category) = Category::for_kind(kind) {
                        report.static_findings.entry(category).or_default().push(ReportEntry {
                            file: finding.source_file,
                            line: finding.line_or_offset,
                            matched: finding.matched_text,
                            severity: finding.severity.unwrap_or(Severity::Medium),
                        });
                    }
                }
            }
        }

        report.dynamic.open_ports = open_ports.into_iter().collect();
        tracing::debug!(
            "Aggregated {} static findings, dropped {} duplicates",
            report.static_count(),
            duplicates
        );
        report
    }
}
