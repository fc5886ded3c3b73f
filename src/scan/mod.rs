// src/scan/mod.rs
pub mod admission;
pub mod coordinator;
pub mod credentials;
pub mod elf;
pub mod entropy;
pub mod pattern_scanner;
pub mod rules;

pub use self::admission::{Admission, ScanJob, SkipReason, collect_scan_jobs};
pub use self::coordinator::ParallelScanCoordinator;
pub use self::entropy::{EntropyAnomalyDetector, ExtractedString, extract_strings};
pub use self::pattern_scanner::PatternScanner;

use serde::{Deserialize, Serialize};

/// Longest match text a finding will carry.
pub const MAX_MATCH_LEN: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FindingKind {
    HardcodedCredentials,
    DefaultCredentials,
    CommandInjection,
    DangerousFunction,
    DangerousConfig,
    LibraryVersion,
    OutdatedLibrary,
    UnsafeLibrary,
    UnsafeService,
    PasswordFile,
    AnomalousEntropy,
    ExploitPattern,
    OpenPort,
    FuzzResult,
    Timeline,
}

impl FindingKind {
    pub fn label(&self) -> &'static str {
        match self {
            FindingKind::HardcodedCredentials => "Hardcoded Credentials",
            FindingKind::DefaultCredentials => "Default/Weak Credentials",
            FindingKind::CommandInjection => "Command Injection",
            FindingKind::DangerousFunction => "Dangerous Function",
            FindingKind::DangerousConfig => "Dangerous Config",
            FindingKind::LibraryVersion => "Library Version",
            FindingKind::OutdatedLibrary => "Outdated Library",
            FindingKind::UnsafeLibrary => "Potentially Unsafe Library",
            FindingKind::UnsafeService => "Unsafe Service",
            FindingKind::PasswordFile => "Password File",
            FindingKind::AnomalousEntropy => "Anomalous Entropy",
            FindingKind::ExploitPattern => "Exploit Pattern",
            FindingKind::OpenPort => "Open Port",
            FindingKind::FuzzResult => "Fuzz Result",
            FindingKind::Timeline => "Timeline",
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(
            self,
            FindingKind::OpenPort | FindingKind::FuzzResult | FindingKind::Timeline
        )
    }
}

/// One reported weakness instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub source_file: String,
    pub line_or_offset: u64,
    pub matched_text: String,
    pub severity: Option<Severity>,
    pub confidence: Option<f64>,
}

/// Identity used to collapse duplicate findings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub kind: FindingKind,
    pub source_file: String,
    pub line_or_offset: u64,
    pub matched_text: String,
}

impl Finding {
    pub fn new(
        kind: FindingKind,
        source_file: impl Into<String>,
        line_or_offset: u64,
        matched_text: impl AsRef<str>,
    ) -> Self {
        Self {
            kind,
            source_file: source_file.into(),
            line_or_offset,
            matched_text: truncate_chars(matched_text.as_ref(), MAX_MATCH_LEN),
            severity: None,
            confidence: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            kind: self.kind,
            source_file: self.source_file.clone(),
            line_or_offset: self.line_or_offset,
            matched_text: self.matched_text.clone(),
        }
    }
}

/// Truncates on a char boundary so multi-byte text never panics.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Cheap binary sniff: ELF magic or a NUL byte near the start.
pub fn looks_binary(contents: &[u8]) -> bool {
    if contents.starts_with(b"\x7fELF") {
        return true;
    }
    let head = &contents[..contents.len().min(8192)];
    head.contains(&0)
}
