use std::path::Path;

use super::credentials::{check_password_records, is_password_file};
use super::rules::RuleSet;
use super::{Finding, FindingKind, looks_binary, truncate_chars};
use crate::error::{AnalysisError, AnalysisResult};

/// Matches longer than this are almost always binary garbage.
pub const MAX_RAW_MATCH_LEN: usize = 200;
/// Stored match text length.
pub const MATCH_DISPLAY_LEN: usize = 60;

/// Applies the rule catalog to one file's content.
pub struct PatternScanner {
    rules: &'static RuleSet,
}

impl Default for PatternScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternScanner {
    pub fn new() -> Self {
        Self {
            rules: RuleSet::global(),
        }
    }

    /// Reads `path` and scans it. `display_name` is the path the findings refer to.
    pub fn scan_file(&self, display_name: &str, path: &Path) -> AnalysisResult<Vec<Finding>> {
        let contents = std::fs::read(path).map_err(|source| AnalysisError::ScanFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.scan_content(display_name, path, &contents))
    }

    pub fn scan_content(&self, display_name: &str, path: &Path, contents: &[u8]) -> Vec<Finding> {
        let text = String::from_utf8_lossy(contents);
        let is_text = !looks_binary(contents);
        let mut findings = Vec::new();

        if is_password_file(path) {
            findings.extend(check_password_records(display_name, &text));
        }

        let lines = LineIndex::new(&text);

        for rule in &self.rules.patterns {
            for m in rule.regex.find_iter(&text) {
                let matched = m.as_str();
                if matched.len() > MAX_RAW_MATCH_LEN {
                    continue;
                }
                if !is_text && !matched.chars().all(|c| (' '..='~').contains(&c)) {
                    continue;
                }
                findings.push(Finding::new(
                    rule.kind,
                    display_name,
                    lines.line_of(m.start()),
                    truncate_chars(matched.trim(), MATCH_DISPLAY_LEN),
                ));
            }
        }

        findings.extend(self.outdated_libraries(display_name, &text, &lines));

        tracing::trace!("{}: {} pattern findings", display_name, findings.len());
        findings
    }

    fn outdated_libraries(&self, display_name: &str, text: &str, lines: &LineIndex) -> Vec<Finding> {
        let mut findings = Vec::new();
        for lib in self.rules.libraries_present(text) {
            for version in lib.versions {
                if let Some(offset) = text.find(version) {
                    findings.push(Finding::new(
                        FindingKind::OutdatedLibrary,
                        display_name,
                        lines.line_of(offset),
                        format!("{} version {} - {}", lib.name, version, lib.reason),
                    ));
                }
            }
        }
        findings
    }
}

/// Byte offsets of every newline, for offset → line lookups.
struct LineIndex {
    newlines: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        Self {
            newlines: text
                .bytes()
                .enumerate()
                .filter_map(|(i, b)| (b == b'\n').then_some(i))
                .collect(),
        }
    }

    /// 1-based line number of `offset`.
    fn line_of(&self, offset: usize) -> u64 {
        (self.newlines.partition_point(|&nl| nl < offset) + 1) as u64
    }
}
