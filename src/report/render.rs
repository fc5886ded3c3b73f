use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use super::aggregate::{Category, Report};
use crate::error::{AnalysisError, AnalysisResult};
use crate::feed::CveMatch;

const RULE: &str = "----------------------------------------";

/// Human-readable report. CVE context is appended when any is available.
pub fn render_text(report: &Report, cves: &[CveMatch]) -> String {
    if report.is_empty() {
        return "No significant vulnerabilities found.".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(out, "Vulnerability Summary\n{}", RULE);
    let _ = writeln!(out, "\nStatic Analysis Results:");

    for category in Category::ALL {
        let entries = report.entries(category);
        if entries.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n{} ({} found):", category.title(), entries.len());
        for entry in entries {
            let _ = writeln!(
                out,
                "  [{}] {}:{} - {}",
                entry.severity, entry.file, entry.line, entry.matched
            );
        }
    }

    if !cves.is_empty() {
        let _ = writeln!(out, "\nKnown CVEs for detected libraries:");
        for cve in cves {
            let _ = writeln!(
                out,
                "  {} ({}): {}",
                cve.cve_id,
                cve.library,
                crate::scan::truncate_chars(&cve.description, 160)
            );
        }
    }

    let dynamic = &report.dynamic;
    if !dynamic.is_empty() {
        let _ = writeln!(out, "\nDynamic Analysis Results:");
        if !dynamic.open_ports.is_empty() {
            let _ = writeln!(out, "  Open ports discovered: {:?}", dynamic.open_ports);
        }
        for result in &dynamic.fuzzing_results {
            let _ = writeln!(out, "  {}", result);
        }
        if !dynamic.timeline.is_empty() {
            let _ = writeln!(out, "\nDynamic Analysis Summary:\n{}", RULE);
            for line in &dynamic.timeline {
                let _ = writeln!(out, "{}", line);
            }
        }
    }

    out
}

/// `<stem>_<YYYYmmdd-HHMMSS>_results.json`, the name of an uploaded image's report.
pub fn results_file_name(firmware_name: &str, at: DateTime<Local>) -> String {
    let stem = Path::new(firmware_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "firmware".to_string());
    format!("{}_{}_results.json", stem, at.format("%Y%m%d-%H%M%S"))
}

/// `<stem>_vulnerabilities.json` next to the analyzed image.
pub fn cli_output_path(firmware: &Path) -> PathBuf {
    let stem = firmware
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "firmware".to_string());
    firmware.with_file_name(format!("{}_vulnerabilities.json", stem))
}

pub fn write_json(report: &Report, path: &Path) -> AnalysisResult<()> {
    let body = report.to_json_pretty().map_err(|e| AnalysisError::ReportIo {
        path: path.to_path_buf(),
        source: e.into(),
    })?;
    std::fs::write(path, body).map_err(|source| AnalysisError::ReportIo {
        path: path.to_path_buf(),
        source,
    })
}
