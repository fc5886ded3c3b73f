use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::ScanLimits;

const SKIPPED_EXTENSIONS: &[&str] = &["jpg", "png", "gif", "mp3", "mp4"];

/// A file admitted into the scan set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanJob {
    pub path: PathBuf,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MediaExtension,
    TooSmall,
    TooLarge,
    BudgetExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Skipped(SkipReason),
}

/// Running admission state. Files are admitted first-come-first-served until the
/// cumulative size would pass the budget; from then on everything is rejected.
#[derive(Debug)]
pub struct AdmissionGate {
    limits: ScanLimits,
    admitted_bytes: u64,
    exhausted: bool,
}

impl AdmissionGate {
    pub fn new(limits: ScanLimits) -> Self {
        Self {
            limits,
            admitted_bytes: 0,
            exhausted: false,
        }
    }

    pub fn admitted_bytes(&self) -> u64 {
        self.admitted_bytes
    }

    pub fn consider(&mut self, path: &Path, size_bytes: u64) -> Admission {
        if self.exhausted {
            return Admission::Skipped(SkipReason::BudgetExhausted);
        }
        let is_media = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| SKIPPED_EXTENSIONS.contains(&ext.as_str()));
        if is_media {
            return Admission::Skipped(SkipReason::MediaExtension);
        }
        if size_bytes < self.limits.min_file_size {
            return Admission::Skipped(SkipReason::TooSmall);
        }
        if size_bytes > self.limits.max_file_size {
            return Admission::Skipped(SkipReason::TooLarge);
        }
        let total = self.admitted_bytes.saturating_add(size_bytes);
        if total > self.limits.total_budget {
            self.exhausted = true;
            return Admission::Skipped(SkipReason::BudgetExhausted);
        }
        self.admitted_bytes = total;
        Admission::Admitted
    }
}

/// Admits candidate `(path, size)` pairs in order.
pub fn admit<I>(candidates: I, limits: &ScanLimits) -> Vec<ScanJob>
where
    I: IntoIterator<Item = (PathBuf, u64)>,
{
    let mut gate = AdmissionGate::new(limits.clone());
    let mut jobs = Vec::new();
    for (path, size_bytes) in candidates {
        match gate.consider(&path, size_bytes) {
            Admission::Admitted => jobs.push(ScanJob { path, size_bytes }),
            Admission::Skipped(SkipReason::BudgetExhausted) => {
                tracing::warn!(
                    "Scan budget of {} bytes reached, remaining files are skipped",
                    limits.total_budget
                );
                break;
            }
            Admission::Skipped(reason) => {
                tracing::trace!("Skipping {}: {:?}", path.display(), reason);
            }
        }
    }
    jobs
}

/// Walks `root` in file-name order and admits regular files.
pub fn collect_scan_jobs(root: &Path, limits: &ScanLimits) -> Vec<ScanJob> {
    let candidates = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let size = entry.metadata().ok()?.len();
            Some((entry.into_path(), size))
        });

    let jobs = admit(candidates, limits);
    tracing::info!("Admitted {} files under {}", jobs.len(), root.display());
    jobs
}
