use std::num::NonZeroUsize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::elf::inspect_elf;
use super::entropy::{EntropyAnomalyDetector, extract_strings};
use super::pattern_scanner::PatternScanner;
use super::{Finding, ScanJob, looks_binary};
use crate::error::{AnalysisError, AnalysisResult};

pub const DEFAULT_CHUNK_SIZE: usize = 50;

/// Fans scan jobs across a CPU-bounded pool and merges the findings in job order.
#[derive(Debug, Clone)]
pub struct ParallelScanCoordinator {
    workers: usize,
    chunk_size: usize,
}

impl Default for ParallelScanCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl ParallelScanCoordinator {
    pub fn new(chunk_size: usize) -> Self {
        let workers = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self::with_workers(workers, chunk_size)
    }

    pub fn with_workers(workers: usize, chunk_size: usize) -> Self {
        Self {
            workers: workers.max(1),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Scans every job. Findings refer to paths relative to `root`.
    pub async fn scan(&self, root: &Path, jobs: Vec<ScanJob>) -> Vec<Finding> {
        if jobs.is_empty() {
            return Vec::new();
        }

        let total_jobs = jobs.len();
        let root = Arc::new(root.to_path_buf());
        // One permit per worker keeps at most one chunk in flight per worker.
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut join_set: JoinSet<(usize, Vec<Finding>)> = JoinSet::new();

        let chunks: Vec<Vec<ScanJob>> = jobs
            .chunks(self.chunk_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        let chunk_count = chunks.len();

        for (chunk_idx, chunk) in chunks.into_iter().enumerate() {
            let permit = match Arc::clone(&permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    tracing::error!("Scan pool closed unexpectedly: {}", e);
                    break;
                }
            };
            let root = Arc::clone(&root);
            join_set.spawn_blocking(move || {
                let _permit = permit;
                let findings = scan_chunk(&root, &chunk);
                (chunk_idx, findings)
            });
        }

        let mut per_chunk: Vec<Vec<Finding>> = vec![Vec::new(); chunk_count];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, findings)) => per_chunk[idx] = findings,
                Err(e) => tracing::error!("Scan worker failed: {}", e),
            }
        }

        let findings: Vec<Finding> = per_chunk.into_iter().flatten().collect();
        tracing::info!(
            "Scanned {} files in {} chunks with {} workers: {} findings",
            total_jobs,
            chunk_count,
            self.workers,
            findings.len()
        );
        findings
    }
}

fn scan_chunk(root: &Path, chunk: &[ScanJob]) -> Vec<Finding> {
    let scanner = PatternScanner::new();
    let detector = EntropyAnomalyDetector::new();
    let mut findings = Vec::new();

    for job in chunk {
        let shown = display_name(root, &job.path);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            scan_one(&scanner, &detector, &shown, &job.path)
        }));
        match outcome {
            Ok(Ok(file_findings)) => findings.extend(file_findings),
            Ok(Err(e)) => tracing::debug!("{}", e),
            Err(_) => tracing::warn!("Scanner panicked on {}, skipping file", shown),
        }
    }

    findings
}

fn scan_one(
    scanner: &PatternScanner,
    detector: &EntropyAnomalyDetector,
    display: &str,
    path: &Path,
) -> AnalysisResult<Vec<Finding>> {
    let contents = std::fs::read(path).map_err(|source| AnalysisError::ScanFile {
        path: path.to_path_buf(),
        source,
    })?;

    let mut findings = scanner.scan_content(display, path, &contents);
    if looks_binary(&contents) {
        let strings = extract_strings(&contents);
        findings.extend(detector.detect(display, &contents, &strings));
        findings.extend(inspect_elf(display, &contents));
    }
    Ok(findings)
}

fn display_name(root: &Path, path: &Path) -> String {
    let relative: PathBuf = path
        .strip_prefix(root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf());
    relative.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_is_relative() {
        let name = display_name(Path::new("/tmp/fw"), Path::new("/tmp/fw/etc/passwd"));
        assert_eq!(name, "etc/passwd");
    }

    #[tokio::test]
    async fn test_empty_job_list() {
        let coordinator = ParallelScanCoordinator::with_workers(2, 50);
        assert!(coordinator.scan(Path::new("/nonexistent"), Vec::new()).await.is_empty());
    }
}
