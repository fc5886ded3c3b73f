use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use reqwest::Client;

use crate::config::Config;
use crate::dynamic::DynamicAnalysisOrchestrator;
use crate::error::{AnalysisError, AnalysisResult};
use crate::extract::Extractor;
use crate::feed::{CveMatch, VulnerabilityFeedCache, enrich};
use crate::report::{Report, ReportAggregator};
use crate::scan::{ParallelScanCoordinator, collect_scan_jobs};

#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisOptions {
    /// Boot the image and probe its services after the static scan.
    pub dynamic: bool,
    /// Look up CVEs for outdated libraries.
    pub enrich: bool,
}

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub report: Report,
    pub cves: Vec<CveMatch>,
    pub scanned_files: usize,
}

/// Extract, scan, optionally emulate, then aggregate.
pub struct FirmwareAnalyzer {
    config: Arc<Config>,
    extractor: Extractor,
    coordinator: ParallelScanCoordinator,
    feed: Arc<VulnerabilityFeedCache>,
    orchestrator: Arc<DynamicAnalysisOrchestrator>,
}

impl FirmwareAnalyzer {
    pub fn new(config: Arc<Config>, client: Client) -> Self {
        let feed = Arc::new(VulnerabilityFeedCache::from_config(&config, client));
        let orchestrator = Arc::new(DynamicAnalysisOrchestrator::qemu(config.dynamic.clone()));
        Self::with_parts(config, Extractor::detect(), feed, orchestrator)
    }

    pub fn with_parts(
        config: Arc<Config>,
        extractor: Extractor,
        feed: Arc<VulnerabilityFeedCache>,
        orchestrator: Arc<DynamicAnalysisOrchestrator>,
    ) -> Self {
        let coordinator = ParallelScanCoordinator::new(config.limits.chunk_size);
        Self {
            config,
            extractor,
            coordinator,
            feed,
            orchestrator,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn analyze_image(
        &self,
        firmware: &Path,
        options: AnalysisOptions,
    ) -> AnalysisResult<AnalysisOutcome> {
        self.analyze_image_until(firmware, options, std::future::pending::<()>())
            .await
    }

    /// Unpacks `firmware` into a scratch directory that is removed when the
    /// run ends, then analyzes the tree.
    pub async fn analyze_image_until<F>(
        &self,
        firmware: &Path,
        options: AnalysisOptions,
        cancel: F,
    ) -> AnalysisResult<AnalysisOutcome>
    where
        F: Future<Output = ()>,
    {
        let workdir = tempfile::Builder::new()
            .prefix("firmscan-")
            .tempdir()
            .map_err(|e| AnalysisError::Extraction(format!("cannot create work directory: {}", e)))?;
        let root = workdir.path().join("extracted");

        tracing::info!("Analyzing firmware {}", firmware.display());
        let method = self.extractor.extract(firmware, &root).await?;
        tracing::info!("Extraction finished ({:?})", method);

        self.analyze_tree_until(&root, options, cancel).await
    }

    pub async fn analyze_tree(
        &self,
        root: &Path,
        options: AnalysisOptions,
    ) -> AnalysisResult<AnalysisOutcome> {
        self.analyze_tree_until(root, options, std::future::pending::<()>())
            .await
    }

    /// Static scan of an extracted tree. Cancellation during the static phase
    /// aborts the run; during the dynamic phase it ends emulation early and the
    /// partial report is still produced.
    pub async fn analyze_tree_until<F>(
        &self,
        root: &Path,
        options: AnalysisOptions,
        cancel: F,
    ) -> AnalysisResult<AnalysisOutcome>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(cancel);

        let static_phase = async {
            let walk_root = root.to_path_buf();
            let limits = self.config.limits.clone();
            let jobs = tokio::task::spawn_blocking(move || collect_scan_jobs(&walk_root, &limits))
                .await
                .unwrap_or_else(|e| {
                    tracing::error!("File collection failed: {}", e);
                    Vec::new()
                });
            let scanned_files = jobs.len();
            (scanned_files, self.coordinator.scan(root, jobs).await)
        };

        let (scanned_files, mut findings) = tokio::select! {
            biased;
            _ = &mut cancel => return Err(AnalysisError::Cancelled),
            result = static_phase => result,
        };

        if options.dynamic {
            let session = self.orchestrator.run_until(root, &mut cancel).await;
            findings.extend(session.into_findings());
        }

        let cves = if options.enrich {
            enrich(&self.feed, &findings).await
        } else {
            Vec::new()
        };

        let report = ReportAggregator::new().aggregate(findings);
        tracing::info!(
            "Analysis complete: {} files scanned, {} static findings",
            scanned_files,
            report.static_count()
        );
        Ok(AnalysisOutcome {
            report,
            cves,
            scanned_files,
        })
    }
}
