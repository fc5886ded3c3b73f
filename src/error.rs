use std::path::PathBuf;

/// Failures raised inside the analysis pipeline.
///
/// `Extraction`, `ReportIo` and `Cancelled` end a run. The other variants are recovered
/// locally by the component that observes them.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("failed to scan {path}: {source}")]
    ScanFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("vulnerability feed unavailable: {0}")]
    FeedFetch(String),
    #[error("emulation environment setup failed: {0}")]
    EnvSetup(String),
    #[error("emulator failed: {0}")]
    Emulation(String),
    #[error("firmware extraction failed: {0}")]
    Extraction(String),
    #[error("analysis cancelled")]
    Cancelled,
    #[error("failed to write report {path}: {source}")]
    ReportIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
