// src/lib.rs
use std::sync::Arc;
use std::time::Duration;

pub mod cli;
pub mod config;
pub mod dynamic;
pub mod error;
pub mod extract;
pub mod feed;
pub mod pipeline;
pub mod report;
pub mod routes;
pub mod scan;
pub mod server;

// Re-exported so integration tests can build state and routers directly.
pub use config::Config;
pub use error::{AnalysisError, AnalysisResult};
use pipeline::FirmwareAnalyzer;
use reqwest::Client;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub client: Client,
    pub analyzer: Arc<FirmwareAnalyzer>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let client = http_client()?;
        let config = Arc::new(config);
        let analyzer = Arc::new(FirmwareAnalyzer::new(Arc::clone(&config), client.clone()));
        Ok(Self {
            config,
            client,
            analyzer,
        })
    }

    pub fn with_analyzer(config: Arc<Config>, client: Client, analyzer: Arc<FirmwareAnalyzer>) -> Self {
        Self {
            config,
            client,
            analyzer,
        }
    }
}

/// Shared outbound client for the vulnerability feed.
pub fn http_client() -> anyhow::Result<Client> {
    let client = Client::builder()
        .user_agent(concat!("firmscan/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(30))
        .build()?;
    Ok(client)
}
