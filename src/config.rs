use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_FEED_URL: &str = "https://services.nvd.nist.gov/rest/json/cves/2.0";

/// Limits that decide which extracted files enter the scan set.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ScanLimits {
    pub min_file_size: u64,
    pub max_file_size: u64,
    pub total_budget: u64,
    pub chunk_size: usize,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            min_file_size: 64,
            max_file_size: 10_000_000,
            total_budget: 500 * 1024 * 1024,
            chunk_size: 50,
        }
    }
}

/// Knobs for the emulated-boot session.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DynamicConfig {
    pub emulator: String,
    pub target_host: String,
    pub boot_grace: Duration,
    pub first_port: u16,
    pub last_port: u16,
    pub probe_timeout: Duration,
    pub probe_concurrency: usize,
    pub fuzz_timeout: Duration,
    pub fuzz_concurrency: usize,
    pub forwarded_port: u16,
}

impl Default for DynamicConfig {
    fn default() -> Self {
        Self {
            emulator: "qemu-system-arm".to_string(),
            target_host: "127.0.0.1".to_string(),
            boot_grace: Duration::from_secs(30),
            first_port: 1,
            last_port: 9999,
            probe_timeout: Duration::from_secs(1),
            probe_concurrency: 50,
            fuzz_timeout: Duration::from_secs(2),
            fuzz_concurrency: 4,
            forwarded_port: 2222,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub cache_dir: PathBuf,
    pub cache_ttl: Duration,
    pub feed_url: String,
    pub nvd_api_key: Option<String>,
    pub limits: ScanLimits,
    pub dynamic: DynamicConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            cache_dir: default_cache_dir(),
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            feed_url: DEFAULT_FEED_URL.to_string(),
            nvd_api_key: None,
            limits: ScanLimits::default(),
            dynamic: DynamicConfig::default(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    home::home_dir()
        .map(|home| home.join(".firmscan").join("cache"))
        .unwrap_or_else(|| std::env::temp_dir().join("firmscan-cache"))
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", key, e)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let limits = ScanLimits {
            min_file_size: env_or("FIRMSCAN_MIN_FILE_SIZE", defaults.limits.min_file_size)?,
            max_file_size: env_or("FIRMSCAN_MAX_FILE_SIZE", defaults.limits.max_file_size)?,
            total_budget: env_or("FIRMSCAN_SCAN_BUDGET", defaults.limits.total_budget)?,
            chunk_size: defaults.limits.chunk_size,
        };
        if limits.min_file_size > limits.max_file_size {
            anyhow::bail!(
                "FIRMSCAN_MIN_FILE_SIZE ({}) exceeds FIRMSCAN_MAX_FILE_SIZE ({})",
                limits.min_file_size,
                limits.max_file_size
            );
        }

        let dynamic = DynamicConfig {
            emulator: std::env::var("FIRMSCAN_EMULATOR")
                .unwrap_or_else(|_| defaults.dynamic.emulator.clone()),
            boot_grace: Duration::from_secs(env_or(
                "FIRMSCAN_BOOT_GRACE_SECS",
                defaults.dynamic.boot_grace.as_secs(),
            )?),
            ..defaults.dynamic
        };

        // The feed credential only ever comes from the environment.
        let nvd_api_key = std::env::var("NVD_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());

        Ok(Config {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port)?,
            cache_dir: std::env::var("FIRMSCAN_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            cache_ttl: defaults.cache_ttl,
            feed_url: std::env::var("NVD_FEED_URL").unwrap_or(defaults.feed_url),
            nvd_api_key,
            limits,
            dynamic,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = ScanLimits::default();
        assert_eq!(limits.min_file_size, 64);
        assert_eq!(limits.max_file_size, 10_000_000);
        assert_eq!(limits.total_budget, 500 * 1024 * 1024);
        assert_eq!(limits.chunk_size, 50);
    }

    #[test]
    fn test_default_dynamic_timings() {
        let dynamic = DynamicConfig::default();
        assert_eq!(dynamic.boot_grace, Duration::from_secs(30));
        assert_eq!(dynamic.probe_timeout, Duration::from_secs(1));
        assert_eq!(dynamic.fuzz_timeout, Duration::from_secs(2));
        assert_eq!((dynamic.first_port, dynamic.last_port), (1, 9999));
    }

    #[test]
    fn test_default_has_no_feed_key() {
        let config = Config::default();
        assert!(config.nvd_api_key.is_none());
        assert_eq!(config.cache_ttl, Duration::from_secs(86_400));
    }
}
