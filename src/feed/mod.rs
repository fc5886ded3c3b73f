pub mod cache;
pub mod nvd;

pub use self::cache::{CacheEntry, VulnerabilityFeedCache, normalize_query};
pub use self::nvd::{CveMatch, CveRecord, enrich, parse_cves};
