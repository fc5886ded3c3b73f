use std::collections::BTreeSet;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::cache::VulnerabilityFeedCache;
use crate::scan::{Finding, FindingKind};

pub const MAX_MATCHES_PER_LIBRARY: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CveRecord {
    pub id: String,
    pub description: String,
}

/// A feed entry attached to a library named by an outdated-library finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CveMatch {
    pub library: String,
    pub cve_id: String,
    pub description: String,
}

/// Reads both the NVD 2.0 (`vulnerabilities`) and the legacy (`CVE_Items`) layouts.
pub fn parse_cves(payload: &Value) -> Vec<CveRecord> {
    let items = if let Some(items) = payload.get("vulnerabilities").and_then(|x| x.as_array()) {
        items
    } else if let Some(items) = payload.get("CVE_Items").and_then(|x| x.as_array()) {
        items
    } else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let cve = item.get("cve")?;
            let (id, description) = if let Some(id) = cve.get("id").and_then(|i| i.as_str()) {
                let description = cve
                    .get("descriptions")
                    .and_then(|arr| arr.as_array())
                    .and_then(|arr| {
                        arr.iter()
                            .find(|d| d.get("lang").and_then(|l| l.as_str()) == Some("en"))
                    })
                    .and_then(|d| d.get("value"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                (id, description)
            } else {
                let id = cve
                    .get("CVE_data_meta")
                    .and_then(|m| m.get("ID"))
                    .and_then(|i| i.as_str())?;
                let description = cve
                    .get("description")
                    .and_then(|d| d.get("description_data"))
                    .and_then(|arr| arr.as_array())
                    .and_then(|arr| arr.first())
                    .and_then(|d| d.get("value"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                (id, description)
            };
            Some(CveRecord {
                id: id.to_string(),
                description: description.to_string(),
            })
        })
        .collect()
}

/// Library names carried by outdated-library findings, e.g. `OpenSSL` from
/// `OpenSSL version 1.0.1 - Heartbleed...`.
pub fn outdated_library_names(findings: &[Finding]) -> BTreeSet<String> {
    findings
        .iter()
        .filter(|f| f.kind == FindingKind::OutdatedLibrary)
        .filter_map(|f| f.matched_text.split(" version ").next())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Looks up every outdated library in the feed. Libraries whose lookup fails are
/// left out; enrichment never fails the run.
pub async fn enrich(cache: &VulnerabilityFeedCache, findings: &[Finding]) -> Vec<CveMatch> {
    let libraries = outdated_library_names(findings);
    if libraries.is_empty() {
        return Vec::new();
    }

    let lookups = libraries.iter().map(|library| async move {
        let Some(payload) = cache.fetch(library).await else {
            return Vec::new();
        };
        let needle = library.to_lowercase();
        parse_cves(&payload)
            .into_iter()
            .filter(|cve| cve.description.to_lowercase().contains(&needle))
            .take(MAX_MATCHES_PER_LIBRARY)
            .map(|cve| CveMatch {
                library: library.clone(),
                cve_id: cve.id,
                description: cve.description,
            })
            .collect::<Vec<_>>()
    });

    let matches: Vec<CveMatch> = join_all(lookups).await.into_iter().flatten().collect();
    tracing::info!(
        "Enriched {} libraries with {} CVE records",
        libraries.len(),
        matches.len()
    );
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_nvd2_payload() {
        let payload = json!({
            "vulnerabilities": [
                {"cve": {"id": "CVE-2014-0160", "descriptions": [
                    {"lang": "es", "value": "nada"},
                    {"lang": "en", "value": "The TLS implementation in OpenSSL 1.0.1 ..."}
                ]}}
            ]
        });
        let records = parse_cves(&payload);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "CVE-2014-0160");
        assert!(records[0].description.starts_with("The TLS"));
    }

    #[test]
    fn test_parse_legacy_payload() {
        let payload = json!({
            "CVE_Items": [
                {"cve": {"CVE_data_meta": {"ID": "CVE-2011-2716"},
                         "description": {"description_data": [{"value": "BusyBox udhcpc ..."}]}}}
            ]
        });
        let records = parse_cves(&payload);
        assert_eq!(records[0].id, "CVE-2011-2716");
    }

    #[test]
    fn test_unknown_shape_is_empty() {
        assert!(parse_cves(&json!({"message": "rate limited"})).is_empty());
    }

    #[test]
    fn test_outdated_library_names() {
        let findings = vec![
            Finding::new(FindingKind::OutdatedLibrary, "lib/libssl.so", 3, "OpenSSL version 1.0.1 - Heartbleed"),
            Finding::new(FindingKind::OutdatedLibrary, "bin/busybox", 9, "BusyBox version 1.20 - old"),
            Finding::new(FindingKind::LibraryVersion, "bin/busybox", 9, "BusyBox v1.20"),
        ];
        let names: Vec<_> = outdated_library_names(&findings).into_iter().collect();
        assert_eq!(names, vec!["BusyBox".to_string(), "OpenSSL".to_string()]);
    }
}
