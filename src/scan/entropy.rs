use entropy::shannon_entropy;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{Finding, FindingKind, Severity, truncate_chars};

pub const CHUNK_SIZE: usize = 256;
const MIN_STRING_LEN: usize = 4;

/// A printable run pulled out of a binary, with its byte offset.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedString {
    pub offset: usize,
    pub text: String,
}

struct ExploitPattern {
    regex: Regex,
    confidence: f64,
}

static EXPLOIT_PATTERNS: Lazy<Vec<ExploitPattern>> = Lazy::new(|| {
    [
        (r"(?i)overflow", 0.9),
        (r"(?i)race\s*condition", 0.85),
        (r"(?i)use\s*after\s*free", 0.9),
        (r"(?i)double\s*free", 0.9),
        (r"(?i)memory\s*corruption", 0.85),
    ]
    .into_iter()
    .map(|(pattern, confidence)| ExploitPattern {
        regex: Regex::new(pattern).expect("Failed to compile exploit pattern"),
        confidence,
    })
    .collect()
});

/// Statistical detector for packed/encrypted regions and exploit vocabulary.
#[derive(Debug, Default, Clone, Copy)]
pub struct EntropyAnomalyDetector;

impl EntropyAnomalyDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(&self, source_file: &str, contents: &[u8], strings: &[ExtractedString]) -> Vec<Finding> {
        let mut findings = self.entropy_anomalies(source_file, contents);
        findings.extend(self.exploit_strings(source_file, strings));
        findings
    }

    /// Chunks whose entropy sits more than two standard deviations above the file mean.
    pub fn entropy_anomalies(&self, source_file: &str, contents: &[u8]) -> Vec<Finding> {
        let entropies = chunk_entropies(contents);
        let Some((mean, std_dev)) = mean_and_std_dev(&entropies) else {
            return Vec::new();
        };
        let threshold = mean + 2.0 * std_dev;

        entropies
            .iter()
            .enumerate()
            .filter(|&(_, &e)| e > threshold)
            .map(|(idx, &e)| {
                let offset = idx * CHUNK_SIZE;
                Finding::new(
                    FindingKind::AnomalousEntropy,
                    source_file,
                    offset as u64,
                    format!("Anomalous entropy pattern at offset {} ({:.2} bits/byte)", offset, e),
                )
                .with_severity(Severity::High)
                .with_confidence(1.0)
            })
            .collect()
    }

    pub fn exploit_strings(&self, source_file: &str, strings: &[ExtractedString]) -> Vec<Finding> {
        let mut findings = Vec::new();
        for s in strings {
            for pattern in EXPLOIT_PATTERNS.iter() {
                if !pattern.regex.is_match(&s.text) {
                    continue;
                }
                let severity = if pattern.confidence >= 0.9 {
                    Severity::High
                } else {
                    Severity::Medium
                };
                findings.push(
                    Finding::new(
                        FindingKind::ExploitPattern,
                        source_file,
                        s.offset as u64,
                        format!("Possible exploit pattern: {}", truncate_chars(&s.text, 100)),
                    )
                    .with_severity(severity)
                    .with_confidence(pattern.confidence),
                );
            }
        }
        findings
    }
}

/// Shannon entropy in bits per byte of each 256-byte chunk.
pub fn chunk_entropies(contents: &[u8]) -> Vec<f64> {
    contents
        .chunks(CHUNK_SIZE)
        .map(|chunk| f64::from(shannon_entropy(chunk)))
        .collect()
}

/// Population mean and standard deviation, `None` for an empty slice.
fn mean_and_std_dev(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}

/// Runs of printable ASCII of at least four bytes.
pub fn extract_strings(contents: &[u8]) -> Vec<ExtractedString> {
    let mut strings = Vec::new();
    let mut start = None;

    for (i, &byte) in contents.iter().enumerate() {
        let printable = byte.is_ascii_graphic() || byte == b' ' || byte == b'\t';
        match (printable, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                push_run(&mut strings, contents, s, i);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        push_run(&mut strings, contents, s, contents.len());
    }

    strings
}

fn push_run(out: &mut Vec<ExtractedString>, contents: &[u8], start: usize, end: usize) {
    if end - start < MIN_STRING_LEN {
        return;
    }
    let text = String::from_utf8_lossy(&contents[start..end]);
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        out.push(ExtractedString {
            offset: start,
            text: trimmed.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_strings_offsets() {
        let strings = extract_strings(b"\0\0hello\0ab\0world wide\x01");
        assert_eq!(strings.len(), 2);
        assert_eq!(strings[0], ExtractedString { offset: 2, text: "hello".to_string() });
        assert_eq!(strings[1].offset, 11);
        assert_eq!(strings[1].text, "world wide");
    }

    #[test]
    fn test_short_file_is_single_chunk() {
        assert_eq!(chunk_entropies(&[1, 2, 3]).len(), 1);
        assert!(chunk_entropies(&[]).is_empty());
    }

    #[test]
    fn test_mean_and_std_dev() {
        let (mean, sd) = mean_and_std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((mean - 5.0).abs() < 1e-9);
        assert!((sd - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_exploit_confidence_carried() {
        let strings = vec![ExtractedString { offset: 40, text: "heap Use After Free detected".to_string() }];
        let findings = EntropyAnomalyDetector::new().exploit_strings("bin/httpd", &strings);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].line_or_offset, 40);
        assert_eq!(findings[0].confidence, Some(0.9));
    }
}
