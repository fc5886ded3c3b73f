use std::collections::BTreeSet;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const RESPONSE_LIMIT: usize = 1024;
const PAYLOAD_PREVIEW: usize = 20;
const SUSPICIOUS_MARKERS: &[&str] = &["error", "exception"];

/// Malformed inputs sent to every open service.
pub fn default_corpus() -> Vec<Vec<u8>> {
    vec![
        b"A".repeat(1000),
        b"%s".repeat(100),
        b"/../../../etc/passwd\x00".to_vec(),
        b"|cat /etc/passwd\x00".to_vec(),
        b"admin' OR '1'='1".to_vec(),
    ]
}

/// Sends each payload on a fresh connection. A payload that fails to connect,
/// times out or gets no suspicious answer contributes nothing; the rest still run.
pub async fn fuzz_port(host: &str, port: u16, corpus: &[Vec<u8>], timeout: Duration) -> Vec<String> {
    let mut findings = Vec::new();
    for payload in corpus {
        match tokio::time::timeout(timeout, exchange(host, port, payload)).await {
            Ok(Ok(response)) if is_suspicious(&response) => {
                findings.push(format!(
                    "Possible vulnerability on port {} with payload {}",
                    port,
                    preview(payload)
                ));
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::debug!("Fuzz payload to port {} failed: {}", port, e),
            Err(_) => tracing::debug!("Fuzz payload to port {} timed out", port),
        }
    }
    findings
}

/// Fuzzes several ports at once; results keep port order.
pub async fn fuzz_ports(
    host: &str,
    ports: &BTreeSet<u16>,
    corpus: &[Vec<u8>],
    timeout: Duration,
    concurrency: usize,
) -> Vec<String> {
    stream::iter(ports.iter().copied())
        .map(|port| fuzz_port(host, port, corpus, timeout))
        .buffered(concurrency.max(1))
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .flatten()
        .collect()
}

async fn exchange(host: &str, port: u16, payload: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut stream = TcpStream::connect((host, port)).await?;
    stream.write_all(payload).await?;
    let mut buf = vec![0u8; RESPONSE_LIMIT];
    let read = stream.read(&mut buf).await?;
    buf.truncate(read);
    Ok(buf)
}

fn is_suspicious(response: &[u8]) -> bool {
    let lower = String::from_utf8_lossy(response).to_lowercase();
    SUSPICIOUS_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn preview(payload: &[u8]) -> String {
    payload[..payload.len().min(PAYLOAD_PREVIEW)].escape_ascii().to_string()
}
