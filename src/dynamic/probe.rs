use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::net::TcpStream;

/// TCP connect scan. At most `concurrency` attempts are in flight; each gives up
/// after `timeout`.
pub async fn scan_ports(
    host: &str,
    ports: RangeInclusive<u16>,
    timeout: Duration,
    concurrency: usize,
) -> BTreeSet<u16> {
    stream::iter(ports)
        .map(|port| async move { probe_port(host, port, timeout).await.then_some(port) })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|open| async move { open })
        .collect()
        .await
}

pub async fn probe_port(host: &str, port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_listening_port_is_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(probe_port("127.0.0.1", port, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_scan_finds_only_bound_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let open = scan_ports("127.0.0.1", port..=port, Duration::from_secs(1), 4).await;
        assert_eq!(open.into_iter().collect::<Vec<_>>(), vec![port]);
    }
}
