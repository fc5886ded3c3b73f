#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use firmscan::AnalysisResult;
use firmscan::config::DynamicConfig;
use firmscan::dynamic::{BootArtifacts, Emulator, EmulatorHandle};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Notify;

/// Test double that counts live guests instead of booting anything.
#[derive(Default)]
pub struct FakeEmulator {
    pub launches: AtomicUsize,
    pub live: Arc<AtomicUsize>,
    pub max_live: Arc<AtomicUsize>,
    pub terminated: Arc<AtomicBool>,
    pub launched: Arc<Notify>,
}

impl FakeEmulator {
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn was_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

pub struct FakeHandle {
    live: Arc<AtomicUsize>,
    terminated: Arc<AtomicBool>,
}

#[async_trait]
impl Emulator for FakeEmulator {
    async fn launch(&self, _artifacts: &BootArtifacts) -> AnalysisResult<Box<dyn EmulatorHandle>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let now_live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(now_live, Ordering::SeqCst);
        self.launched.notify_one();
        Ok(Box::new(FakeHandle {
            live: Arc::clone(&self.live),
            terminated: Arc::clone(&self.terminated),
        }))
    }
}

#[async_trait]
impl EmulatorHandle for FakeHandle {
    fn pid(&self) -> Option<u32> {
        None
    }

    async fn terminate(&mut self) -> AnalysisResult<()> {
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.terminated.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Drops a bannered kernel and a rootfs image into `dir`.
pub fn write_boot_files(dir: &Path) {
    std::fs::write(dir.join("vmlinux"), b"\x00\x01Linux version 4.4.198 (gcc)\x00").unwrap();
    std::fs::write(dir.join("rootfs.squashfs"), b"hsqs....").unwrap();
}

/// Guest config that scans exactly `port` on localhost and boots instantly.
pub fn config_for_port(port: u16) -> DynamicConfig {
    DynamicConfig {
        // Any binary that is certainly on PATH satisfies the presence check.
        emulator: "sh".to_string(),
        boot_grace: Duration::ZERO,
        first_port: port,
        last_port: port,
        probe_timeout: Duration::from_millis(500),
        fuzz_timeout: Duration::from_millis(500),
        ..DynamicConfig::default()
    }
}

/// Greets every connection with `reply`, then drains it until the peer hangs up.
pub async fn spawn_service(reply: &'static [u8]) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let _ = socket.write_all(reply).await;
                let mut buf = vec![0u8; 4096];
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                }
            });
        }
    });
    port
}
