pub mod artifacts;
pub mod emulator;
pub mod fuzz;
pub mod probe;
pub mod session;

pub use self::artifacts::{BootArtifacts, locate_boot_artifacts};
pub use self::emulator::{Emulator, EmulatorHandle, QemuEmulator};
pub use self::session::{DynamicSession, SessionState};

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::DynamicConfig;
use crate::error::{AnalysisError, AnalysisResult};

/// Drives `Init -> EnvSetup -> Emulating -> BootWait -> PortScan -> Fuzz -> Teardown -> Done`.
///
/// Every guest forwards the same host port, so one orchestrator runs at most one
/// guest at a time, whichever image it boots. Whatever happens after launch, the
/// emulator is terminated before the session is returned.
pub struct DynamicAnalysisOrchestrator {
    emulator: Arc<dyn Emulator>,
    config: DynamicConfig,
    guest_slot: Mutex<()>,
}

impl DynamicAnalysisOrchestrator {
    pub fn new(emulator: Arc<dyn Emulator>, config: DynamicConfig) -> Self {
        Self {
            emulator,
            config,
            guest_slot: Mutex::new(()),
        }
    }

    pub fn qemu(config: DynamicConfig) -> Self {
        let emulator = Arc::new(QemuEmulator::new(&config));
        Self::new(emulator, config)
    }

    pub async fn run(&self, image_root: &Path) -> DynamicSession {
        self.run_until(image_root, std::future::pending::<()>()).await
    }

    /// Like `run`, but stops probing as soon as `cancel` resolves.
    pub async fn run_until<F>(&self, image_root: &Path, cancel: F) -> DynamicSession
    where
        F: Future<Output = ()>,
    {
        let _guest = match self.guest_slot.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::info!(
                    "Another emulator session is running, waiting to analyze {}",
                    image_root.display()
                );
                self.guest_slot.lock().await
            }
        };

        let mut session = DynamicSession::new();

        session.advance(SessionState::EnvSetup);
        session.log("Setting up emulation environment");
        let artifacts = match self.setup(image_root) {
            Ok(artifacts) => artifacts,
            Err(e) => {
                session.fail(e);
                return session;
            }
        };
        session.log(format!("Found kernel: {}", file_label(&artifacts.kernel)));
        session.log(format!("Found rootfs: {}", file_label(&artifacts.rootfs)));
        session.kernel = Some(artifacts.kernel.clone());
        session.rootfs = Some(artifacts.rootfs.clone());

        session.advance(SessionState::Emulating);
        session.log("Starting firmware emulation");
        let mut handle = match self.emulator.launch(&artifacts).await {
            Ok(handle) => handle,
            Err(e) => {
                session.fail(e);
                return session;
            }
        };

        tokio::pin!(cancel);
        let completed = tokio::select! {
            _ = self.probe_and_fuzz(&mut session) => true,
            _ = &mut cancel => false,
        };
        if !completed {
            session.log("Dynamic analysis cancelled");
        }

        session.advance(SessionState::Teardown);
        if let Err(e) = handle.terminate().await {
            session.log(format!("Emulator shutdown error: {}", e));
        }
        session.log(format!(
            "Dynamic analysis complete: {} open ports, {} fuzzing results",
            session.open_ports.len(),
            session.fuzz_findings.len()
        ));
        session.advance(SessionState::Done);
        session
    }

    fn setup(&self, image_root: &Path) -> AnalysisResult<BootArtifacts> {
        which::which(&self.config.emulator).map_err(|_| {
            AnalysisError::EnvSetup(format!(
                "{} not found on PATH. Install with: apt-get install qemu-system-arm",
                self.config.emulator
            ))
        })?;
        locate_boot_artifacts(image_root)
    }

    async fn probe_and_fuzz(&self, session: &mut DynamicSession) {
        let config = &self.config;

        session.advance(SessionState::BootWait);
        session.log(format!(
            "Waiting for system to boot ({}s)",
            config.boot_grace.as_secs()
        ));
        tokio::time::sleep(config.boot_grace).await;

        session.advance(SessionState::PortScan);
        session.log("Scanning for network services");
        session.open_ports = probe::scan_ports(
            &config.target_host,
            config.first_port..=config.last_port,
            config.probe_timeout,
            config.probe_concurrency,
        )
        .await;

        session.advance(SessionState::Fuzz);
        if session.open_ports.is_empty() {
            session.log("No open ports found for fuzzing");
            return;
        }
        session.log(format!("Found open ports: {:?}", session.open_ports));
        session.log("Starting service fuzzing");

        let results = fuzz::fuzz_ports(
            &config.target_host,
            &session.open_ports,
            &fuzz::default_corpus(),
            config.fuzz_timeout,
            config.fuzz_concurrency,
        )
        .await;
        if !results.is_empty() {
            session.log(format!("Found {} potential vulnerabilities", results.len()));
        }
        session.fuzz_findings.extend(results);
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
