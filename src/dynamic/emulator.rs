use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use super::artifacts::BootArtifacts;
use crate::config::DynamicConfig;
use crate::error::{AnalysisError, AnalysisResult};

/// Boots a firmware image and hands back a handle that owns the running guest.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Emulator: Send + Sync {
    async fn launch(&self, artifacts: &BootArtifacts) -> AnalysisResult<Box<dyn EmulatorHandle>>;
}

/// A running guest. `terminate` stops it and waits for the process to exit.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmulatorHandle: Send {
    fn pid(&self) -> Option<u32>;
    async fn terminate(&mut self) -> AnalysisResult<()>;
}

/// `qemu-system-arm` on the `virt` machine with the guest's SSH port forwarded.
#[derive(Debug, Clone)]
pub struct QemuEmulator {
    program: String,
    forwarded_port: u16,
}

impl QemuEmulator {
    pub fn new(config: &DynamicConfig) -> Self {
        Self {
            program: config.emulator.clone(),
            forwarded_port: config.forwarded_port,
        }
    }

    pub fn args(&self, artifacts: &BootArtifacts) -> Vec<String> {
        vec![
            "-M".to_string(),
            "virt".to_string(),
            "-kernel".to_string(),
            artifacts.kernel.display().to_string(),
            "-drive".to_string(),
            format!("file={},format=raw", artifacts.rootfs.display()),
            "-append".to_string(),
            "root=/dev/vda console=ttyAMA0".to_string(),
            "-nographic".to_string(),
            "-net".to_string(),
            format!("user,hostfwd=tcp::{}-:22", self.forwarded_port),
            "-net".to_string(),
            "nic".to_string(),
        ]
    }
}

#[async_trait]
impl Emulator for QemuEmulator {
    async fn launch(&self, artifacts: &BootArtifacts) -> AnalysisResult<Box<dyn EmulatorHandle>> {
        let args = self.args(artifacts);
        tracing::debug!("Spawning {} {}", self.program, args.join(" "));

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AnalysisError::Emulation(format!("failed to spawn {}: {}", self.program, e)))?;

        Ok(Box::new(ProcessHandle { child }))
    }
}

/// Emulator process handle. Dropping it kills the child.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
}

#[async_trait]
impl EmulatorHandle for ProcessHandle {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn terminate(&mut self) -> AnalysisResult<()> {
        // Already exited: nothing to kill, just reap.
        if let Ok(Some(status)) = self.child.try_wait() {
            tracing::debug!("Emulator already exited with {}", status);
            return Ok(());
        }
        self.child
            .kill()
            .await
            .map_err(|e| AnalysisError::Emulation(format!("failed to stop emulator: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_qemu_command_line() {
        let emulator = QemuEmulator::new(&DynamicConfig::default());
        let args = emulator.args(&BootArtifacts {
            kernel: PathBuf::from("/fw/vmlinux"),
            rootfs: PathBuf::from("/fw/rootfs.img"),
        });
        assert_eq!(args[0..4], ["-M", "virt", "-kernel", "/fw/vmlinux"]);
        assert!(args.contains(&"file=/fw/rootfs.img,format=raw".to_string()));
        assert!(args.contains(&"user,hostfwd=tcp::2222-:22".to_string()));
    }

    #[tokio::test]
    async fn test_missing_binary_is_emulation_error() {
        let emulator = QemuEmulator {
            program: "firmscan-no-such-emulator".to_string(),
            forwarded_port: 2222,
        };
        let artifacts = BootArtifacts {
            kernel: PathBuf::from("k"),
            rootfs: PathBuf::from("r"),
        };
        assert!(matches!(
            emulator.launch(&artifacts).await,
            Err(AnalysisError::Emulation(_))
        ));
    }
}
