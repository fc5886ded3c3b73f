use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{AnalysisError, AnalysisResult};

const KERNEL_NAME_HINTS: &[&str] = &["vmlinux", "kernel", "zimage"];
const ROOTFS_NAME_HINTS: &[&str] = &["rootfs", "squashfs", ".img", ".jffs2"];
const KERNEL_BANNER: &[u8] = b"Linux version";

/// Kernel and root filesystem handed to the emulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootArtifacts {
    pub kernel: PathBuf,
    pub rootfs: PathBuf,
}

/// Finds a bootable kernel and rootfs under an extracted firmware tree.
///
/// A kernel candidate must carry the `Linux version` banner. When the walk does
/// not turn up both pieces, the extractor's fixed outputs (`kernel.bin`,
/// `squashfs-root/`) at the tree root are used instead.
pub fn locate_boot_artifacts(root: &Path) -> AnalysisResult<BootArtifacts> {
    let mut kernel = None;
    let mut rootfs = None;

    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let name = entry.file_name().to_string_lossy().to_lowercase();

        if kernel.is_none()
            && KERNEL_NAME_HINTS.iter().any(|hint| name.contains(hint))
            && has_kernel_banner(entry.path())
        {
            kernel = Some(entry.path().to_path_buf());
        }
        if rootfs.is_none() && ROOTFS_NAME_HINTS.iter().any(|hint| name.contains(hint)) {
            rootfs = Some(entry.path().to_path_buf());
        }
        if kernel.is_some() && rootfs.is_some() {
            break;
        }
    }

    if kernel.is_none() || rootfs.is_none() {
        let squashfs_root = root.join("squashfs-root");
        if squashfs_root.exists() {
            rootfs = Some(squashfs_root);
        }
        let kernel_bin = root.join("kernel.bin");
        if kernel_bin.exists() {
            kernel = Some(kernel_bin);
        }
    }

    match (kernel, rootfs) {
        (Some(kernel), Some(rootfs)) => Ok(BootArtifacts { kernel, rootfs }),
        (kernel, rootfs) => Err(AnalysisError::EnvSetup(format!(
            "Could not find kernel and rootfs files (kernel: {}, rootfs: {})",
            if kernel.is_some() { "found" } else { "missing" },
            if rootfs.is_some() { "found" } else { "missing" },
        ))),
    }
}

fn has_kernel_banner(path: &Path) -> bool {
    match std::fs::read(path) {
        Ok(bytes) => bytes.windows(KERNEL_BANNER.len()).any(|w| w == KERNEL_BANNER),
        Err(e) => {
            tracing::debug!("Could not read kernel candidate {}: {}", path.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_kernel_needs_banner() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("zImage"), b"not a kernel").unwrap();
        fs::write(dir.path().join("rootfs.img"), b"fs").unwrap();
        assert!(locate_boot_artifacts(dir.path()).is_err());

        fs::write(dir.path().join("vmlinux"), b"\0\0Linux version 4.14.0\0").unwrap();
        let found = locate_boot_artifacts(dir.path()).unwrap();
        assert_eq!(found.kernel, dir.path().join("vmlinux"));
        assert_eq!(found.rootfs, dir.path().join("rootfs.img"));
    }

    #[test]
    fn test_fixed_outputs_fallback() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("squashfs-root")).unwrap();
        fs::write(dir.path().join("squashfs-root").join("busybox"), b"bin").unwrap();
        fs::write(dir.path().join("kernel.bin"), b"raw").unwrap();

        let found = locate_boot_artifacts(dir.path()).unwrap();
        assert_eq!(found.kernel, dir.path().join("kernel.bin"));
        assert_eq!(found.rootfs, dir.path().join("squashfs-root"));
    }
}
