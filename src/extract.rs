use std::ffi::OsStr;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use tokio::process::Command;
use walkdir::WalkDir;

use crate::error::{AnalysisError, AnalysisResult};

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b, 0x08];
const SQUASHFS_MAGICS: &[&[u8]] = &[b"hsqs", b"sqsh"];
const MAX_GZIP_CANDIDATES: usize = 16;
const MAX_DECOMPRESSED: u64 = 256 * 1024 * 1024;

/// How an image ended up on disk for scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    Binwalk,
    Archive,
    Carved,
    RawImage,
}

/// Unpacks a firmware image into a directory tree.
///
/// `binwalk` is used when it is installed. Otherwise (or when it produces
/// nothing) the image is unpacked as a tar archive, or has its gzip kernel and
/// SquashFS root carved out. As a last resort the raw image is copied so the
/// scanners still see its bytes.
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    binwalk: Option<PathBuf>,
    unsquashfs: Option<PathBuf>,
}

impl Extractor {
    /// Looks the helper tools up on `PATH`.
    pub fn detect() -> Self {
        let binwalk = which::which("binwalk").ok();
        let unsquashfs = which::which("unsquashfs").ok();
        if binwalk.is_none() {
            tracing::warn!("binwalk not found on PATH, falling back to built-in extraction");
        }
        Self { binwalk, unsquashfs }
    }

    /// Built-in extraction only.
    pub fn builtin() -> Self {
        Self::default()
    }

    pub async fn extract(&self, firmware: &Path, dest: &Path) -> AnalysisResult<ExtractionMethod> {
        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|e| AnalysisError::Extraction(format!("cannot create {}: {}", dest.display(), e)))?;

        if let Some(binwalk) = &self.binwalk {
            let args = [
                OsStr::new("-e"),
                OsStr::new("-M"),
                OsStr::new("-C"),
                dest.as_os_str(),
                firmware.as_os_str(),
            ];
            match run_tool(binwalk, &args).await {
                Ok(()) if has_files(dest) => {
                    tracing::info!("Extracted {} with binwalk", firmware.display());
                    return Ok(ExtractionMethod::Binwalk);
                }
                Ok(()) => tracing::warn!("binwalk produced no files, trying built-in extraction"),
                Err(e) => tracing::warn!("binwalk extraction failed: {}", e),
            }
        }

        let bytes = tokio::fs::read(firmware).await.map_err(|e| {
            AnalysisError::Extraction(format!("cannot read {}: {}", firmware.display(), e))
        })?;

        let dest_owned = dest.to_path_buf();
        let carved = tokio::task::spawn_blocking(move || builtin_extract(&bytes, &dest_owned))
            .await
            .map_err(|e| AnalysisError::Extraction(format!("extraction task failed: {}", e)))??;

        if let Some(image) = &carved.squashfs_image {
            self.unpack_squashfs(image, dest).await;
        }

        if let Some(method) = carved.method {
            if has_files(dest) {
                return Ok(method);
            }
        }

        let name = firmware
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "firmware.bin".into());
        tokio::fs::copy(firmware, dest.join(name))
            .await
            .map_err(|e| AnalysisError::Extraction(format!("cannot copy raw image: {}", e)))?;
        tracing::info!("No known container in {}, scanning raw image", firmware.display());
        Ok(ExtractionMethod::RawImage)
    }

    async fn unpack_squashfs(&self, image: &Path, dest: &Path) {
        let Some(unsquashfs) = &self.unsquashfs else {
            tracing::debug!("unsquashfs not available, leaving {} packed", image.display());
            return;
        };
        let target = dest.join("squashfs-root");
        let args = [OsStr::new("-d"), target.as_os_str(), image.as_os_str()];
        if let Err(e) = run_tool(unsquashfs, &args).await {
            tracing::warn!("unsquashfs failed: {}", e);
        }
    }
}

#[derive(Debug, Default)]
struct BuiltinOutcome {
    method: Option<ExtractionMethod>,
    squashfs_image: Option<PathBuf>,
}

fn builtin_extract(bytes: &[u8], dest: &Path) -> AnalysisResult<BuiltinOutcome> {
    let io_err = |e: std::io::Error| AnalysisError::Extraction(e.to_string());
    let mime = infer::get(bytes).map(|kind| kind.mime_type());

    match mime {
        Some("application/x-tar") => {
            Archive::new(Cursor::new(bytes)).unpack(dest).map_err(io_err)?;
            return Ok(BuiltinOutcome {
                method: Some(ExtractionMethod::Archive),
                squashfs_image: None,
            });
        }
        Some("application/gzip") => {
            let mut archive = Archive::new(GzDecoder::new(Cursor::new(bytes)));
            match archive.unpack(dest) {
                Ok(()) if has_files(dest) => {
                    return Ok(BuiltinOutcome {
                        method: Some(ExtractionMethod::Archive),
                        squashfs_image: None,
                    });
                }
                Ok(()) => {}
                Err(e) => tracing::debug!("gzip payload is not a tarball: {}", e),
            }
        }
        _ => {}
    }

    let mut outcome = BuiltinOutcome::default();

    if let Some(kernel) = carve_gzip(bytes) {
        std::fs::write(dest.join("kernel.bin"), kernel).map_err(io_err)?;
        outcome.method = Some(ExtractionMethod::Carved);
    }

    if let Some(offset) = find_squashfs(bytes) {
        let image = dest.join("rootfs.squashfs");
        std::fs::write(&image, &bytes[offset..]).map_err(io_err)?;
        tracing::debug!("Carved SquashFS image at offset {:#x}", offset);
        outcome.method = Some(ExtractionMethod::Carved);
        outcome.squashfs_image = Some(image);
    }

    Ok(outcome)
}

/// First embedded gzip stream that inflates cleanly.
fn carve_gzip(bytes: &[u8]) -> Option<Vec<u8>> {
    bytes
        .windows(GZIP_MAGIC.len())
        .enumerate()
        .filter(|(_, window)| *window == GZIP_MAGIC)
        .take(MAX_GZIP_CANDIDATES)
        .find_map(|(offset, _)| {
            let mut out = Vec::new();
            let mut decoder = GzDecoder::new(&bytes[offset..]).take(MAX_DECOMPRESSED);
            match decoder.read_to_end(&mut out) {
                Ok(_) if !out.is_empty() => {
                    tracing::debug!("Carved gzip stream at offset {:#x} ({} bytes)", offset, out.len());
                    Some(out)
                }
                _ => None,
            }
        })
}

fn find_squashfs(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(4)
        .position(|window| SQUASHFS_MAGICS.contains(&window))
}

fn has_files(dir: &Path) -> bool {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .any(|e| e.file_type().is_file())
}

async fn run_tool(program: &Path, args: &[&OsStr]) -> std::io::Result<()> {
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await?;
    if output.status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!(
            "{} exited with {}: {}",
            program.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}
