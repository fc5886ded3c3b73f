use std::path::Path;

use anyhow::{Result, anyhow};

use crate::error::AnalysisError;
use crate::pipeline::{AnalysisOptions, FirmwareAnalyzer};
use crate::report::{cli_output_path, render_text, write_json};

/// Analyzes one image from the command line. Ctrl-C stops the run; during
/// emulation the guest is shut down before returning.
pub async fn run_one_shot(
    analyzer: &FirmwareAnalyzer,
    firmware: &Path,
    dynamic: bool,
    json: bool,
) -> Result<()> {
    if !firmware.is_file() {
        return Err(anyhow!("Firmware file not found: {}", firmware.display()));
    }

    println!("🔍 Analyzing firmware: {}", firmware.display());

    let options = AnalysisOptions {
        dynamic,
        enrich: !json,
    };
    let cancel = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::warn!("Interrupt received, stopping analysis");
    };

    let outcome = match analyzer.analyze_image_until(firmware, options, cancel).await {
        Ok(outcome) => outcome,
        Err(AnalysisError::Cancelled) => {
            println!("Analysis cancelled");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!("✅ Scanned {} files", outcome.scanned_files);

    if json {
        let path = cli_output_path(firmware);
        write_json(&outcome.report, &path)?;
        println!("Results exported to {}", path.display());
    } else {
        println!("\n{}", render_text(&outcome.report, &outcome.cves));
    }

    Ok(())
}
