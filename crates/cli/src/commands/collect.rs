//! `coverkube collect`

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use colored::Colorize;
use coverkube_lib::{Orchestrator, Target};

use crate::output::{format_elapsed, print_info, print_success};

/// Ensure the output directory exists, creating it when missing.
///
/// A path that exists but is not a directory is rejected.
pub fn validate_output_dir(path: &str) -> Result<PathBuf> {
    let path = PathBuf::from(path);

    match std::fs::metadata(&path) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => bail!("Output path {} is not a directory", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            std::fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create output directory {}", path.display()))?;
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to inspect {}", path.display()));
        }
    }

    Ok(path)
}

/// Restart the target and copy its coverage data into `destination`
pub async fn run(orchestrator: &Orchestrator, target: &Target, destination: &Path) -> Result<()> {
    print_info(&format!("Collecting coverage data from {}", target));

    let report = orchestrator
        .collect(target, destination)
        .await
        .with_context(|| format!("Failed to collect coverage from {}", target))?;

    print_success(&format!(
        "Coverage data written to {} [{}]",
        report.destination.display(),
        format_elapsed(report.elapsed)
    ));
    println!(
        "  Inspect it with {}",
        format!("go tool covdata percent -i={}", report.destination.display()).cyan()
    );
    Ok(())
}
