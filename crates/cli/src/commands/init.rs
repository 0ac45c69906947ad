//! `coverkube init`

use anyhow::{Context, Result};
use colored::Colorize;
use coverkube_lib::{Orchestrator, Target};

use crate::output::{print_info, print_success};

/// Provision the coverage claim and instrument the target
pub async fn run(orchestrator: &Orchestrator, target: &Target) -> Result<()> {
    print_info(&format!("Initializing coverage collection for {}", target));

    orchestrator
        .init(target)
        .await
        .with_context(|| format!("Failed to initialize {}", target))?;

    print_success("Coverage collection initialized");
    println!(
        "  Run {} once the workload has been exercised",
        "coverkube collect <OUTPUT_DIR>".cyan()
    );
    Ok(())
}
