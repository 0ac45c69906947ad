//! `coverkube clear`

use anyhow::{Context, Result};
use coverkube_lib::{Orchestrator, Target};

use crate::output::{print_info, print_success};

/// Remove the instrumentation and every helper resource
pub async fn run(orchestrator: &Orchestrator, target: &Target) -> Result<()> {
    print_info(&format!("Clearing coverage collection for {}", target));

    orchestrator
        .clear(target)
        .await
        .with_context(|| format!("Failed to clear {}", target))?;

    print_success("Coverage collection cleared");
    Ok(())
}
