//! Progress reporting and structured workflow events
//!
//! Provides:
//! - [`ProgressReporter`], the optional human-facing progress capability
//! - [`WorkflowLogger`], consistent `tracing` events for workflow start and end

use std::fmt;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::Error;
use crate::models::Target;

/// Observable steps of the Init, Collect and Clear workflows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    ProvisionStorage,
    PatchWorkload,
    CreateCollector,
    RestartWorkload,
    ExtractCoverage,
    UnpatchWorkload,
    DeleteCollector,
    DeleteStorage,
}

impl Step {
    /// Message shown while the step runs
    pub fn in_progress(&self) -> &'static str {
        match self {
            Step::ProvisionStorage => "Provisioning persistent volume claim",
            Step::PatchWorkload => "Instrumenting workload",
            Step::CreateCollector => "Initializing collector",
            Step::RestartWorkload => "Restarting workload",
            Step::ExtractCoverage => "Copying coverage data",
            Step::UnpatchWorkload => "Removing instrumentation",
            Step::DeleteCollector => "Deleting collector pod",
            Step::DeleteStorage => "Deleting persistent volume claim",
        }
    }

    /// Message shown once the step succeeded
    pub fn done(&self) -> &'static str {
        match self {
            Step::ProvisionStorage => "Persistent volume claim ready",
            Step::PatchWorkload => "Workload instrumented",
            Step::CreateCollector => "Collector ready",
            Step::RestartWorkload => "Workload restarted",
            Step::ExtractCoverage => "Coverage data copied",
            Step::UnpatchWorkload => "Instrumentation removed",
            Step::DeleteCollector => "Collector pod deleted",
            Step::DeleteStorage => "Persistent volume claim deleted",
        }
    }

    fn event_name(&self) -> &'static str {
        match self {
            Step::ProvisionStorage => "provision_storage",
            Step::PatchWorkload => "patch_workload",
            Step::CreateCollector => "create_collector",
            Step::RestartWorkload => "restart_workload",
            Step::ExtractCoverage => "extract_coverage",
            Step::UnpatchWorkload => "unpatch_workload",
            Step::DeleteCollector => "delete_collector",
            Step::DeleteStorage => "delete_storage",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// Receives step transitions; every method defaults to doing nothing
pub trait ProgressReporter: Send + Sync {
    fn step_started(&self, _step: Step) {}

    fn step_finished(&self, _step: Step, _elapsed: Duration) {}

    fn step_failed(&self, _step: Step, _error: &Error) {}
}

/// Reporter used when the caller does not install one
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {}

/// Structured logger for workflow events
#[derive(Debug, Clone)]
pub struct WorkflowLogger {
    namespace: String,
    target: String,
}

impl WorkflowLogger {
    pub fn new(target: &Target) -> Self {
        Self {
            namespace: target.namespace.clone(),
            target: format!("{}/{}", target.kind, target.name),
        }
    }

    pub fn log_started(&self, workflow: &str) {
        info!(
            event = "workflow_started",
            workflow = %workflow,
            namespace = %self.namespace,
            target = %self.target,
            "Workflow started"
        );
    }

    pub fn log_step(&self, step: Step, elapsed: Duration) {
        info!(
            event = "step_finished",
            step = %step,
            namespace = %self.namespace,
            target = %self.target,
            elapsed_ms = elapsed.as_millis() as u64,
            "{}",
            step.done()
        );
    }

    pub fn log_finished(&self, workflow: &str, elapsed: Duration) {
        info!(
            event = "workflow_finished",
            workflow = %workflow,
            namespace = %self.namespace,
            target = %self.target,
            elapsed_ms = elapsed.as_millis() as u64,
            "Workflow finished"
        );
    }

    pub fn log_failed(&self, workflow: &str, error: &Error) {
        warn!(
            event = "workflow_failed",
            workflow = %workflow,
            namespace = %self.namespace,
            target = %self.target,
            error = %error,
            "Workflow failed"
        );
    }
}
