//! Coverage collection for Go workloads running in Kubernetes
//!
//! This crate provides the core functionality for:
//! - Instrumenting a Deployment or Pod to write coverage data to a claim
//! - Restarting it and copying the data out through a collector pod
//! - Removing the instrumentation and every helper resource
//! - Polling the cluster until it converges, with timeouts and cancellation

pub mod config;
pub mod error;
pub mod extractor;
pub mod gateway;
pub mod models;
pub mod names;
pub mod observability;
pub mod orchestrator;
pub mod patch;
pub mod provisioner;
pub mod selector;
pub mod waiter;
pub mod workload;

pub use config::Settings;
pub use error::{Error, Result};
pub use extractor::{ArtifactExtractor, KubeExecExtractor};
pub use gateway::{KubeGateway, ResourceGateway};
pub use models::*;
pub use names::ResourceNames;
pub use observability::{NoopProgress, ProgressReporter, Step};
pub use orchestrator::{CollectReport, Orchestrator, OrchestratorBuilder};
pub use workload::Workload;
