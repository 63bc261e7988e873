//! Self-healing supervisor for a small fleet of service containers.
//!
//! The doctor polls each container, reads the logs of the ones that keep
//! crashing, matches them against an ordered knowledge base of failure
//! signatures and applies the bound remediation. It stops on the first
//! round in which every container is healthy, or after a fixed number of
//! rounds.
//!
//! # Architecture
//!
//! - [`runtime`]: the [`ControlPlane`] trait and the `docker` CLI adapter
//! - [`patient`]: per-container state and the registry
//! - [`vitals`]: status/health classification
//! - [`rules`]: the knowledge base and diagnosis
//! - [`dispatch`]: remediation procedures
//! - [`supervisor`]: the bounded retry loop
//! - [`report`]: progress output
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use doctor::{
//!     ConsoleReporter, DockerCli, KnowledgeBase, PatientRegistry, Supervisor,
//!     SupervisorSettings,
//! };
//!
//! # async fn example() -> Result<(), doctor::DoctorError> {
//! let mut supervisor = Supervisor::new(
//!     Arc::new(DockerCli::default()),
//!     KnowledgeBase::builtin()?,
//!     PatientRegistry::from_names(["kaven-postgres", "kaven-redis"]),
//!     SupervisorSettings::default(),
//!     Box::new(ConsoleReporter::new()),
//! );
//! let summary = supervisor.run().await;
//! std::process::exit(i32::from(summary.outcome.exit_code()));
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod patient;
pub mod report;
pub mod rules;
pub mod runtime;
pub mod supervisor;
pub mod vitals;

pub use config::DoctorConfig;
pub use dispatch::{Remediation, RemediationDispatcher};
pub use error::DoctorError;
pub use patient::{resolve_fleet, Patient, PatientRegistry};
pub use report::{ConsoleReporter, Observer, Silent};
pub use rules::{KnowledgeBase, RemediationAction, Rule, RuleSpec};
pub use runtime::{
    CommandOutput, ContainerHealth, ContainerStatus, ControlPlane, DockerCli, Inspection,
};
pub use supervisor::{FaultKind, Outcome, PatientOutcome, Round, RunSummary, Supervisor, SupervisorSettings};
