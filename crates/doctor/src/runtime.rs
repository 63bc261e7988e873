//! Control plane adapter: container lifecycle operations against the runtime.
//!
//! The supervisor only talks to the [`ControlPlane`] trait. [`DockerCli`] is
//! the production implementation and shells out to `docker` and
//! `docker compose`, the same way the platform monitors shell out to
//! `kubectl`.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{DoctorError, Result};

/// Compose label carrying the service a container was created for
const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";

/// Lifecycle status of a container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    #[default]
    Unknown,
    Running,
    Restarting,
    Exited,
    Dead,
    /// The control plane could not find or reach the container
    Missing,
}

impl ContainerStatus {
    /// Map a runtime state string (`.State.Status`) onto our status set.
    ///
    /// States we do not track (`created`, `paused`, `removing`) are `Unknown`.
    pub fn from_runtime(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "running" => Self::Running,
            "restarting" => Self::Restarting,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }

    /// Crash signal: the only statuses that get diagnosed and remediated
    pub fn is_unstable(self) -> bool {
        matches!(self, Self::Restarting | Self::Exited | Self::Dead)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Running => "running",
            Self::Restarting => "restarting",
            Self::Exited => "exited",
            Self::Dead => "dead",
            Self::Missing => "missing",
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Healthcheck state of a container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerHealth {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
    /// No healthcheck configured for the container
    NotApplicable,
}

impl ContainerHealth {
    /// Map `.State.Health.Status`; `starting` is still `Unknown`.
    pub fn from_runtime(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "healthy" => Self::Healthy,
            "unhealthy" => Self::Unhealthy,
            "" | "none" | "<no value>" => Self::NotApplicable,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::NotApplicable => "not-applicable",
        }
    }
}

impl fmt::Display for ContainerHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an inspect call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inspection {
    pub status: ContainerStatus,
    pub health: ContainerHealth,
}

impl Inspection {
    pub fn new(status: ContainerStatus, health: ContainerHealth) -> Self {
        Self { status, health }
    }

    /// Running, and either passing its healthcheck or not having one
    pub fn is_healthy(&self) -> bool {
        self.status == ContainerStatus::Running
            && matches!(
                self.health,
                ContainerHealth::Healthy | ContainerHealth::NotApplicable
            )
    }
}

/// Outcome of a lifecycle command.
///
/// Callers branch on `succeeded`, never on the text in `output`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub output: String,
    pub succeeded: bool,
}

impl CommandOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            succeeded: true,
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            succeeded: false,
        }
    }

    /// Chain two commands: succeeded only if both did
    #[must_use]
    pub fn and(self, next: Self) -> Self {
        let output = match (self.output.is_empty(), next.output.is_empty()) {
            (true, _) => next.output,
            (_, true) => self.output,
            _ => format!("{}\n{}", self.output, next.output),
        };
        Self {
            output,
            succeeded: self.succeeded && next.succeeded,
        }
    }
}

/// Container lifecycle operations the supervisor depends on.
///
/// Only `inspect` reports failure as an error. Everything else is
/// best-effort and reports through [`CommandOutput`].
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Current status and health of a container
    async fn inspect(&self, name: &str) -> Result<Inspection>;

    /// Last `tail_lines` lines of container output; empty on failure
    async fn logs(&self, name: &str, tail_lines: u32) -> String;

    async fn restart(&self, name: &str) -> CommandOutput;

    /// Remove the container, stopping it first. Succeeds if already absent.
    async fn force_remove(&self, name: &str) -> CommandOutput;

    /// Bring the fleet up, recreating any container that is missing
    async fn bring_up_fleet(&self) -> CommandOutput;

    /// Rebuild the container's image and redeploy it
    async fn rebuild_and_redeploy(&self, name: &str) -> CommandOutput;

    /// Run a command inside the container as root
    async fn exec_in_container(&self, name: &str, command: &[String]) -> CommandOutput;

    /// Names of containers matching `filter`; empty on failure
    async fn discover(&self, filter: &str) -> Vec<String>;
}

/// Shape of `docker inspect --format '{{json .State}}'`
#[derive(Debug, Deserialize)]
struct DockerState {
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "Health", default)]
    health: Option<DockerHealth>,
}

#[derive(Debug, Deserialize)]
struct DockerHealth {
    #[serde(rename = "Status", default)]
    status: String,
}

/// Parse the JSON state document of one container
pub fn parse_inspect_state(container: &str, raw: &str) -> Result<Inspection> {
    let state: DockerState =
        serde_json::from_str(raw.trim()).map_err(|source| DoctorError::InspectParse {
            container: container.to_string(),
            source,
        })?;

    let health = state
        .health
        .map_or(ContainerHealth::NotApplicable, |h| {
            ContainerHealth::from_runtime(&h.status)
        });

    Ok(Inspection::new(
        ContainerStatus::from_runtime(&state.status),
        health,
    ))
}

/// [`ControlPlane`] backed by the `docker` CLI and `docker compose`.
#[derive(Debug, Clone)]
pub struct DockerCli {
    /// Binary to invoke (`docker`, `podman`, ...)
    program: String,
    /// Compose file for fleet bring-up and rebuilds
    compose_file: Option<PathBuf>,
    /// Compose project directory
    project_dir: Option<PathBuf>,
}

impl DockerCli {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            compose_file: None,
            project_dir: None,
        }
    }

    #[must_use]
    pub fn with_compose_file(mut self, compose_file: Option<PathBuf>) -> Self {
        self.compose_file = compose_file;
        self
    }

    #[must_use]
    pub fn with_project_dir(mut self, project_dir: Option<PathBuf>) -> Self {
        self.project_dir = project_dir;
        self
    }

    /// Arguments that prefix every `compose` invocation
    fn compose_args(&self) -> Vec<String> {
        let mut args = vec!["compose".to_string()];
        if let Some(ref file) = self.compose_file {
            args.push("-f".to_string());
            args.push(file.display().to_string());
        }
        if let Some(ref dir) = self.project_dir {
            args.push("--project-directory".to_string());
            args.push(dir.display().to_string());
        }
        args
    }

    /// The child is killed if the returned future is dropped mid-call
    async fn raw(&self, args: &[String]) -> Result<std::process::Output> {
        debug!(program = %self.program, args = ?args, "Running runtime command");
        Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| DoctorError::Spawn {
                program: self.program.clone(),
                source,
            })
    }

    /// Run a command, folding stdout and stderr into one [`CommandOutput`]
    async fn run(&self, args: &[String]) -> CommandOutput {
        match self.raw(args).await {
            Ok(output) => {
                let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
                let stderr = String::from_utf8_lossy(&output.stderr);
                let stderr = stderr.trim();
                if !stderr.is_empty() {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(stderr);
                }
                if output.status.success() {
                    CommandOutput::ok(text)
                } else {
                    debug!(args = ?args, output = %text, "Runtime command failed");
                    CommandOutput::failed(text)
                }
            }
            Err(e) => {
                warn!(error = %e, "Runtime command could not be started");
                CommandOutput::failed(e.to_string())
            }
        }
    }

    /// Compose service the container belongs to, else the container name
    async fn compose_service(&self, name: &str) -> String {
        let format = format!("{{{{ index .Config.Labels \"{COMPOSE_SERVICE_LABEL}\" }}}}");
        let result = self
            .run(&args(["inspect", "--format", format.as_str(), name]))
            .await;
        let service = result.output.trim();
        if result.succeeded && !service.is_empty() && service != "<no value>" {
            service.to_string()
        } else {
            name.to_string()
        }
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

#[async_trait]
impl ControlPlane for DockerCli {
    async fn inspect(&self, name: &str) -> Result<Inspection> {
        let output = self
            .raw(&args(["inspect", "--format", "{{json .State}}", name]))
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.contains("No such") {
                return Err(DoctorError::ContainerNotFound(name.to_string()));
            }
            return Err(DoctorError::CommandFailed {
                command: format!("{} inspect {name}", self.program),
                output: stderr,
            });
        }

        parse_inspect_state(name, &String::from_utf8_lossy(&output.stdout))
    }

    async fn logs(&self, name: &str, tail_lines: u32) -> String {
        let result = self
            .run(&args(["logs", "--tail", tail_lines.to_string().as_str(), name]))
            .await;
        if result.succeeded {
            result.output
        } else {
            warn!(container = name, "Failed to fetch container logs");
            String::new()
        }
    }

    async fn restart(&self, name: &str) -> CommandOutput {
        self.run(&args(["restart", name])).await
    }

    async fn force_remove(&self, name: &str) -> CommandOutput {
        let result = self.run(&args(["rm", "-f", name])).await;
        // Older engines exit non-zero for an absent container
        if !result.succeeded && result.output.contains("No such container") {
            return CommandOutput::ok(result.output);
        }
        result
    }

    async fn bring_up_fleet(&self) -> CommandOutput {
        let mut cmd = self.compose_args();
        cmd.extend(args(["up", "-d"]));
        self.run(&cmd).await
    }

    async fn rebuild_and_redeploy(&self, name: &str) -> CommandOutput {
        let service = self.compose_service(name).await;

        let mut build = self.compose_args();
        build.extend(args(["build", service.as_str()]));
        let built = self.run(&build).await;
        if !built.succeeded {
            return built;
        }

        let mut up = self.compose_args();
        up.extend(args(["up", "-d", "--no-deps", service.as_str()]));
        built.and(self.run(&up).await)
    }

    async fn exec_in_container(&self, name: &str, command: &[String]) -> CommandOutput {
        let mut cmd = args(["exec", "-u", "0", name]);
        cmd.extend(command.iter().cloned());
        self.run(&cmd).await
    }

    async fn discover(&self, filter: &str) -> Vec<String> {
        let filter = format!("name={filter}");
        let result = self
            .run(&args(["ps", "-a", "--filter", filter.as_str(), "--format", "{{.Names}}"]))
            .await;
        if !result.succeeded {
            warn!(filter = %filter, "Container discovery failed");
            return Vec::new();
        }
        result
            .output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(ToString::to_string)
            .collect()
    }
}
