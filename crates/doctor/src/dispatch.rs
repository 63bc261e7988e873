//! Remediation dispatcher: runs the action bound to a diagnosis.
//!
//! Every procedure is best-effort. Command failures are logged and recorded
//! in the returned [`Remediation`], never propagated, and every procedure is
//! safe to repeat on a container that is already healthy or already gone.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::patient::Patient;
use crate::rules::{RemediationAction, Rule};
use crate::runtime::{CommandOutput, ContainerStatus, ControlPlane};

/// One command (or wait) issued during a remediation
#[derive(Debug, Clone, Serialize)]
pub struct Step {
    pub description: String,
    pub outcome: CommandOutput,
}

/// Record of what the dispatcher did for one patient
#[derive(Debug, Clone, Serialize)]
pub struct Remediation {
    pub container: String,
    /// Matched rule, `None` for the generic fallback
    pub rule: Option<String>,
    pub action: RemediationAction,
    pub steps: Vec<Step>,
}

impl Remediation {
    /// Whether every step reported success
    pub fn succeeded(&self) -> bool {
        self.steps.iter().all(|s| s.outcome.succeeded)
    }
}

/// Executes remediation actions against the control plane.
pub struct RemediationDispatcher {
    control: Arc<dyn ControlPlane>,
    /// Default cooldown for `backoff-wait`
    backoff_cooldown: Duration,
}

impl RemediationDispatcher {
    pub fn new(control: Arc<dyn ControlPlane>, backoff_cooldown: Duration) -> Self {
        Self {
            control,
            backoff_cooldown,
        }
    }

    /// Remediate `patient` with the matched rule's action, or a plain restart
    /// when nothing matched.
    pub async fn remediate(&self, patient: &Patient, rule: Option<&Rule>) -> Remediation {
        let action = rule.map_or(RemediationAction::GenericRestart, |r| r.action().clone());
        let name = patient.name.as_str();
        let mut steps = Vec::new();

        info!(
            container = name,
            rule = rule.map(Rule::name),
            action = action.kind(),
            "Dispatching remediation"
        );

        match &action {
            RemediationAction::Recreate => {
                self.recreate(name, &mut steps).await;
            }
            RemediationAction::ResetEnvironment => {
                info!(container = name, "Resetting container environment");
                self.recreate(name, &mut steps).await;
            }
            RemediationAction::BackoffWait { cooldown_secs } => {
                let cooldown = cooldown_secs.map_or(self.backoff_cooldown, Duration::from_secs);
                tokio::time::sleep(cooldown).await;
                steps.push(Step {
                    description: format!("waited {}s for recovery", cooldown.as_secs()),
                    outcome: CommandOutput::ok(""),
                });
            }
            RemediationAction::FixPermissions { path, owner, mode } => {
                self.fix_permissions(name, path, owner.as_deref(), mode.as_deref(), &mut steps)
                    .await;
            }
            RemediationAction::Rebuild => {
                let outcome = self.control.rebuild_and_redeploy(name).await;
                record(&mut steps, "rebuild and redeploy", outcome);
                let outcome = self.control.restart(name).await;
                record(&mut steps, "restart", outcome);
            }
            RemediationAction::GenericRestart => {
                let outcome = self.control.restart(name).await;
                record(&mut steps, "restart", outcome);
            }
        }

        Remediation {
            container: name.to_string(),
            rule: rule.map(|r| r.name().to_string()),
            action,
            steps,
        }
    }

    async fn recreate(&self, name: &str, steps: &mut Vec<Step>) {
        let outcome = self.control.force_remove(name).await;
        record(steps, "force remove", outcome);
        let outcome = self.control.bring_up_fleet().await;
        record(steps, "bring up fleet", outcome);
    }

    async fn fix_permissions(
        &self,
        name: &str,
        path: &str,
        owner: Option<&str>,
        mode: Option<&str>,
        steps: &mut Vec<Step>,
    ) {
        let running = matches!(
            self.control.inspect(name).await,
            Ok(inspection) if inspection.status == ContainerStatus::Running
        );
        if !running {
            info!(container = name, "Not running, recreating instead of exec");
            self.recreate(name, steps).await;
            return;
        }

        if let Some(owner) = owner {
            let command = vec![
                "chown".to_string(),
                "-R".to_string(),
                owner.to_string(),
                path.to_string(),
            ];
            let outcome = self.control.exec_in_container(name, &command).await;
            record(steps, &format!("chown {owner} {path}"), outcome);
        }
        if let Some(mode) = mode {
            let command = vec![
                "chmod".to_string(),
                "-R".to_string(),
                mode.to_string(),
                path.to_string(),
            ];
            let outcome = self.control.exec_in_container(name, &command).await;
            record(steps, &format!("chmod {mode} {path}"), outcome);
        }

        let outcome = self.control.restart(name).await;
        record(steps, "restart", outcome);
    }
}

fn record(steps: &mut Vec<Step>, description: &str, outcome: CommandOutput) {
    if !outcome.succeeded {
        warn!(step = description, output = %outcome.output, "Remediation step failed, continuing");
    }
    steps.push(Step {
        description: description.to_string(),
        outcome,
    });
}
