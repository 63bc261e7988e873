//! Scripted in-memory control plane for supervisor scenarios.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use doctor::{
    CommandOutput, ContainerHealth, ContainerStatus, ControlPlane, DoctorError, Inspection,
    KnowledgeBase, PatientRegistry, Silent, Supervisor, SupervisorSettings,
};

pub fn running_healthy() -> Inspection {
    Inspection::new(ContainerStatus::Running, ContainerHealth::Healthy)
}

pub fn restarting() -> Inspection {
    Inspection::new(ContainerStatus::Restarting, ContainerHealth::Unknown)
}

#[derive(Debug, Clone)]
struct FakeContainer {
    /// `None` once removed or never existed
    state: Option<Inspection>,
    logs: String,
    /// State after a restart or recreate; `None` keeps the current state
    heals_to: Option<Inspection>,
    /// States taken on by successive inspects, regardless of remediation
    upcoming: VecDeque<Inspection>,
}

/// A fleet whose containers change state only when remediated
#[derive(Default)]
pub struct FakeFleet {
    containers: Mutex<BTreeMap<String, FakeContainer>>,
    calls: Mutex<Vec<String>>,
}

impl FakeFleet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a container with its current state, logs, and the state a
    /// remediation puts it in
    pub fn with(
        self: Arc<Self>,
        name: &str,
        state: Option<Inspection>,
        logs: &str,
        heals_to: Option<Inspection>,
    ) -> Arc<Self> {
        self.containers.lock().unwrap().insert(
            name.to_string(),
            FakeContainer {
                state,
                logs: logs.to_string(),
                heals_to,
                upcoming: VecDeque::new(),
            },
        );
        self
    }

    /// Script the states the next inspects of `name` observe, in order
    pub fn then(self: Arc<Self>, name: &str, states: &[Inspection]) -> Arc<Self> {
        if let Some(c) = self.containers.lock().unwrap().get_mut(name) {
            c.upcoming.extend(states.iter().copied());
        }
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_matching(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Calls that change container state (everything except inspect/logs)
    pub fn remediation_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("inspect") && !c.starts_with("logs"))
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn heal(&self, name: &str) -> CommandOutput {
        let mut containers = self.containers.lock().unwrap();
        match containers.get_mut(name) {
            Some(c) if c.state.is_some() => {
                if let Some(next) = c.heals_to {
                    c.state = Some(next);
                }
                CommandOutput::ok(name)
            }
            _ => CommandOutput::failed(format!("No such container: {name}")),
        }
    }
}

#[async_trait]
impl ControlPlane for FakeFleet {
    async fn inspect(&self, name: &str) -> Result<Inspection, DoctorError> {
        self.record(format!("inspect {name}"));
        let mut containers = self.containers.lock().unwrap();
        containers
            .get_mut(name)
            .and_then(|c| {
                if let Some(next) = c.upcoming.pop_front() {
                    c.state = Some(next);
                }
                c.state
            })
            .ok_or_else(|| DoctorError::ContainerNotFound(name.to_string()))
    }

    async fn logs(&self, name: &str, _tail_lines: u32) -> String {
        self.record(format!("logs {name}"));
        self.containers
            .lock()
            .unwrap()
            .get(name)
            .map(|c| c.logs.clone())
            .unwrap_or_default()
    }

    async fn restart(&self, name: &str) -> CommandOutput {
        self.record(format!("restart {name}"));
        self.heal(name)
    }

    async fn force_remove(&self, name: &str) -> CommandOutput {
        self.record(format!("rm {name}"));
        if let Some(c) = self.containers.lock().unwrap().get_mut(name) {
            c.state = None;
        }
        CommandOutput::ok("")
    }

    async fn bring_up_fleet(&self) -> CommandOutput {
        self.record("up".to_string());
        for c in self.containers.lock().unwrap().values_mut() {
            if c.state.is_none() {
                c.state = Some(c.heals_to.unwrap_or_else(restarting));
            }
        }
        CommandOutput::ok("")
    }

    async fn rebuild_and_redeploy(&self, name: &str) -> CommandOutput {
        self.record(format!("rebuild {name}"));
        CommandOutput::ok("")
    }

    async fn exec_in_container(&self, name: &str, command: &[String]) -> CommandOutput {
        self.record(format!("exec {name} {}", command.join(" ")));
        CommandOutput::ok("")
    }

    async fn discover(&self, filter: &str) -> Vec<String> {
        self.record(format!("discover {filter}"));
        self.containers
            .lock()
            .unwrap()
            .keys()
            .filter(|name| name.contains(filter))
            .cloned()
            .collect()
    }
}

pub fn settings(max_attempts: u32) -> SupervisorSettings {
    SupervisorSettings {
        max_attempts,
        round_delay: Duration::from_secs(5),
        settle_delay: Duration::from_secs(5),
        backoff_cooldown: Duration::from_secs(10),
        log_tail: 50,
        stop_round_on_remediation: false,
    }
}

pub fn supervisor(
    fleet: &Arc<FakeFleet>,
    names: &[&str],
    settings: SupervisorSettings,
) -> Supervisor {
    Supervisor::new(
        fleet.clone(),
        KnowledgeBase::builtin().unwrap(),
        PatientRegistry::from_names(names),
        settings,
        Box::new(Silent),
    )
}
