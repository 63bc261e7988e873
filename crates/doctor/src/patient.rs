//! Patients: the in-memory record of each monitored container.

use serde::Serialize;
use tracing::info;

use crate::config::DEFAULT_CONTAINERS;
use crate::runtime::{ContainerHealth, ContainerStatus, ControlPlane, Inspection};

/// State of one monitored container across rounds
#[derive(Debug, Clone, Default, Serialize)]
pub struct Patient {
    pub name: String,
    pub status: ContainerStatus,
    pub health: ContainerHealth,
    /// Log tail from the last investigation; not kept between runs
    #[serde(skip)]
    pub last_logs: String,
    /// Name of the rule that matched the last investigation
    pub diagnosis: Option<String>,
}

impl Patient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn is_healthy(&self) -> bool {
        Inspection::new(self.status, self.health).is_healthy()
    }

    /// Record a fresh inspection.
    ///
    /// A diagnosis only makes sense for an unstable container, so it is
    /// dropped as soon as the status leaves that set.
    pub fn observe(&mut self, inspection: Inspection) {
        self.status = inspection.status;
        self.health = inspection.health;
        if !self.status.is_unstable() {
            self.diagnosis = None;
        }
    }

    /// The control plane could not tell us anything about this container
    pub fn mark_missing(&mut self) {
        self.status = ContainerStatus::Missing;
        self.health = ContainerHealth::Unknown;
        self.diagnosis = None;
    }

    /// Attach a diagnosis; ignored unless the container is unstable
    pub fn diagnose(&mut self, rule: Option<&str>) {
        self.diagnosis = if self.status.is_unstable() {
            rule.map(ToString::to_string)
        } else {
            None
        };
    }
}

/// Ordered set of patients, one per distinct container name.
#[derive(Debug, Clone, Default)]
pub struct PatientRegistry {
    patients: Vec<Patient>,
}

impl PatientRegistry {
    /// Build a registry from container names, dropping duplicates and blanks
    /// while keeping first-seen order.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = Self::default();
        for name in names {
            registry.admit(name.as_ref());
        }
        registry
    }

    /// Add a patient unless one with this name already exists.
    /// Returns whether a patient was added.
    pub fn admit(&mut self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() || self.get(name).is_some() {
            return false;
        }
        self.patients.push(Patient::new(name));
        true
    }

    pub fn get(&self, name: &str) -> Option<&Patient> {
        self.patients.iter().find(|p| p.name == name)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Patient> {
        self.patients.iter_mut()
    }

    pub fn names(&self) -> Vec<String> {
        self.patients.iter().map(|p| p.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.patients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }
}

/// Decide which containers to supervise.
///
/// Explicit names win; otherwise containers matching `filter` are
/// discovered; if discovery finds nothing the default pair is used.
pub async fn resolve_fleet(
    configured: &[String],
    filter: &str,
    control: &dyn ControlPlane,
) -> PatientRegistry {
    let configured = PatientRegistry::from_names(configured);
    if !configured.is_empty() {
        return configured;
    }

    if !filter.trim().is_empty() {
        let discovered = PatientRegistry::from_names(control.discover(filter).await);
        if !discovered.is_empty() {
            info!(filter, count = discovered.len(), "Discovered containers");
            return discovered;
        }
    }

    info!("No containers configured or discovered, using defaults");
    PatientRegistry::from_names(DEFAULT_CONTAINERS)
}
