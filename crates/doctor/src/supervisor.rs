//! Supervisor loop: bounded rounds of check, investigate, remediate, settle.
//!
//! Each round inspects every patient in registry order. Unstable patients
//! (`restarting`, `exited`, `dead`) have their log tail diagnosed and get
//! exactly one remediation, followed by the settle delay. Anything else that
//! is not healthy is only reported. The loop stops on the first fully
//! healthy round or after `max_attempts` rounds, whichever comes first.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::DoctorConfig;
use crate::dispatch::{Remediation, RemediationDispatcher};
use crate::patient::{Patient, PatientRegistry};
use crate::report::Observer;
use crate::rules::{KnowledgeBase, Rule};
use crate::runtime::{ContainerHealth, ContainerStatus, ControlPlane};
use crate::vitals;

/// Loop tuning, usually taken from [`DoctorConfig`]
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub max_attempts: u32,
    pub round_delay: Duration,
    pub settle_delay: Duration,
    pub backoff_cooldown: Duration,
    pub log_tail: u32,
    pub stop_round_on_remediation: bool,
}

impl From<&DoctorConfig> for SupervisorSettings {
    fn from(config: &DoctorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            round_delay: config.round_delay(),
            settle_delay: config.settle_delay(),
            backoff_cooldown: config.backoff_cooldown(),
            log_tail: config.log_tail,
            stop_round_on_remediation: config.stop_round_on_remediation,
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from(&DoctorConfig::default())
    }
}

/// Where a round currently is; used for log context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Checking,
    Investigating,
    Remediating,
    Settling,
}

/// Why a patient was not healthy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaultKind {
    /// Unstable, and the logs matched a rule
    TransientContainerFault,
    /// Unstable, nothing matched; restarted generically
    UnrecognizedFault,
    /// Reachable but not running/healthy without a crash signal; left alone
    NonInstableDegradation,
    /// Inspect failed; the container is missing or the runtime is down
    ControlPlaneUnavailable,
}

/// What happened to one patient during a round
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum PatientOutcome {
    Healthy,
    Remediated {
        fault: FaultKind,
        remediation: Remediation,
    },
    Degraded {
        fault: FaultKind,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct PatientReport {
    pub name: String,
    pub status: ContainerStatus,
    pub health: ContainerHealth,
    pub outcome: PatientOutcome,
}

impl PatientReport {
    fn new(patient: &Patient, outcome: PatientOutcome) -> Self {
        Self {
            name: patient.name.clone(),
            status: patient.status,
            health: patient.health,
            outcome,
        }
    }
}

/// Per-patient outcomes of one loop iteration
#[derive(Debug, Clone, Serialize)]
pub struct Round {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub reports: Vec<PatientReport>,
}

impl Round {
    pub fn fully_healthy(&self) -> bool {
        self.reports
            .iter()
            .all(|r| matches!(r.outcome, PatientOutcome::Healthy))
    }

    pub fn remediations(&self) -> impl Iterator<Item = &Remediation> {
        self.reports.iter().filter_map(|r| match &r.outcome {
            PatientOutcome::Remediated { remediation, .. } => Some(remediation),
            _ => None,
        })
    }
}

/// Terminal state of a supervisor run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum Outcome {
    /// Every patient healthy in round `rounds`
    Healthy { rounds: u32 },
    /// Attempt budget used up
    Exhausted { rounds: u32 },
    /// Stopped by an external interrupt
    Interrupted { completed_rounds: u32 },
}

impl Outcome {
    /// Process exit status for this outcome
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Healthy { .. } => 0,
            Self::Exhausted { .. } => 1,
            Self::Interrupted { .. } => 130,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub outcome: Outcome,
    pub rounds: Vec<Round>,
}

/// Owns the patient registry and drives the rounds.
pub struct Supervisor {
    control: Arc<dyn ControlPlane>,
    knowledge: KnowledgeBase,
    dispatcher: RemediationDispatcher,
    registry: PatientRegistry,
    settings: SupervisorSettings,
    observer: Box<dyn Observer>,
}

impl Supervisor {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        knowledge: KnowledgeBase,
        registry: PatientRegistry,
        settings: SupervisorSettings,
        observer: Box<dyn Observer>,
    ) -> Self {
        let dispatcher = RemediationDispatcher::new(control.clone(), settings.backoff_cooldown);
        Self {
            control,
            knowledge,
            dispatcher,
            registry,
            settings,
            observer,
        }
    }

    pub fn registry(&self) -> &PatientRegistry {
        &self.registry
    }

    /// Run until the fleet is healthy or the budget is gone.
    pub async fn run(&mut self) -> RunSummary {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Like [`run`](Self::run), but stops as soon as `shutdown` completes.
    ///
    /// Whatever the loop was awaiting at that moment (a sleep or a control
    /// plane call) is dropped, so no further remediation is issued.
    pub async fn run_until(&mut self, shutdown: impl Future<Output = ()>) -> RunSummary {
        let mut rounds = Vec::new();
        self.observer.started(&self.registry, &self.settings);

        let finished = tokio::select! {
            outcome = supervise(
                &*self.control,
                &self.knowledge,
                &self.dispatcher,
                &mut self.registry,
                &self.settings,
                self.observer.as_mut(),
                &mut rounds,
            ) => Some(outcome),
            () = shutdown => None,
        };

        let outcome = finished.unwrap_or_else(|| {
            info!(completed_rounds = rounds.len(), "Interrupted, stopping supervisor");
            Outcome::Interrupted {
                completed_rounds: u32::try_from(rounds.len()).unwrap_or(u32::MAX),
            }
        });

        let summary = RunSummary { outcome, rounds };
        self.observer.finished(&summary);
        summary
    }

    /// One vital sign pass over every patient, without remediation
    pub async fn examine(&mut self) -> Vec<PatientReport> {
        let mut reports = Vec::with_capacity(self.registry.len());
        for patient in self.registry.iter_mut() {
            let outcome = if vitals::check(&*self.control, patient).await {
                PatientOutcome::Healthy
            } else {
                PatientOutcome::Degraded {
                    fault: classify_degradation(patient),
                }
            };
            self.observer.checked(None, patient);
            reports.push(PatientReport::new(patient, outcome));
        }
        reports
    }
}

fn classify_degradation(patient: &Patient) -> FaultKind {
    if patient.status == ContainerStatus::Missing {
        FaultKind::ControlPlaneUnavailable
    } else {
        FaultKind::NonInstableDegradation
    }
}

async fn supervise(
    control: &dyn ControlPlane,
    knowledge: &KnowledgeBase,
    dispatcher: &RemediationDispatcher,
    registry: &mut PatientRegistry,
    settings: &SupervisorSettings,
    observer: &mut dyn Observer,
    rounds: &mut Vec<Round>,
) -> Outcome {
    let max = settings.max_attempts;

    for attempt in 1..=max {
        let round = run_round(
            attempt, control, knowledge, dispatcher, registry, settings, observer,
        )
        .await;
        let healthy = round.fully_healthy();
        observer.round_finished(&round);
        rounds.push(round);

        if healthy {
            return Outcome::Healthy { rounds: attempt };
        }
        if attempt < max {
            debug!(attempt, delay_secs = settings.round_delay.as_secs(), "Waiting for next round");
            tokio::time::sleep(settings.round_delay).await;
        }
    }

    Outcome::Exhausted { rounds: max }
}

async fn run_round(
    attempt: u32,
    control: &dyn ControlPlane,
    knowledge: &KnowledgeBase,
    dispatcher: &RemediationDispatcher,
    registry: &mut PatientRegistry,
    settings: &SupervisorSettings,
    observer: &mut dyn Observer,
) -> Round {
    let started_at = Utc::now();
    let mut reports = Vec::with_capacity(registry.len());

    for patient in registry.iter_mut() {
        debug!(attempt, container = %patient.name, phase = ?Phase::Checking, "Round phase");
        let healthy = vitals::check(control, patient).await;
        observer.checked(Some(attempt), patient);

        if healthy {
            reports.push(PatientReport::new(patient, PatientOutcome::Healthy));
            continue;
        }

        if !patient.status.is_unstable() {
            let fault = classify_degradation(patient);
            observer.degraded(patient, fault);
            reports.push(PatientReport::new(patient, PatientOutcome::Degraded { fault }));
            continue;
        }

        debug!(attempt, container = %patient.name, phase = ?Phase::Investigating, "Round phase");
        patient.last_logs = control.logs(&patient.name, settings.log_tail).await;
        let rule = knowledge.diagnose(&patient.last_logs);
        patient.diagnose(rule.map(Rule::name));
        let fault = if rule.is_some() {
            FaultKind::TransientContainerFault
        } else {
            FaultKind::UnrecognizedFault
        };
        observer.diagnosed(patient, rule);

        debug!(attempt, container = %patient.name, phase = ?Phase::Remediating, "Round phase");
        let remediation = dispatcher.remediate(patient, rule).await;
        observer.remediated(patient, &remediation);

        debug!(attempt, container = %patient.name, phase = ?Phase::Settling, "Round phase");
        tokio::time::sleep(settings.settle_delay).await;

        reports.push(PatientReport::new(
            patient,
            PatientOutcome::Remediated { fault, remediation },
        ));

        if settings.stop_round_on_remediation {
            debug!(attempt, "Ending round after remediation");
            break;
        }
    }

    Round {
        attempt,
        started_at,
        reports,
    }
}
