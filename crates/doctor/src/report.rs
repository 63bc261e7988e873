//! Human readable progress output.
//!
//! The supervisor reports through the [`Observer`] trait so the loop itself
//! never prints. [`ConsoleReporter`] is what the binary uses; [`Silent`] is
//! for tests and embedding.

use colored::Colorize;

use crate::dispatch::Remediation;
use crate::patient::{Patient, PatientRegistry};
use crate::rules::Rule;
use crate::runtime::{ContainerHealth, ContainerStatus};
use crate::supervisor::{FaultKind, Outcome, Round, RunSummary, SupervisorSettings};

/// Log characters shown when no rule matched
const LOG_EXCERPT_CHARS: usize = 500;

/// Receives supervisor progress. Every method defaults to doing nothing.
pub trait Observer: Send {
    fn started(&mut self, _registry: &PatientRegistry, _settings: &SupervisorSettings) {}

    /// A vital sign check finished; `attempt` is `None` outside the loop
    fn checked(&mut self, _attempt: Option<u32>, _patient: &Patient) {}

    fn diagnosed(&mut self, _patient: &Patient, _rule: Option<&Rule>) {}

    fn remediated(&mut self, _patient: &Patient, _remediation: &Remediation) {}

    fn degraded(&mut self, _patient: &Patient, _fault: FaultKind) {}

    fn round_finished(&mut self, _round: &Round) {}

    fn finished(&mut self, _summary: &RunSummary) {}
}

/// Discards all progress
#[derive(Debug, Default)]
pub struct Silent;

impl Observer for Silent {}

/// Coloured progress on stdout
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    max_attempts: u32,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

/// First `max` characters of `text`, never splitting a character
pub fn excerpt(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn status_line(prefix: &str, patient: &Patient) -> String {
    let status = format!("status={}", patient.status);
    let status = if patient.status == ContainerStatus::Running {
        status.green()
    } else {
        status.red()
    };
    let health = format!("health={}", patient.health);
    let health = if matches!(
        patient.health,
        ContainerHealth::Healthy | ContainerHealth::NotApplicable
    ) {
        health.green()
    } else {
        health.yellow()
    };
    format!("{prefix}{}: {status}, {health}", patient.name)
}

/// Hints printed when the attempt budget runs out
pub fn troubleshooting_tips() -> [&'static str; 4] {
    [
        "1. Check container logs: docker logs <container-name>",
        "2. Check Docker status: docker ps -a",
        "3. Restart the fleet: docker compose down && docker compose up -d",
        "4. Check system resources: docker stats",
    ]
}

impl Observer for ConsoleReporter {
    fn started(&mut self, registry: &PatientRegistry, settings: &SupervisorSettings) {
        self.max_attempts = settings.max_attempts;
        println!("{}", "🏥 Container Doctor".bold().magenta());
        println!(
            "{}",
            format!(
                "Starting health monitoring for containers: {}",
                registry.names().join(", ")
            )
            .cyan()
        );
        println!();
    }

    fn checked(&mut self, attempt: Option<u32>, patient: &Patient) {
        let prefix = attempt.map_or_else(String::new, |a| {
            format!("[{a}/{}] ", self.max_attempts)
        });
        println!("{}", status_line(&prefix, patient));
    }

    fn diagnosed(&mut self, patient: &Patient, rule: Option<&Rule>) {
        println!(
            "{}",
            format!(
                "🔧 {} is {}. Attempting to heal...",
                patient.name, patient.status
            )
            .red()
        );
        match rule {
            Some(rule) => println!(
                "{}",
                format!("   → Diagnosed: {} ({})", rule.diagnosis(), rule.name()).cyan()
            ),
            None => {
                println!(
                    "{}",
                    "   → No known issue pattern detected, falling back to restart".yellow()
                );
                if !patient.last_logs.is_empty() {
                    println!("{}", "   📋 Logs excerpt:".yellow());
                    println!("{}", excerpt(&patient.last_logs, LOG_EXCERPT_CHARS));
                }
            }
        }
    }

    fn remediated(&mut self, _patient: &Patient, remediation: &Remediation) {
        println!(
            "{}",
            format!("   → Applying {}", remediation.action.kind()).blue()
        );
        for step in &remediation.steps {
            if step.outcome.succeeded {
                println!("     {} {}", "✓".green(), step.description);
            } else {
                println!(
                    "     {} {} (continuing)",
                    "✗".red(),
                    step.description
                );
            }
        }
    }

    fn degraded(&mut self, patient: &Patient, fault: FaultKind) {
        let message = match fault {
            FaultKind::ControlPlaneUnavailable => format!(
                "⚠️  {} could not be inspected (status: {})",
                patient.name, patient.status
            ),
            _ if patient.status == ContainerStatus::Running => format!(
                "⚠️  {} is not healthy yet (health: {})",
                patient.name, patient.health
            ),
            _ => format!(
                "⚠️  {} is not running (status: {})",
                patient.name, patient.status
            ),
        };
        println!("{}", message.yellow());
    }

    fn round_finished(&mut self, round: &Round) {
        if !round.fully_healthy() {
            println!();
        }
    }

    fn finished(&mut self, summary: &RunSummary) {
        match summary.outcome {
            Outcome::Healthy { rounds } => {
                println!();
                println!("{}", "✅ All containers are healthy!".green().bold());
                println!(
                    "{}",
                    format!("Infrastructure is ready (round {rounds}).").cyan()
                );
            }
            Outcome::Exhausted { rounds } => {
                println!();
                println!(
                    "{}",
                    format!("❌ Timeout after {rounds} attempts").red().bold()
                );
                println!(
                    "{}",
                    "Some containers failed to reach healthy state.".yellow()
                );
                println!();
                println!("{}", "💡 Troubleshooting tips:".cyan());
                for tip in troubleshooting_tips() {
                    println!("{tip}");
                }
            }
            Outcome::Interrupted { .. } => {
                println!();
                println!("{}", "⚠️  Monitoring interrupted by user".yellow());
            }
        }
    }
}
