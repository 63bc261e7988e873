//! Container Doctor CLI
//!
//! Supervises the service containers of a compose fleet: polls their status,
//! diagnoses crash loops from their logs and applies bounded remediation
//! until every container is healthy or the attempt budget runs out.
//!
//! Exit status: 0 healthy, 1 failure or timeout, 130 interrupted.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tokio::signal;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use doctor::{
    resolve_fleet, ConsoleReporter, ControlPlane, DockerCli, DoctorConfig, PatientOutcome,
    Supervisor, SupervisorSettings,
};

/// Self-healing container supervisor - diagnoses crashing containers and remediates them
#[derive(Parser)]
#[command(name = "doctor")]
#[command(about = "Self-healing container supervisor - diagnoses crashing containers and remediates them")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the JSON config file (default: ./doctor.json if present)
    #[arg(long, global = true, env = "DOCTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Container to supervise (repeatable); disables auto-discovery
    #[arg(long = "container", short = 'c', global = true)]
    containers: Vec<String>,

    /// Name filter used to auto-discover containers
    #[arg(long, global = true, env = "DOCTOR_FILTER")]
    filter: Option<String>,

    /// Compose file used to bring the fleet up and rebuild images
    #[arg(long, global = true, env = "DOCTOR_COMPOSE_FILE")]
    compose_file: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// [DEFAULT] Supervise the fleet until healthy or out of attempts
    Run(RunArgs),
    /// Check every container once, without remediation
    Status,
    /// Run the rule engine over logs and print the diagnosis
    Diagnose {
        /// Read the log tail of this container
        #[arg(long, conflicts_with = "file")]
        from_container: Option<String>,

        /// Read logs from a file (stdin if neither option is given)
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// List the knowledge base in match order
    Rules,
}

#[derive(Args, Default)]
struct RunArgs {
    /// Rounds before giving up
    #[arg(long, env = "DOCTOR_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Seconds between rounds
    #[arg(long, env = "DOCTOR_ROUND_DELAY")]
    round_delay: Option<u64>,

    /// Seconds to wait after a remediation
    #[arg(long, env = "DOCTOR_SETTLE_DELAY")]
    settle_delay: Option<u64>,

    /// Default seconds to wait for backoff-wait remediations
    #[arg(long, env = "DOCTOR_BACKOFF_COOLDOWN")]
    backoff_cooldown: Option<u64>,

    /// Log lines fetched for diagnosis
    #[arg(long, env = "DOCTOR_LOG_TAIL")]
    log_tail: Option<u32>,

    /// End a round after the first remediation
    #[arg(long)]
    stop_round_on_remediation: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut DoctorConfig) {
        if let Some(v) = self.max_attempts {
            config.max_attempts = v;
        }
        if let Some(v) = self.round_delay {
            config.round_delay_secs = v;
        }
        if let Some(v) = self.settle_delay {
            config.settle_delay_secs = v;
        }
        if let Some(v) = self.backoff_cooldown {
            config.backoff_cooldown_secs = v;
        }
        if let Some(v) = self.log_tail {
            config.log_tail = v;
        }
        if self.stop_round_on_remediation {
            config.stop_round_on_remediation = true;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", format!("❌ Unexpected error: {e:#}").red());
            ExitCode::from(1)
        }
    }
}

/// Progress goes to stdout, diagnostics to stderr
fn init_tracing(verbose: bool) {
    let default = if verbose { "doctor=debug" } else { "doctor=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<u8> {
    let mut config = DoctorConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(ref filter) = cli.filter {
        config.discovery_filter.clone_from(filter);
    }
    if cli.compose_file.is_some() {
        config.compose_file.clone_from(&cli.compose_file);
    }

    let command = cli.command.unwrap_or(Commands::Run(RunArgs::default()));
    let status_only = matches!(command, Commands::Status);
    if let Commands::Run(ref args) = command {
        args.apply(&mut config);
        config.validate().context("Invalid run options")?;
    }

    let knowledge = config
        .knowledge_base()
        .context("Failed to build knowledge base")?;
    let control: Arc<dyn ControlPlane> = Arc::new(
        DockerCli::new(config.docker_bin.clone())
            .with_compose_file(config.compose_file.clone())
            .with_project_dir(config.project_dir.clone()),
    );

    match command {
        Commands::Run(_) | Commands::Status => {
            let configured = if cli.containers.is_empty() {
                config.containers.clone()
            } else {
                cli.containers.clone()
            };
            let registry =
                resolve_fleet(&configured, &config.discovery_filter, control.as_ref()).await;
            let mut supervisor = Supervisor::new(
                control,
                knowledge,
                registry,
                SupervisorSettings::from(&config),
                Box::new(ConsoleReporter::new()),
            );

            if status_only {
                let reports = supervisor.examine().await;
                let healthy = reports
                    .iter()
                    .all(|r| matches!(r.outcome, PatientOutcome::Healthy));
                return Ok(u8::from(!healthy));
            }

            let summary = supervisor.run_until(shutdown_signal()).await;
            Ok(summary.outcome.exit_code())
        }
        Commands::Diagnose {
            from_container,
            file,
        } => {
            let logs = match (from_container, file) {
                (Some(name), _) => control.logs(&name, config.log_tail).await,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read log file: {}", path.display()))?,
                (None, None) => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("Failed to read logs from stdin")?;
                    buf
                }
            };

            match knowledge.diagnose(&logs) {
                Some(rule) => {
                    println!(
                        "{} {} ({})",
                        "Diagnosed:".green().bold(),
                        rule.diagnosis(),
                        rule.name()
                    );
                    println!("  Remediation: {}", rule.action().kind());
                    Ok(0)
                }
                None => {
                    println!(
                        "{}",
                        "No known issue pattern detected (would fall back to generic-restart)"
                            .yellow()
                    );
                    Ok(1)
                }
            }
        }
        Commands::Rules => {
            if knowledge.is_empty() {
                println!("{}", "Knowledge base is empty: every fault gets generic-restart".yellow());
            }
            for (i, rule) in knowledge.iter().enumerate() {
                println!(
                    "{:>2}. {} → {}",
                    i + 1,
                    rule.name().bold(),
                    rule.action().kind().cyan()
                );
                println!("    {}", rule.diagnosis());
                for pattern in rule.patterns() {
                    println!("    - /{pattern}/i");
                }
            }
            Ok(0)
        }
    }
}

/// Completes on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
