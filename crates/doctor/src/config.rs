//! Supervisor configuration.
//!
//! Loaded from an optional JSON file (`doctor.json` by default). Every field
//! has a default, so an empty object or a missing default file is a valid
//! configuration. Command line flags are applied on top by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DoctorError, Result};
use crate::rules::{KnowledgeBase, RuleSpec};

/// Config file looked up when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "doctor.json";

/// Name filter used for auto-discovery
pub const DEFAULT_DISCOVERY_FILTER: &str = "kaven-";

/// Fleet supervised when nothing is configured or discovered
pub const DEFAULT_CONTAINERS: &[&str] = &["kaven-postgres", "kaven-redis"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DoctorConfig {
    /// Containers to supervise; empty means auto-discover
    pub containers: Vec<String>,
    /// Name filter for auto-discovery
    pub discovery_filter: String,
    /// Rounds before giving up
    pub max_attempts: u32,
    /// Pause between rounds
    pub round_delay_secs: u64,
    /// Pause after each remediation before the next check
    pub settle_delay_secs: u64,
    /// Default wait for `backoff-wait` remediations
    pub backoff_cooldown_secs: u64,
    /// Log lines fetched for diagnosis
    pub log_tail: u32,
    /// End the round after the first remediation instead of checking the
    /// remaining patients
    pub stop_round_on_remediation: bool,
    /// Container runtime binary
    pub docker_bin: String,
    /// Compose file used for fleet bring-up and rebuilds
    pub compose_file: Option<PathBuf>,
    /// Compose project directory
    pub project_dir: Option<PathBuf>,
    /// Replaces the built-in knowledge base when set
    pub rules: Option<Vec<RuleSpec>>,
}

impl Default for DoctorConfig {
    fn default() -> Self {
        Self {
            containers: Vec::new(),
            discovery_filter: DEFAULT_DISCOVERY_FILTER.to_string(),
            max_attempts: 15,
            round_delay_secs: 5,
            settle_delay_secs: 5,
            backoff_cooldown_secs: 10,
            log_tail: 50,
            stop_round_on_remediation: false,
            docker_bin: "docker".to_string(),
            compose_file: None,
            project_dir: None,
            rules: None,
        }
    }
}

impl DoctorConfig {
    /// Load the config file.
    ///
    /// An explicit path must exist. Without one, `doctor.json` in the working
    /// directory is used if present, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        if !required && !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|source| DoctorError::ConfigRead {
            path: path.clone(),
            source,
        })?;
        Self::from_json(&path, &content)
    }

    pub fn from_json(path: &Path, content: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(content).map_err(|source| DoctorError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(DoctorError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.log_tail == 0 {
            return Err(DoctorError::InvalidConfig(
                "log_tail must be at least 1".to_string(),
            ));
        }
        if self.docker_bin.trim().is_empty() {
            return Err(DoctorError::InvalidConfig(
                "docker_bin must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The knowledge base this config selects
    pub fn knowledge_base(&self) -> Result<KnowledgeBase> {
        match &self.rules {
            Some(specs) => KnowledgeBase::from_specs(specs.iter().cloned()),
            None => KnowledgeBase::builtin(),
        }
    }

    pub fn round_delay(&self) -> Duration {
        Duration::from_secs(self.round_delay_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    pub fn backoff_cooldown(&self) -> Duration {
        Duration::from_secs(self.backoff_cooldown_secs)
    }
}
