//! Diagnostic rule engine.
//!
//! The knowledge base is an ordered list of failure signatures. Each rule
//! carries one or more case-insensitive patterns and the remediation that
//! fixes the failure. Matching is first-match-wins in declaration order, so
//! specific signatures must come before broad ones (`timeout` is last).
//!
//! A knowledge base is built once at startup, either from the built-in rules
//! or from the `rules` section of the config file, and is never mutated.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{DoctorError, Result};

/// Corrective action bound to a diagnosis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RemediationAction {
    /// Force-remove and bring the fleet back up
    Recreate,
    /// Same procedure as `Recreate`, used when the container state itself is bad
    ResetEnvironment,
    /// Do nothing and give an in-progress recovery time to finish
    BackoffWait {
        /// Overrides the configured cooldown
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cooldown_secs: Option<u64>,
    },
    /// Repair ownership/mode of a path inside the container, then restart
    FixPermissions {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
    },
    /// Rebuild the image, redeploy, then restart
    Rebuild,
    /// Plain restart; also the fallback when nothing matched
    GenericRestart,
}

impl RemediationAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Recreate => "recreate",
            Self::ResetEnvironment => "reset-environment",
            Self::BackoffWait { .. } => "backoff-wait",
            Self::FixPermissions { .. } => "fix-permissions",
            Self::Rebuild => "rebuild",
            Self::GenericRestart => "generic-restart",
        }
    }
}

/// Serialized form of a rule, as written in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    pub patterns: Vec<String>,
    pub diagnosis: String,
    pub action: RemediationAction,
}

/// A compiled diagnostic rule
#[derive(Debug, Clone)]
pub struct Rule {
    name: String,
    patterns: Vec<Regex>,
    diagnosis: String,
    action: RemediationAction,
}

impl Rule {
    /// Compile a rule; every pattern is matched case-insensitively.
    pub fn compile(spec: RuleSpec) -> Result<Self> {
        let patterns = spec
            .patterns
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| DoctorError::InvalidPattern {
                        rule: spec.name.clone(),
                        pattern: pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: spec.name,
            patterns,
            diagnosis: spec.diagnosis,
            action: spec.action,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn diagnosis(&self) -> &str {
        &self.diagnosis
    }

    pub fn action(&self) -> &RemediationAction {
        &self.action
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(Regex::as_str)
    }

    /// Whether any pattern occurs in `logs`
    pub fn matches(&self, logs: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(logs))
    }
}

/// Ordered, immutable collection of rules
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    rules: Vec<Rule>,
}

impl KnowledgeBase {
    /// The rules shipped with the doctor
    pub fn builtin() -> Result<Self> {
        Self::from_specs(builtin_rules())
    }

    pub fn from_specs(specs: impl IntoIterator<Item = RuleSpec>) -> Result<Self> {
        let rules = specs
            .into_iter()
            .map(Rule::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// First rule, in declaration order, with a pattern found in `logs`
    pub fn diagnose(&self, logs: &str) -> Option<&Rule> {
        if logs.trim().is_empty() {
            return None;
        }
        self.rules.iter().find(|rule| rule.matches(logs))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn spec(name: &str, patterns: &[&str], diagnosis: &str, action: RemediationAction) -> RuleSpec {
    RuleSpec {
        name: name.to_string(),
        patterns: patterns.iter().map(|p| (*p).to_string()).collect(),
        diagnosis: diagnosis.to_string(),
        action,
    }
}

/// Built-in failure signatures for the default postgres/redis fleet
pub fn builtin_rules() -> Vec<RuleSpec> {
    vec![
        spec(
            "port-conflict",
            &[
                "address already in use",
                r"bind for \S+ failed",
                "port is already allocated",
            ],
            "Port conflict. The container is recreated; a host process holding the port is not freed",
            RemediationAction::Recreate,
        ),
        spec(
            "crash-recovery",
            &[
                "database system was not properly shut down",
                "automatic recovery in progress",
                "database system was interrupted",
                "loading the dataset in memory",
            ],
            "Crash recovery in progress",
            RemediationAction::BackoffWait {
                cooldown_secs: None,
            },
        ),
        spec(
            "corrupted-state",
            &[
                "invalid checkpoint record",
                "could not locate a valid checkpoint",
                "bad file format reading the append only file",
                "wrong signature trying to load db",
            ],
            "Corrupted container state",
            RemediationAction::ResetEnvironment,
        ),
        spec(
            "permission-denied",
            &["permission denied", "eacces", "cannot access"],
            "Permission problem on the data directory",
            RemediationAction::FixPermissions {
                path: "/var/lib/postgresql/data".to_string(),
                owner: Some("postgres:postgres".to_string()),
                mode: Some("700".to_string()),
            },
        ),
        spec(
            "broken-image",
            &[
                "exec format error",
                "executable file not found",
                "cannot find module",
                "module not found",
            ],
            "Image is broken or stale",
            RemediationAction::Rebuild,
        ),
        spec(
            "resource-exhaustion",
            &[
                "no space left on device",
                "disk quota exceeded",
                "out of memory",
                "cannot allocate memory",
            ],
            "Host resources exhausted (check `df -h` and `docker stats`)",
            RemediationAction::BackoffWait {
                cooldown_secs: Some(30),
            },
        ),
        spec(
            "connection",
            &["connection refused", "could not connect", "connection reset"],
            "Dependency connection failure",
            RemediationAction::GenericRestart,
        ),
        spec(
            "timeout",
            &["timed out", "timeout"],
            "Operation timed out",
            RemediationAction::GenericRestart,
        ),
    ]
}
