//! Error types for the container doctor.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while supervising containers.
///
/// Adapter failures during a round never surface as errors: they are folded
/// into a degraded patient status where they happen. These variants cover
/// startup (config, knowledge base) and the inspect call, whose failure the
/// vital sign check turns into a `missing` patient.
#[derive(Debug, Error)]
pub enum DoctorError {
    /// The runtime CLI could not be spawned at all
    #[error("Failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The runtime CLI ran but exited non-zero
    #[error("`{command}` failed: {output}")]
    CommandFailed { command: String, output: String },

    /// The runtime does not know the container
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    /// Inspect returned something we could not parse
    #[error("Failed to parse inspect output for {container}: {source}")]
    InspectParse {
        container: String,
        #[source]
        source: serde_json::Error,
    },

    /// A knowledge base rule carries a pattern that is not a valid regex
    #[error("Invalid pattern {pattern:?} in rule {rule}: {source}")]
    InvalidPattern {
        rule: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Config file could not be read
    #[error("Failed to read config file {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid JSON for `DoctorConfig`
    #[error("Failed to parse config file {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Config values out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T, E = DoctorError> = std::result::Result<T, E>;
