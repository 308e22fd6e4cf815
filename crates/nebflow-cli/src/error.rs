use nebflow_core::domain::{ControllerError, RunOutcome};
use nebflow_core::project::ProjectError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse plan '{path}': {source}", path = path.display())]
    PlanParsing {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Pipeline {outcome}{}", detail.as_ref().map(|d| format!(": {d}")).unwrap_or_default())]
    Run {
        outcome: RunOutcome,
        detail: Option<String>,
    },
}
