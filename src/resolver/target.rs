use std::fmt;

use thiserror::Error;

/// Resolution error type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// A field the exec request needs resolved to an empty string
    #[error("cannot resolve target: {0} is empty")]
    EmptyField(&'static str),

    /// The principal is not allowed to open a shell in the workload
    #[error("{principal} is not allowed to access {workload}")]
    Denied { principal: String, workload: String },
}

/// Fully resolved exec target. Never mutated after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub namespace: String,
    pub workload_id: String,
    pub container: String,
    pub command: Vec<String>,
}

impl Target {
    /// Check that every field the orchestrator needs is present
    pub fn ensure_complete(&self) -> Result<(), ResolutionError> {
        if self.namespace.is_empty() {
            return Err(ResolutionError::EmptyField("namespace"));
        }
        if self.workload_id.is_empty() {
            return Err(ResolutionError::EmptyField("workload_id"));
        }
        if self.container.is_empty() {
            return Err(ResolutionError::EmptyField("container"));
        }
        if self.command.is_empty() || self.command.iter().any(String::is_empty) {
            return Err(ResolutionError::EmptyField("command"));
        }
        Ok(())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.workload_id, self.container)
    }
}
