use lockstep_core::CoreError;
use thiserror::Error;

/// Configuration errors found while resolving a job name into a plan.
/// All of them are raised before anything runs.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("No job or group named '{name}' (referenced via {path})")]
    UnknownJob { name: String, path: String },

    /// Found on the active resolution path; `chain` ends with the repeated name.
    #[error("Dependency cycle: {chain}")]
    Cycle { chain: String },

    /// Fallback from the topological sort when no readable chain is known.
    #[error("Dependency graph of '{root}' contains a cycle")]
    CycleDetected { root: String },

    #[error("Group '{name}' cannot take parameter or dependency overrides")]
    GroupOverride { name: String },

    #[error("Invalid parameters for job '{job}': {source}")]
    Params {
        job: String,
        #[source]
        source: CoreError,
    },
}

pub type Result<T> = std::result::Result<T, GraphError>;
