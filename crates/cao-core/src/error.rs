/// Error taxonomy shared across the orchestrator.
///
/// Scheduling signals (lock denials) are NOT errors; they are returned as
/// values by the lock manager. Everything here propagates through `Result`.
#[derive(thiserror::Error, Debug)]
pub enum OrchestratorError {
    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Unknown assistant '{0}'")]
    UnknownAssistant(String),

    #[error("No candidate assistants for task")]
    NoCandidates,

    #[error("Help probe for '{assistant}' failed: {detail}")]
    ProbeFailure { assistant: String, detail: String },

    #[error("Failed to spawn '{assistant}': {detail}")]
    SpawnFailure { assistant: String, detail: String },

    #[error("{scope} timed out after {timeout_ms} ms")]
    Timeout { scope: String, timeout_ms: u64 },

    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("Subtask '{subtask}' depends on '{dependency}' which did not succeed")]
    DependencyFailure { subtask: String, dependency: String },

    #[error("On-disk state is inconsistent: {0}")]
    Integrity(String),
}

impl OrchestratorError {
    /// CLI exit code for errors that abort before a task report exists.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) | Self::UnknownAssistant(_) | Self::DependencyCycle(_) => 64,
            Self::NoCandidates => 3,
            _ => 70,
        }
    }
}
