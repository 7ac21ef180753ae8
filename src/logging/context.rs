use std::env;
use std::str::FromStr;

/// Execution contexts that influence how logging is routed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionContext {
    /// Hosted inside a workflow executor; the host owns the console.
    Embedded,
    /// Local development, e.g. running the agent from tests or a REPL.
    LocalDev,
    /// Batch/daemon workflows that should be quiet on the console.
    Batch,
}

impl ExecutionContext {
    /// Returns `true` when console sinks should be disabled.
    pub fn disables_console(self) -> bool {
        matches!(self, ExecutionContext::Embedded | ExecutionContext::Batch)
    }
}

impl FromStr for ExecutionContext {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "embedded" => Ok(ExecutionContext::Embedded),
            "local" | "local_dev" | "dev" => Ok(ExecutionContext::LocalDev),
            "batch" => Ok(ExecutionContext::Batch),
            _ => Err(format!(
                "invalid execution context '{}'; supported values are embedded, local, batch",
                value
            )),
        }
    }
}

/// Derive the execution context from `CONDUIT_EXECUTION_CONTEXT`, defaulting
/// to embedded.
pub fn detect_context() -> ExecutionContext {
    env::var("CONDUIT_EXECUTION_CONTEXT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(ExecutionContext::Embedded)
}
