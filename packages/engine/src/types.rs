// ABOUTME: Core type definitions for the execution engine
// ABOUTME: Defines requests, resolved limits, raw sandbox outcomes, and final results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Request to execute one source program
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    /// Language identifier, must exist in the language registry
    pub language: String,
    /// Source program text
    pub source: String,
    /// Optional data piped to the program's standard input
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    /// Optional caller-supplied limit overrides
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<LimitsOverride>,
}

/// Caller-supplied limit overrides; out-of-range values fall back to defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitsOverride {
    /// Wall-clock timeout in milliseconds, honored within 1_000..=60_000
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wall_timeout_ms: Option<u64>,
    /// Memory hard limit in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,
    /// CPU allowance as a fraction of one core
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_fraction: Option<f64>,
}

/// Limits after merging caller overrides with language and engine defaults
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedLimits {
    pub wall_timeout_ms: u64,
    pub memory_bytes: u64,
    pub cpu_fraction: f64,
}

/// Overall execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Program ran to completion with exit code 0
    Success,
    /// Program exited nonzero after a successful launch
    RuntimeError,
    /// Compile stage of a compile-then-run command failed
    CompilationError,
    /// Wall-clock deadline fired before the program exited
    Timeout,
    /// Memory hard limit was reached
    MemoryLimitExceeded,
    /// Request or source was rejected before any sandbox was started
    ValidationRejected,
    /// Engine-side failure (daemon unreachable, workspace I/O, external abort)
    InternalError,
}

/// Final result delivered to the caller for one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub execution_id: String,
    pub status: ExecutionStatus,
    /// Captured standard output, redacted and capped
    pub stdout: String,
    /// Captured standard error, redacted and capped
    pub stderr: String,
    pub exit_code: i64,
    /// Wall-clock time measured at the orchestrator layer
    pub wall_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_memory_bytes: Option<u64>,
    /// Screening or bounds-check violations, present only on rejection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violations: Option<Vec<String>>,
}

/// Why the sandboxed process stopped running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    /// Process exited on its own
    Exited,
    /// Supervisor killed the container at the wall-clock deadline
    KilledByTimeout,
    /// Kernel OOM killer fired or usage reached the memory cap
    KilledByMemory,
    /// Supervisor-side failure, including external aborts
    InternalFailure,
}

/// Raw outcome of one supervised container run, before normalization
#[derive(Debug, Clone)]
pub struct RawOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub wall_time_ms: u64,
    pub peak_memory_bytes: Option<u64>,
    pub termination_cause: TerminationCause,
}

/// Sandbox lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxState {
    Creating,
    Running,
    Terminated,
    Reaped,
}

/// Per-execution host directory bind-mounted into the sandbox
#[derive(Debug, Clone)]
pub struct Workspace {
    pub execution_id: String,
    pub dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub source_path: Option<PathBuf>,
    pub stdin_path: Option<PathBuf>,
}

/// Engine health snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineHealth {
    pub runtime_reachable: bool,
    pub active_sandbox_count: usize,
}

/// Caller context handed to the metadata sink alongside the result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_result_json_shape() {
        let result = ExecutionResult {
            execution_id: "exec_1_0000000000000000".to_string(),
            status: ExecutionStatus::MemoryLimitExceeded,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 137,
            wall_time_ms: 42,
            peak_memory_bytes: Some(1024),
            violations: None,
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["executionId"], "exec_1_0000000000000000");
        assert_eq!(json["status"], "memory_limit_exceeded");
        assert_eq!(json["wallTimeMs"], 42);
        assert_eq!(json["peakMemoryBytes"], 1024);
        assert!(json.get("violations").is_none());
    }

    #[test]
    fn test_execution_request_accepts_minimal_json() {
        let request: ExecutionRequest = serde_json::from_str(
            r#"{"language": "python", "source": "print(1)"}"#,
        )
        .unwrap();
        assert_eq!(request.language, "python");
        assert!(request.stdin.is_none());
        assert!(request.limits.is_none());
    }

    #[test]
    fn test_limits_override_camel_case_fields() {
        let limits: LimitsOverride =
            serde_json::from_str(r#"{"wallTimeoutMs": 5000, "memoryBytes": 1048576}"#).unwrap();
        assert_eq!(limits.wall_timeout_ms, Some(5_000));
        assert_eq!(limits.memory_bytes, Some(1_048_576));
        assert!(limits.cpu_fraction.is_none());
    }
}
