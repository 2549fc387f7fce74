// ABOUTME: Maps raw sandbox outcomes to normalized execution results
// ABOUTME: Classifies status, redacts leaked filesystem paths, and caps output length

use crate::languages::LanguageSpec;
use crate::types::{ExecutionResult, ExecutionStatus, RawOutcome, TerminationCause};
use lazy_static::lazy_static;
use regex::Regex;

/// Fixed suffix appended exactly once when a channel exceeds its cap
pub const TRUNCATION_MARKER: &str = "\n... (output truncated)";

lazy_static! {
    static ref TMP_PATH: Regex = Regex::new(r#"/tmp/[^\s:'"`]+"#).unwrap();
    static ref SYSTEM_PATH_PREFIX: Regex =
        Regex::new(r"(?:/home|/root|/usr|/var)(?:/[\w.\-]+)*/").unwrap();
    // Compiler diagnostics from gcc and javac both carry an `error:` marker.
    static ref COMPILER_DIAGNOSTIC: Regex =
        Regex::new(r"(?m)(?:^|[\s:])error[:\s]|compilation terminated").unwrap();
}

/// Classify a raw outcome into the caller-facing status.
pub fn classify(outcome: &RawOutcome, spec: &LanguageSpec) -> ExecutionStatus {
    match outcome.termination_cause {
        TerminationCause::KilledByTimeout => ExecutionStatus::Timeout,
        TerminationCause::KilledByMemory => ExecutionStatus::MemoryLimitExceeded,
        TerminationCause::InternalFailure => ExecutionStatus::InternalError,
        TerminationCause::Exited if outcome.exit_code == 0 => ExecutionStatus::Success,
        TerminationCause::Exited => {
            // The supervisor sees a single compile-then-run command; telling
            // a compile failure apart from a runtime one is a stderr
            // heuristic by contract.
            if spec.supports_compile && COMPILER_DIAGNOSTIC.is_match(&outcome.stderr) {
                ExecutionStatus::CompilationError
            } else {
                ExecutionStatus::RuntimeError
            }
        }
    }
}

/// Redact filesystem paths leaked into captured output.
///
/// Applied in order: `/tmp/...` becomes `[temp_file]`, references to the
/// source filename become `[script]`, then absolute home/system path
/// prefixes are stripped down to the final component.
pub fn redact(text: &str, source_filename: &str) -> String {
    let redacted = TMP_PATH.replace_all(text, "[temp_file]");

    let redacted = if source_filename.is_empty() {
        redacted.into_owned()
    } else {
        let file_ref = Regex::new(&format!(
            r"(?:/app/)?{}",
            regex::escape(source_filename)
        ))
        .expect("source filename produces a valid pattern");
        file_ref.replace_all(&redacted, "[script]").into_owned()
    };

    SYSTEM_PATH_PREFIX.replace_all(&redacted, "").into_owned()
}

/// Enforce the output cap, appending the truncation marker exactly once.
pub fn truncate(text: String, cap: usize) -> String {
    if text.len() <= cap {
        return text;
    }
    // Already capped upstream: cap bytes of payload plus the marker.
    if text.ends_with(TRUNCATION_MARKER) && text.len() <= cap + TRUNCATION_MARKER.len() {
        return text;
    }

    let mut cut = cap.min(text.len());
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }

    let mut truncated = text[..cut].to_string();
    if !truncated.ends_with(TRUNCATION_MARKER) {
        truncated.push_str(TRUNCATION_MARKER);
    }
    truncated
}

/// Build the final result from a raw outcome.
pub fn build_result(
    execution_id: &str,
    outcome: RawOutcome,
    spec: &LanguageSpec,
    source_filename: &str,
    output_cap: usize,
    wall_time_ms: u64,
) -> ExecutionResult {
    let status = classify(&outcome, spec);

    let stdout = truncate(redact(&outcome.stdout, source_filename), output_cap);
    let stderr = truncate(redact(&outcome.stderr, source_filename), output_cap);

    ExecutionResult {
        execution_id: execution_id.to_string(),
        status,
        stdout,
        stderr,
        exit_code: outcome.exit_code,
        wall_time_ms,
        peak_memory_bytes: outcome.peak_memory_bytes,
        violations: None,
    }
}

/// Result for a submission the screener or bounds check rejected.
/// No sandbox was started; the violations carry the reasons.
pub fn rejection_result(execution_id: &str, violations: Vec<String>) -> ExecutionResult {
    ExecutionResult {
        execution_id: execution_id.to_string(),
        status: ExecutionStatus::ValidationRejected,
        stdout: String::new(),
        stderr: String::new(),
        exit_code: -1,
        wall_time_ms: 0,
        peak_memory_bytes: None,
        violations: Some(violations),
    }
}

/// Result for an engine-side failure (daemon unreachable, workspace I/O).
pub fn internal_error_result(
    execution_id: &str,
    message: &str,
    wall_time_ms: u64,
) -> ExecutionResult {
    ExecutionResult {
        execution_id: execution_id.to_string(),
        status: ExecutionStatus::InternalError,
        stdout: String::new(),
        stderr: message.to_string(),
        exit_code: -1,
        wall_time_ms,
        peak_memory_bytes: None,
        violations: None,
    }
}
