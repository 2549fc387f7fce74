// ABOUTME: Engine configuration loaded from environment variables
// ABOUTME: Parses byte-unit suffixes and clamps values to safe operating ranges

use std::path::PathBuf;
use tracing::warn;

/// Default memory hard limit per sandbox
const DEFAULT_MAX_MEMORY: u64 = 128 * 1024 * 1024;

/// Default CPU allowance as a fraction of one core
const DEFAULT_MAX_CPU: f64 = 0.5;

/// Default wall-clock timeout for interpreted languages, in milliseconds
const DEFAULT_DOCKER_TIMEOUT_MS: u64 = 30_000;

/// Extra wall-clock allowance for compile-then-run languages, in milliseconds
const COMPILE_TIMEOUT_HEADROOM_MS: u64 = 15_000;

/// Default cap on simultaneously running sandboxes
const DEFAULT_MAX_CONCURRENT: usize = 10;

/// Default cap on captured stdout/stderr, in bytes each
const DEFAULT_OUTPUT_CAP_BYTES: usize = 100_000;

/// Engine-wide configuration, immutable after startup
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default memory hard limit in bytes (`MAX_MEMORY`, byte-unit suffixes accepted)
    pub max_memory_bytes: u64,
    /// Default CPU fraction of one core (`MAX_CPU`)
    pub max_cpu_fraction: f64,
    /// Default wall-clock timeout in milliseconds (`DOCKER_TIMEOUT`)
    pub docker_timeout_ms: u64,
    /// Wall-clock timeout for compiled languages in milliseconds
    pub compiled_timeout_ms: u64,
    /// Cap on simultaneously running sandboxes (`MAX_CONCURRENT_EXECUTIONS`)
    pub max_concurrent_executions: usize,
    /// Cap on captured output per channel in bytes (`OUTPUT_CAP_BYTES`)
    pub output_cap_bytes: usize,
    /// Root directory under which per-execution workspaces are created
    pub tmp_root: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: DEFAULT_MAX_MEMORY,
            max_cpu_fraction: DEFAULT_MAX_CPU,
            docker_timeout_ms: DEFAULT_DOCKER_TIMEOUT_MS,
            compiled_timeout_ms: DEFAULT_DOCKER_TIMEOUT_MS + COMPILE_TIMEOUT_HEADROOM_MS,
            max_concurrent_executions: DEFAULT_MAX_CONCURRENT,
            output_cap_bytes: DEFAULT_OUTPUT_CAP_BYTES,
            tmp_root: std::env::temp_dir(),
        }
    }
}

impl EngineConfig {
    /// Build configuration from environment variables, falling back to
    /// defaults for anything unset or out of range.
    pub fn from_env() -> Self {
        let max_memory_bytes = std::env::var("MAX_MEMORY")
            .ok()
            .and_then(|v| parse_byte_size(&v))
            .filter(|&v| (16 * 1024 * 1024..=4 * 1024 * 1024 * 1024).contains(&v))
            .unwrap_or(DEFAULT_MAX_MEMORY);

        let max_cpu_fraction = std::env::var("MAX_CPU")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| (0.05..=4.0).contains(v))
            .unwrap_or(DEFAULT_MAX_CPU);

        let docker_timeout_ms = std::env::var("DOCKER_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&v| (1_000..=300_000).contains(&v))
            .unwrap_or(DEFAULT_DOCKER_TIMEOUT_MS);

        let max_concurrent_executions = std::env::var("MAX_CONCURRENT_EXECUTIONS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&v| (1..=128).contains(&v))
            .unwrap_or(DEFAULT_MAX_CONCURRENT);

        let output_cap_bytes = std::env::var("OUTPUT_CAP_BYTES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&v| (1_024..=10_000_000).contains(&v))
            .unwrap_or(DEFAULT_OUTPUT_CAP_BYTES);

        let tmp_root = std::env::var("TMP_ROOT")
            .ok()
            .map(PathBuf::from)
            .filter(|p| {
                if p.is_absolute() {
                    true
                } else {
                    warn!("Ignoring relative TMP_ROOT: {}", p.display());
                    false
                }
            })
            .unwrap_or_else(std::env::temp_dir);

        Self {
            max_memory_bytes,
            max_cpu_fraction,
            docker_timeout_ms,
            compiled_timeout_ms: docker_timeout_ms + COMPILE_TIMEOUT_HEADROOM_MS,
            max_concurrent_executions,
            output_cap_bytes,
            tmp_root,
        }
    }

    /// Default wall-clock timeout for a language, depending on whether it compiles
    pub fn default_timeout_ms(&self, compiled: bool) -> u64 {
        if compiled {
            self.compiled_timeout_ms
        } else {
            self.docker_timeout_ms
        }
    }
}

/// Parse a byte size with an optional `k`/`m`/`g` suffix (case-insensitive).
///
/// `"128m"` → 134_217_728, `"512k"` → 524_288, `"1g"` → 1_073_741_824,
/// plain numbers are taken as bytes.
pub fn parse_byte_size(input: &str) -> Option<u64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (digits, multiplier) = match trimmed.chars().last() {
        Some('k') | Some('K') => (&trimmed[..trimmed.len() - 1], 1024u64),
        Some('m') | Some('M') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        Some('g') | Some('G') => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024),
        Some(c) if c.is_ascii_digit() => (trimmed, 1),
        _ => return None,
    };

    digits
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|v| v.checked_mul(multiplier))
}
