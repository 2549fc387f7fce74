// ABOUTME: Execution orchestrator driving screening, workspace setup, supervision, and cleanup
// ABOUTME: Single public entry point; guarantees no partial state leaks out of an execution

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::languages::{self, LanguageSpec};
use crate::normalizer;
use crate::screener;
use crate::supervisor::SandboxSupervisor;
use crate::types::{
    EngineHealth, ExecutionRequest, ExecutionResult, InvocationContext, LimitsOverride,
    ResolvedLimits, Workspace,
};
use crate::workspace::WorkspaceManager;
use async_trait::async_trait;
use bollard::Docker;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Wall-timeout overrides are honored only inside this range, in milliseconds
const WALL_TIMEOUT_OVERRIDE_RANGE: std::ops::RangeInclusive<u64> = 1_000..=60_000;

/// Memory overrides are honored only inside this range, in bytes
const MEMORY_OVERRIDE_RANGE: std::ops::RangeInclusive<u64> =
    16 * 1024 * 1024..=1024 * 1024 * 1024;

/// CPU-fraction overrides are honored only inside this range
const CPU_OVERRIDE_RANGE: std::ops::RangeInclusive<f64> = 0.05..=2.0;

/// Receives every final result together with its invocation context.
///
/// The engine persists nothing itself; an external layer can hook in here.
/// A sink failure is logged and never fails the execution.
#[async_trait]
pub trait MetadataSink: Send + Sync {
    async fn record(&self, result: &ExecutionResult, ctx: &InvocationContext) -> Result<()>;
}

/// The execution engine: accepts untrusted source programs and runs each in
/// a disposable, resource-capped, network-less container.
pub struct ExecutionEngine {
    config: Arc<EngineConfig>,
    workspaces: WorkspaceManager,
    supervisor: SandboxSupervisor,
    permits: Arc<Semaphore>,
    metadata_sink: Option<Arc<dyn MetadataSink>>,
}

impl ExecutionEngine {
    /// Connect to the local container daemon, verify it responds, and
    /// pre-pull the registry images. A failed pull is logged per image and
    /// becomes fatal only when that language is requested.
    pub async fn new(config: EngineConfig) -> Result<Self> {
        let docker = SandboxSupervisor::connect()?;

        docker
            .ping()
            .await
            .map_err(|e| EngineError::Runtime(format!("container daemon unreachable: {}", e)))?;
        info!("Connected to container daemon");

        let engine = Self::with_docker(docker, config);
        engine.supervisor.prepull_images().await;
        Ok(engine)
    }

    /// Build an engine over an existing Docker connection. Skips the startup
    /// ping and image pre-pull; the caller owns connection readiness.
    pub fn with_docker(docker: Docker, config: EngineConfig) -> Self {
        let config = Arc::new(config);
        Self {
            workspaces: WorkspaceManager::new(config.tmp_root.clone()),
            supervisor: SandboxSupervisor::new(docker, config.clone()),
            permits: Arc::new(Semaphore::new(config.max_concurrent_executions)),
            metadata_sink: None,
            config,
        }
    }

    /// Attach a metadata sink invoked once per execution with the final result
    pub fn with_metadata_sink(mut self, sink: Arc<dyn MetadataSink>) -> Self {
        self.metadata_sink = Some(sink);
        self
    }

    /// Execute one submission end to end and return its result.
    ///
    /// Never returns an error: engine-side failures are folded into an
    /// `InternalError` result so the caller always gets a well-formed record.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        self.execute_with_context(request, InvocationContext::default())
            .await
    }

    /// Execute with caller context that is forwarded to the metadata sink
    pub async fn execute_with_context(
        &self,
        request: ExecutionRequest,
        ctx: InvocationContext,
    ) -> ExecutionResult {
        let execution_id = generate_execution_id();
        info!(%execution_id, language = %request.language, "Execution requested");

        let result = self.execute_inner(&execution_id, &request).await;

        info!(
            %execution_id,
            status = ?result.status,
            wall_time_ms = result.wall_time_ms,
            "Execution finished"
        );

        if let Some(sink) = &self.metadata_sink {
            if let Err(e) = sink.record(&result, &ctx).await {
                warn!(%execution_id, "Metadata sink failed: {}", e);
            }
        }

        result
    }

    /// Terminate an in-flight execution. Returns whether a live sandbox was
    /// found and signalled; its orchestrator call still reaps and cleans up.
    pub async fn kill_execution(&self, execution_id: &str) -> bool {
        self.supervisor.kill(execution_id).await
    }

    /// Engine health: daemon reachability and live sandbox count
    pub async fn health(&self) -> EngineHealth {
        EngineHealth {
            runtime_reachable: self.supervisor.ping().await,
            active_sandbox_count: self.supervisor.active_count().await,
        }
    }

    /// Remove managed containers left over from a previous engine process
    pub async fn reap_orphans(&self) -> Result<Vec<String>> {
        self.supervisor.reap_orphans().await
    }

    async fn execute_inner(
        &self,
        execution_id: &str,
        request: &ExecutionRequest,
    ) -> ExecutionResult {
        // Screening happens before any permit or sandbox is taken; a
        // rejected source never starts a container.
        let violations = validate_request(request);
        if !violations.is_empty() {
            info!(execution_id, ?violations, "Submission rejected");
            return normalizer::rejection_result(execution_id, violations);
        }

        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return normalizer::internal_error_result(
                    execution_id,
                    "engine is shutting down",
                    0,
                );
            }
        };

        let spec = languages::lookup(&request.language)
            .expect("language validated against registry");
        let limits = resolve_limits(spec, &self.config, request.limits.as_ref());
        let sanitized_source = screener::sanitize_source(&request.source);

        let mut workspace = match self.workspaces.create(execution_id).await {
            Ok(workspace) => workspace,
            Err(e) => {
                warn!(execution_id, "Workspace creation failed: {}", e);
                return normalizer::internal_error_result(execution_id, &e.to_string(), 0);
            }
        };

        let result = self
            .run_in_workspace(execution_id, &mut workspace, request, spec, &sanitized_source, &limits)
            .await;

        // Workspace destruction runs on every path, strictly after the
        // supervisor has reaped the sandbox.
        self.workspaces.destroy(&workspace).await;

        result
    }

    async fn run_in_workspace(
        &self,
        execution_id: &str,
        workspace: &mut Workspace,
        request: &ExecutionRequest,
        spec: &LanguageSpec,
        sanitized_source: &str,
        limits: &ResolvedLimits,
    ) -> ExecutionResult {
        let source_filename = spec.source_filename(sanitized_source);

        if let Err(e) = self
            .workspaces
            .write_source(workspace, &source_filename, sanitized_source)
            .await
        {
            warn!(execution_id, "Source write failed: {}", e);
            return normalizer::internal_error_result(execution_id, &e.to_string(), 0);
        }

        if let Some(stdin) = &request.stdin {
            if let Err(e) = self.workspaces.write_stdin(workspace, stdin).await {
                warn!(execution_id, "Stdin write failed: {}", e);
                return normalizer::internal_error_result(execution_id, &e.to_string(), 0);
            }
        }

        let started = Instant::now();
        match self.supervisor.run(workspace, spec, limits).await {
            Ok(outcome) => normalizer::build_result(
                execution_id,
                outcome,
                spec,
                &source_filename,
                self.config.output_cap_bytes,
                started.elapsed().as_millis() as u64,
            ),
            Err(e) => {
                warn!(execution_id, "Supervisor failed: {}", e);
                normalizer::internal_error_result(
                    execution_id,
                    &e.to_string(),
                    started.elapsed().as_millis() as u64,
                )
            }
        }
    }
}

/// Globally unique execution id: `exec_<millis>_<16 hex>`
fn generate_execution_id() -> String {
    format!(
        "exec_{}_{:016x}",
        Utc::now().timestamp_millis(),
        rand::random::<u64>()
    )
}

/// Request bounds checks plus lexical screening, one violation list.
fn validate_request(request: &ExecutionRequest) -> Vec<String> {
    let mut violations = Vec::new();

    if languages::lookup(&request.language).is_none() {
        let mut supported = languages::registered_ids();
        supported.sort_unstable();
        violations.push(format!(
            "unsupported language: {} (supported: {})",
            request.language,
            supported.join(", ")
        ));
    }

    if let Some(stdin) = &request.stdin {
        if stdin.len() > screener::MAX_STDIN_BYTES {
            violations.push(format!(
                "stdin exceeds {} byte limit ({} bytes)",
                screener::MAX_STDIN_BYTES,
                stdin.len()
            ));
        }
        if stdin.contains('\0') {
            violations.push("stdin contains NUL bytes".to_string());
        }
    }

    violations.extend(screener::validate(&request.source, &request.language));
    violations
}

/// Merge caller overrides with language and engine defaults; out-of-range
/// overrides fall back to the default rather than rejecting the request.
fn resolve_limits(
    spec: &LanguageSpec,
    config: &EngineConfig,
    overrides: Option<&LimitsOverride>,
) -> ResolvedLimits {
    let overrides = overrides.cloned().unwrap_or_default();

    ResolvedLimits {
        wall_timeout_ms: overrides
            .wall_timeout_ms
            .filter(|v| WALL_TIMEOUT_OVERRIDE_RANGE.contains(v))
            .unwrap_or_else(|| config.default_timeout_ms(spec.supports_compile)),
        memory_bytes: overrides
            .memory_bytes
            .filter(|v| MEMORY_OVERRIDE_RANGE.contains(v))
            .unwrap_or(config.max_memory_bytes),
        cpu_fraction: overrides
            .cpu_fraction
            .filter(|v| CPU_OVERRIDE_RANGE.contains(v))
            .unwrap_or(config.max_cpu_fraction),
    }
}
