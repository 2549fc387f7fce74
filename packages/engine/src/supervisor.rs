// ABOUTME: Sandbox supervisor managing one disposable container per execution via bollard
// ABOUTME: Enforces resource limits, demultiplexes output under deadline, and guarantees reaping

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::languages::LanguageSpec;
use crate::normalizer::TRUNCATION_MARKER;
use crate::types::{RawOutcome, ResolvedLimits, SandboxState, TerminationCause, Workspace};
use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions, KillContainerOptions,
    ListContainersOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
    StatsOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, ResourcesUlimits};
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Labels applied to every sandbox container for tracking
const MANAGED_LABEL: &str = "codebox.managed";
const EXECUTION_LABEL: &str = "codebox.execution_id";

/// CPU scheduler period the quota is computed against, in microseconds
const CPU_PERIOD_USEC: i64 = 100_000;

/// Hard cap on processes inside the sandbox
const PID_LIMIT: i64 = 50;

/// Grace period for container stop during reaping, in seconds
const STOP_GRACE_SECS: i64 = 5;

/// How long to wait for buffered output after termination, in seconds
const DRAIN_TIMEOUT_SECS: u64 = 2;

/// Mount point of the workspace inside the sandbox
const SANDBOX_WORKDIR: &str = "/app";

/// Exit code the runtime reports for SIGKILL, including the OOM killer
const SIGKILL_EXIT_CODE: i64 = 137;

struct LiveSandbox {
    container_id: String,
    externally_killed: Arc<AtomicBool>,
}

/// Launches, supervises, and reaps one container per execution.
///
/// A process-wide registry maps execution ids to live container handles so
/// an external kill request can find an in-flight execution. Entries are
/// inserted on start and removed on reap; no sandbox outlives its caller.
#[derive(Clone)]
pub struct SandboxSupervisor {
    docker: Docker,
    config: Arc<EngineConfig>,
    live: Arc<RwLock<HashMap<String, LiveSandbox>>>,
}

impl SandboxSupervisor {
    pub fn new(docker: Docker, config: Arc<EngineConfig>) -> Self {
        Self {
            docker,
            config,
            live: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Connect to the local container daemon.
    ///
    /// On Unix: /var/run/docker.sock
    /// On Windows: npipe:////./pipe/docker_engine
    pub fn connect() -> Result<Docker> {
        #[cfg(unix)]
        let docker = Docker::connect_with_socket_defaults()?;

        #[cfg(windows)]
        let docker = Docker::connect_with_named_pipe_defaults()?;

        Ok(docker)
    }

    /// Whether the container daemon responds to a ping
    pub async fn ping(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    /// Number of sandboxes currently live (started, not yet reaped)
    pub async fn active_count(&self) -> usize {
        self.live.read().await.len()
    }

    /// Run one populated workspace to completion under the resolved limits.
    ///
    /// The container is always stopped and removed before this returns,
    /// whatever the outcome; reap failures are logged, never propagated.
    pub async fn run(
        &self,
        workspace: &Workspace,
        spec: &LanguageSpec,
        limits: &ResolvedLimits,
    ) -> Result<RawOutcome> {
        let execution_id = workspace.execution_id.as_str();
        let source_filename = workspace
            .source_path
            .as_ref()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                EngineError::Workspace(format!(
                    "workspace for {} has no source file",
                    execution_id
                ))
            })?;

        let command = spec.launch_command(source_filename, workspace.stdin_path.is_some());
        debug!(execution_id, state = ?SandboxState::Creating, image = spec.image, ?command, "Creating sandbox");

        let container_id = self
            .create_container(execution_id, workspace, spec, limits, command)
            .await?;

        let result = self
            .supervise(execution_id, &container_id, limits)
            .await;

        self.reap(execution_id, &container_id).await;

        result
    }

    /// Terminate an in-flight execution by id.
    ///
    /// Returns true when a live sandbox was found and signalled. The owning
    /// orchestrator still performs stats collection, reaping, and cleanup.
    pub async fn kill(&self, execution_id: &str) -> bool {
        let live = self.live.read().await;
        let Some(sandbox) = live.get(execution_id) else {
            return false;
        };

        sandbox.externally_killed.store(true, Ordering::SeqCst);
        let container_id = sandbox.container_id.clone();
        drop(live);

        info!(execution_id, %container_id, "Killing sandbox on external request");
        let options = KillContainerOptions { signal: "SIGKILL" };
        if let Err(e) = self.docker.kill_container(&container_id, Some(options)).await {
            warn!(execution_id, "Failed to kill container: {}", e);
        }
        true
    }

    /// Pre-pull every image the language registry needs.
    ///
    /// A failed pull is logged per image and is fatal only once the
    /// corresponding language is actually requested.
    pub async fn prepull_images(&self) {
        for image in crate::languages::registry_images() {
            let options = CreateImageOptions {
                from_image: image,
                ..Default::default()
            };

            let mut stream = self.docker.create_image(Some(options), None, None);
            let mut failed = None;
            while let Some(progress) = stream.next().await {
                if let Err(e) = progress {
                    failed = Some(e);
                    break;
                }
            }

            match failed {
                None => info!(image, "Image ready"),
                Some(e) => warn!(image, "Failed to pull image: {}", e),
            }
        }
    }

    /// Remove managed containers that no live execution owns.
    ///
    /// Finds containers labeled by this engine whose execution id is absent
    /// from the live registry (left over from a crashed process) and
    /// force-removes them. Returns the ids that were cleaned up.
    pub async fn reap_orphans(&self) -> Result<Vec<String>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![concat_label(MANAGED_LABEL, "true")],
        );

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;
        let live = self.live.read().await;
        let live_ids: Vec<&str> = live.values().map(|s| s.container_id.as_str()).collect();

        let mut reaped = Vec::new();
        for container in containers {
            let Some(id) = container.id else { continue };
            if live_ids.contains(&id.as_str()) {
                continue;
            }

            warn!(container_id = %id, "Removing orphaned sandbox container");
            let _ = self.stop_tolerant(&id).await;
            match self.remove_tolerant(&id).await {
                Ok(()) => reaped.push(id),
                Err(e) => warn!(container_id = %id, "Failed to remove orphan: {}", e),
            }
        }

        Ok(reaped)
    }

    async fn create_container(
        &self,
        execution_id: &str,
        workspace: &Workspace,
        spec: &LanguageSpec,
        limits: &ResolvedLimits,
        command: Vec<String>,
    ) -> Result<String> {
        let mut labels = HashMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        labels.insert(EXECUTION_LABEL.to_string(), execution_id.to_string());

        let host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:{}:rw",
                workspace.dir.display(),
                SANDBOX_WORKDIR
            )]),
            memory: Some(limits.memory_bytes as i64),
            memory_swap: Some(limits.memory_bytes as i64),
            cpu_period: Some(CPU_PERIOD_USEC),
            cpu_quota: Some((limits.cpu_fraction * CPU_PERIOD_USEC as f64) as i64),
            pids_limit: Some(PID_LIMIT),
            ulimits: Some(vec![
                ResourcesUlimits {
                    name: Some("nofile".to_string()),
                    soft: Some(64),
                    hard: Some(64),
                },
                ResourcesUlimits {
                    name: Some("nproc".to_string()),
                    soft: Some(32),
                    hard: Some(32),
                },
            ]),
            network_mode: Some("none".to_string()),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            privileged: Some(false),
            auto_remove: Some(false),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.to_string()),
            cmd: Some(command),
            working_dir: Some(SANDBOX_WORKDIR.to_string()),
            labels: Some(labels),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            network_disabled: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: format!("codebox-{}", execution_id),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| EngineError::Runtime(format!("container create failed: {}", e)))?;

        debug!(execution_id, container_id = %response.id, "Created container");
        Ok(response.id)
    }

    /// Attach, start, race wait-for-exit against the deadline, then collect
    /// stats. The attach happens before start so no early output is lost.
    async fn supervise(
        &self,
        execution_id: &str,
        container_id: &str,
        limits: &ResolvedLimits,
    ) -> Result<RawOutcome> {
        let attach = self
            .docker
            .attach_container(
                container_id,
                Some(AttachContainerOptions::<String> {
                    stdout: Some(true),
                    stderr: Some(true),
                    stream: Some(true),
                    logs: Some(true),
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| EngineError::Runtime(format!("container attach failed: {}", e)))?;

        let cap = self.config.output_cap_bytes;
        let mut output_stream = attach.output;
        let reader = tokio::spawn(async move {
            let mut stdout = BoundedBuffer::new(cap);
            let mut stderr = BoundedBuffer::new(cap);
            while let Some(chunk) = output_stream.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => stdout.push(&message),
                    Ok(LogOutput::StdErr { message }) => stderr.push(&message),
                    Ok(LogOutput::Console { message }) => stdout.push(&message),
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
            (stdout, stderr)
        });

        let externally_killed = Arc::new(AtomicBool::new(false));

        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| EngineError::Runtime(format!("container start failed: {}", e)))?;

        self.live.write().await.insert(
            execution_id.to_string(),
            LiveSandbox {
                container_id: container_id.to_string(),
                externally_killed: externally_killed.clone(),
            },
        );

        let started_at = Instant::now();
        debug!(execution_id, state = ?SandboxState::Running, "Started container");

        let mut wait_stream = self.docker.wait_container(
            container_id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );
        let deadline = tokio::time::sleep(Duration::from_millis(limits.wall_timeout_ms));

        let (mut termination_cause, exit_code) = tokio::select! {
            waited = wait_stream.next() => match waited {
                Some(Ok(body)) => (TerminationCause::Exited, body.status_code),
                Some(Err(BollardError::DockerContainerWaitError { code, .. })) => {
                    (TerminationCause::Exited, code)
                }
                Some(Err(e)) => {
                    warn!(execution_id, "Container wait failed: {}", e);
                    (TerminationCause::InternalFailure, -1)
                }
                None => {
                    warn!(execution_id, "Container wait stream ended unexpectedly");
                    (TerminationCause::InternalFailure, -1)
                }
            },
            _ = deadline => {
                info!(execution_id, timeout_ms = limits.wall_timeout_ms, "Deadline fired, killing sandbox");
                let options = KillContainerOptions { signal: "SIGKILL" };
                if let Err(e) = self.docker.kill_container(container_id, Some(options)).await {
                    warn!(execution_id, "Failed to kill timed-out container: {}", e);
                }
                (TerminationCause::KilledByTimeout, SIGKILL_EXIT_CODE)
            }
        };

        // After a kill, let the daemon observe the termination before the
        // stats query.
        if termination_cause == TerminationCause::KilledByTimeout {
            let _ = tokio::time::timeout(
                Duration::from_secs(STOP_GRACE_SECS as u64),
                wait_stream.next(),
            )
            .await;
        }

        let wall_time_ms = started_at.elapsed().as_millis() as u64;

        // Drain what the reader buffered; the attach stream closes with the
        // container, so this resolves promptly after termination.
        let (stdout, mut stderr) =
            match tokio::time::timeout(Duration::from_secs(DRAIN_TIMEOUT_SECS), reader).await {
                Ok(Ok((out, err))) => (out.into_string(), err.into_string()),
                Ok(Err(e)) => {
                    warn!(execution_id, "Output reader task failed: {}", e);
                    (String::new(), String::new())
                }
                Err(_) => {
                    warn!(execution_id, "Timed out draining output streams");
                    (String::new(), String::new())
                }
            };

        // Stats must be read before the final remove; some runtimes zero
        // them once the container is gone.
        let peak_memory_bytes = self.query_peak_memory(container_id).await;
        let oom_killed = self.query_oom_killed(container_id).await;

        if termination_cause == TerminationCause::Exited
            && (oom_killed
                || peak_memory_bytes.is_some_and(|peak| peak >= limits.memory_bytes))
        {
            termination_cause = TerminationCause::KilledByMemory;
        }

        if externally_killed.load(Ordering::SeqCst) {
            termination_cause = TerminationCause::InternalFailure;
            if !stderr.is_empty() {
                stderr.push('\n');
            }
            stderr.push_str("execution aborted by kill request");
        }

        debug!(
            execution_id,
            state = ?SandboxState::Terminated,
            ?termination_cause,
            exit_code,
            wall_time_ms,
            "Sandbox terminated"
        );

        Ok(RawOutcome {
            stdout,
            stderr,
            exit_code,
            wall_time_ms,
            peak_memory_bytes,
            termination_cause,
        })
    }

    /// Query peak memory usage from container stats, one shot
    async fn query_peak_memory(&self, container_id: &str) -> Option<u64> {
        let options = StatsOptions {
            stream: false,
            one_shot: true,
        };

        let mut stats_stream = self.docker.stats(container_id, Some(options));
        match stats_stream.next().await {
            Some(Ok(stats)) => stats
                .memory_stats
                .max_usage
                .or(stats.memory_stats.usage)
                .filter(|&v| v > 0),
            _ => None,
        }
    }

    async fn query_oom_killed(&self, container_id: &str) -> bool {
        match self.docker.inspect_container(container_id, None).await {
            Ok(inspect) => inspect
                .state
                .and_then(|state| state.oom_killed)
                .unwrap_or(false),
            Err(e) => {
                warn!(container_id, "Failed to inspect container for OOM state: {}", e);
                false
            }
        }
    }

    /// Stop and remove the container, then drop the live-registry entry.
    /// Idempotent: already-stopped and already-removed are not errors.
    async fn reap(&self, execution_id: &str, container_id: &str) {
        if let Err(e) = self.stop_tolerant(container_id).await {
            warn!(execution_id, container_id, "Failed to stop container: {}", e);
        }
        if let Err(e) = self.remove_tolerant(container_id).await {
            warn!(execution_id, container_id, "Failed to remove container: {}", e);
        }

        self.live.write().await.remove(execution_id);
        debug!(execution_id, container_id, state = ?SandboxState::Reaped, "Reaped sandbox");
    }

    async fn stop_tolerant(&self, container_id: &str) -> Result<()> {
        let options = StopContainerOptions { t: STOP_GRACE_SECS };
        match self.docker.stop_container(container_id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_tolerant(&self, container_id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self.docker.remove_container(container_id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn concat_label(key: &str, value: &str) -> String {
    format!("{}={}", key, value)
}

/// Per-channel output buffer bounded by the output cap.
///
/// Bytes past the cap are discarded; the truncation marker is appended
/// exactly once when converting to a string.
struct BoundedBuffer {
    data: Vec<u8>,
    cap: usize,
    truncated: bool,
}

impl BoundedBuffer {
    fn new(cap: usize) -> Self {
        Self {
            data: Vec::new(),
            cap,
            truncated: false,
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        if self.data.len() >= self.cap {
            self.truncated = true;
            return;
        }

        let remaining = self.cap - self.data.len();
        if bytes.len() > remaining {
            self.data.extend_from_slice(&bytes[..remaining]);
            self.truncated = true;
        } else {
            self.data.extend_from_slice(bytes);
        }
    }

    fn into_string(self) -> String {
        let mut text = String::from_utf8_lossy(&self.data).into_owned();
        if self.truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }
}
