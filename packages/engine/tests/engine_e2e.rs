// ABOUTME: End-to-end tests for the execution engine against a real Docker daemon
// ABOUTME: Covers the full submission matrix, lifecycle invariants, and concurrency

use bollard::container::ListContainersOptions;
use bollard::Docker;
use codebox_engine::{
    EngineConfig, ExecutionEngine, ExecutionRequest, ExecutionStatus, LimitsOverride,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Check if Docker is available for testing
async fn is_docker_available() -> bool {
    match Docker::connect_with_socket_defaults() {
        Ok(docker) => docker.ping().await.is_ok(),
        Err(_) => false,
    }
}

/// Build an engine the way production does: ping the daemon and pre-pull
/// the registry images, so every scenario below runs against warm images.
async fn setup_engine() -> Arc<ExecutionEngine> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    Arc::new(
        ExecutionEngine::new(EngineConfig::default())
            .await
            .expect("Failed to start engine"),
    )
}

fn request(language: &str, source: &str) -> ExecutionRequest {
    ExecutionRequest {
        language: language.to_string(),
        source: source.to_string(),
        stdin: None,
        limits: None,
    }
}

/// Count containers labeled with the given execution id, stopped included
async fn containers_for_execution(execution_id: &str) -> usize {
    let docker = Docker::connect_with_socket_defaults().unwrap();
    let mut filters = HashMap::new();
    filters.insert(
        "label".to_string(),
        vec![format!("codebox.execution_id={}", execution_id)],
    );

    docker
        .list_containers(Some(ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        }))
        .await
        .unwrap()
        .len()
}

/// Test a minimal interpreted run
///
/// This test verifies:
/// 1. A trivial Python program runs to Success
/// 2. Stdout is captured verbatim
/// 3. Workspace and container are gone after the call returns
#[tokio::test]
async fn test_python_hello_world() {
    if !is_docker_available().await {
        println!("Skipping test: Docker not available");
        return;
    }

    let engine = setup_engine().await;
    let result = engine
        .execute(request("python", "print(\"Hello, World!\")"))
        .await;

    assert_eq!(result.status, ExecutionStatus::Success, "stderr: {}", result.stderr);
    assert_eq!(result.stdout, "Hello, World!\n");
    assert_eq!(result.exit_code, 0);

    let workspace_dir = std::env::temp_dir().join(format!("code_exec_{}", result.execution_id));
    assert!(!workspace_dir.exists(), "workspace must be destroyed");
    assert_eq!(containers_for_execution(&result.execution_id).await, 0);
}

/// Test stdin piping
///
/// This test verifies:
/// 1. Stdin provided with the request reaches the program
/// 2. Stdout reflects the piped input
#[tokio::test]
async fn test_python_reads_stdin() {
    if !is_docker_available().await {
        println!("Skipping test: Docker not available");
        return;
    }

    let engine = setup_engine().await;
    let result = engine
        .execute(ExecutionRequest {
            language: "python".to_string(),
            source: "name=input()\nprint(f\"hi {name}\")".to_string(),
            stdin: Some("Ada\n".to_string()),
            limits: None,
        })
        .await;

    assert_eq!(result.status, ExecutionStatus::Success, "stderr: {}", result.stderr);
    assert_eq!(result.stdout, "hi Ada\n");
}

/// Test wall-clock deadline enforcement
///
/// This test verifies:
/// 1. A busy-looping program is killed at the deadline
/// 2. Reported wall time is at least the timeout and within the reap grace
/// 3. The sandbox is reaped afterwards
#[tokio::test]
async fn test_infinite_loop_times_out() {
    if !is_docker_available().await {
        println!("Skipping test: Docker not available");
        return;
    }

    let engine = setup_engine().await;
    let result = engine
        .execute(ExecutionRequest {
            language: "python".to_string(),
            source: "while True: pass".to_string(),
            stdin: None,
            limits: Some(LimitsOverride {
                wall_timeout_ms: Some(2_000),
                ..Default::default()
            }),
        })
        .await;

    assert_eq!(result.status, ExecutionStatus::Timeout);
    assert!(result.wall_time_ms >= 2_000, "wall time {}", result.wall_time_ms);
    assert!(result.wall_time_ms <= 7_000, "wall time {}", result.wall_time_ms);
    assert_eq!(containers_for_execution(&result.execution_id).await, 0);
}

/// Test screening rejection before any sandbox exists
///
/// This test verifies:
/// 1. A forbidden import is rejected with a matching violation
/// 2. No container was ever created for the execution
#[tokio::test]
async fn test_forbidden_import_is_rejected() {
    if !is_docker_available().await {
        println!("Skipping test: Docker not available");
        return;
    }

    let engine = setup_engine().await;
    let result = engine.execute(request("python", "import os")).await;

    assert_eq!(result.status, ExecutionStatus::ValidationRejected);
    let violations = result.violations.expect("violations present");
    assert!(violations.iter().any(|v| v.contains("import os")));
    assert_eq!(containers_for_execution(&result.execution_id).await, 0);
}

/// Test compile-then-run for C++
#[tokio::test]
async fn test_cpp_compiles_and_runs() {
    if !is_docker_available().await {
        println!("Skipping test: Docker not available");
        return;
    }

    let engine = setup_engine().await;
    let result = engine
        .execute(request(
            "cpp",
            "#include <iostream>\nint main(){std::cout<<1+1;}",
        ))
        .await;

    assert_eq!(result.status, ExecutionStatus::Success, "stderr: {}", result.stderr);
    assert_eq!(result.stdout, "2");
}

/// Test compile-stage failure classification and path redaction
///
/// This test verifies:
/// 1. A syntax error surfaces as CompilationError
/// 2. The compiler diagnostic is preserved in stderr
/// 3. The source filename is redacted to [script]
#[tokio::test]
async fn test_cpp_syntax_error_is_compilation_error() {
    if !is_docker_available().await {
        println!("Skipping test: Docker not available");
        return;
    }

    let engine = setup_engine().await;
    let result = engine.execute(request("cpp", "int main(){return")).await;

    assert_eq!(result.status, ExecutionStatus::CompilationError);
    assert!(result.stderr.contains("error"), "stderr: {}", result.stderr);
    assert!(
        !result.stderr.contains("main.cpp"),
        "source filename must be redacted: {}",
        result.stderr
    );
}

/// Test class-bound Java filenames
///
/// This test verifies:
/// 1. The declared public class drives the source filename
/// 2. javac accepts the file and the program runs
#[tokio::test]
async fn test_java_class_bound_filename() {
    if !is_docker_available().await {
        println!("Skipping test: Docker not available");
        return;
    }

    let engine = setup_engine().await;
    let source =
        "public class Solution { public static void main(String[] args) { System.out.println(\"ok\"); } }";
    let result = engine.execute(request("java", source)).await;

    assert_eq!(result.status, ExecutionStatus::Success, "stderr: {}", result.stderr);
    assert_eq!(result.stdout, "ok\n");
}

/// Test that JavaScript process references are screened out
#[tokio::test]
async fn test_javascript_process_global_is_rejected() {
    if !is_docker_available().await {
        println!("Skipping test: Docker not available");
        return;
    }

    let engine = setup_engine().await;
    let result = engine
        .execute(request("javascript", "console.log(process.pid)"))
        .await;

    assert_eq!(result.status, ExecutionStatus::ValidationRejected);
    let violations = result.violations.expect("violations present");
    assert!(violations.iter().any(|v| v.contains("process")));
}

/// Test memory cap enforcement
///
/// This test verifies:
/// 1. An allocation loop that exceeds the cap is killed by the OOM killer
/// 2. The result is classified MemoryLimitExceeded
#[tokio::test]
async fn test_allocation_loop_hits_memory_limit() {
    if !is_docker_available().await {
        println!("Skipping test: Docker not available");
        return;
    }

    let engine = setup_engine().await;
    let result = engine
        .execute(ExecutionRequest {
            language: "python".to_string(),
            source: "data = []\nwhile True: data.append(' ' * 10485760)".to_string(),
            stdin: None,
            limits: Some(LimitsOverride {
                memory_bytes: Some(32 * 1024 * 1024),
                wall_timeout_ms: Some(20_000),
                ..Default::default()
            }),
        })
        .await;

    assert_eq!(
        result.status,
        ExecutionStatus::MemoryLimitExceeded,
        "exit {} stderr: {}",
        result.exit_code,
        result.stderr
    );
}

/// Test concurrent executions stay isolated
///
/// This test verifies:
/// 1. Twenty concurrent hello-world runs all succeed
/// 2. Every execution gets a unique id
/// 3. The live sandbox count returns to zero
#[tokio::test]
async fn test_twenty_concurrent_executions() {
    if !is_docker_available().await {
        println!("Skipping test: Docker not available");
        return;
    }

    let engine = setup_engine().await;

    let mut handles = vec![];
    for _ in 0..20 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .execute(request("python", "print(\"Hello, World!\")"))
                .await
        }));
    }

    let mut ids = std::collections::HashSet::new();
    for handle in handles {
        let result = handle.await.expect("Task panicked");
        assert_eq!(result.status, ExecutionStatus::Success, "stderr: {}", result.stderr);
        assert_eq!(result.stdout, "Hello, World!\n");
        ids.insert(result.execution_id);
    }
    assert_eq!(ids.len(), 20, "All executions should have unique ids");

    let health = engine.health().await;
    assert!(health.runtime_reachable);
    assert_eq!(health.active_sandbox_count, 0);
}

/// Test external kill of an in-flight execution
///
/// This test verifies:
/// 1. kill_execution terminates a live sandbox and returns true
/// 2. The killed execution reports InternalError, not Timeout
/// 3. A concurrent execution is unaffected
#[tokio::test]
async fn test_kill_execution_leaves_others_untouched() {
    if !is_docker_available().await {
        println!("Skipping test: Docker not available");
        return;
    }

    let engine = setup_engine().await;

    let victim_engine = engine.clone();
    let victim = tokio::spawn(async move {
        victim_engine
            .execute(request("python", "while True: pass"))
            .await
    });

    // Discover the victim's execution id through its container label.
    let docker = Docker::connect_with_socket_defaults().unwrap();
    let mut victim_id = None;
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec!["codebox.managed=true".to_string()],
        );
        let containers = docker
            .list_containers(Some(ListContainersOptions {
                all: false,
                filters,
                ..Default::default()
            }))
            .await
            .unwrap();
        if let Some(labels) = containers.into_iter().find_map(|c| c.labels) {
            victim_id = labels.get("codebox.execution_id").cloned();
            if victim_id.is_some() {
                break;
            }
        }
    }
    let victim_id = victim_id.expect("victim sandbox should be running");

    let bystander_engine = engine.clone();
    let bystander = tokio::spawn(async move {
        bystander_engine
            .execute(request("python", "print(\"Hello, World!\")"))
            .await
    });

    assert!(engine.kill_execution(&victim_id).await);

    let victim_result = victim.await.unwrap();
    assert_eq!(victim_result.status, ExecutionStatus::InternalError);
    assert!(victim_result.stderr.contains("aborted"));

    let bystander_result = bystander.await.unwrap();
    assert_eq!(bystander_result.status, ExecutionStatus::Success);
    assert_eq!(bystander_result.stdout, "Hello, World!\n");

    assert!(!engine.kill_execution(&victim_id).await, "kill is idempotent");
}

/// Test health reporting against a live daemon
#[tokio::test]
async fn test_health_reports_reachable_daemon() {
    if !is_docker_available().await {
        println!("Skipping test: Docker not available");
        return;
    }

    let engine = setup_engine().await;
    let health = engine.health().await;
    assert!(health.runtime_reachable);
    assert_eq!(health.active_sandbox_count, 0);
}
