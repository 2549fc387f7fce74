// ABOUTME: Per-execution workspace directories bind-mounted into sandboxes
// ABOUTME: Creates scoped temp directories and guarantees removal on all exit paths

use crate::error::{EngineError, Result};
use crate::types::Workspace;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the optional stdin file inside the workspace
pub const STDIN_FILENAME: &str = "input.txt";

/// Manages per-execution host directories under a single temp root
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    tmp_root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(tmp_root: impl Into<PathBuf>) -> Self {
        Self {
            tmp_root: tmp_root.into(),
        }
    }

    /// Allocate a fresh directory scoped to one execution.
    ///
    /// The directory must not be world-accessible; the sandbox reaches it
    /// only through the bind mount.
    pub async fn create(&self, execution_id: &str) -> Result<Workspace> {
        let dir = self.tmp_root.join(format!("code_exec_{}", execution_id));

        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            EngineError::Workspace(format!(
                "failed to create workspace {}: {}",
                dir.display(),
                e
            ))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            tokio::fs::set_permissions(&dir, perms).await.map_err(|e| {
                EngineError::Workspace(format!(
                    "failed to set workspace permissions on {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        debug!(execution_id, dir = %dir.display(), "Created workspace");

        Ok(Workspace {
            execution_id: execution_id.to_string(),
            dir,
            created_at: Utc::now(),
            source_path: None,
            stdin_path: None,
        })
    }

    /// Write sanitized source under the language-derived filename
    pub async fn write_source(
        &self,
        workspace: &mut Workspace,
        filename: &str,
        sanitized_source: &str,
    ) -> Result<()> {
        let path = workspace.dir.join(filename);
        write_file(&path, sanitized_source.as_bytes()).await?;
        workspace.source_path = Some(path);
        Ok(())
    }

    /// Write stdin as a sibling file the launch command redirects from
    pub async fn write_stdin(&self, workspace: &mut Workspace, stdin: &str) -> Result<()> {
        let path = workspace.dir.join(STDIN_FILENAME);
        write_file(&path, stdin.as_bytes()).await?;
        workspace.stdin_path = Some(path);
        Ok(())
    }

    /// Recursively remove the workspace directory.
    ///
    /// Never propagates failure upward; a leaked directory is logged and the
    /// execution result is still delivered. Safe to call twice.
    pub async fn destroy(&self, workspace: &Workspace) {
        match tokio::fs::remove_dir_all(&workspace.dir).await {
            Ok(()) => {
                debug!(
                    execution_id = %workspace.execution_id,
                    dir = %workspace.dir.display(),
                    "Destroyed workspace"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(
                    execution_id = %workspace.execution_id,
                    dir = %workspace.dir.display(),
                    "Failed to destroy workspace: {}",
                    e
                );
            }
        }
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    tokio::fs::write(path, contents).await.map_err(|e| {
        EngineError::Workspace(format!("failed to write {}: {}", path.display(), e))
    })
}
