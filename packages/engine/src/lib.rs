// ABOUTME: Container-isolated execution engine for untrusted code submissions
// ABOUTME: Screens source, provisions workspaces, supervises sandboxes, and normalizes results

pub mod config;
pub mod error;
pub mod languages;
pub mod normalizer;
pub mod orchestrator;
pub mod screener;
pub mod supervisor;
pub mod types;
pub mod workspace;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use languages::LanguageSpec;
pub use orchestrator::{ExecutionEngine, MetadataSink};
pub use supervisor::SandboxSupervisor;
pub use types::{
    EngineHealth, ExecutionRequest, ExecutionResult, ExecutionStatus, InvocationContext,
    LimitsOverride, RawOutcome, ResolvedLimits, SandboxState, TerminationCause, Workspace,
};
pub use workspace::WorkspaceManager;
