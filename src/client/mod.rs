//! # Provider Clients
//!
//! One adapter per provider CLI. Each adapter owns four concerns:
//!
//! - **Auth probe** - check credential locations in a documented order.
//! - **Executable lookup** - user-local install, system install, then PATH.
//! - **Argument builder** - a pure `(config, resume) -> argv` function; the
//!   ordering is part of the contract with the CLI.
//! - **MCP injection** - materialize the opaque MCP blob into whatever the
//!   provider reads (settings file, env var, or flag).
//!
//! Adapters register themselves into a [`ClientRegistry`] during an explicit
//! bootstrap phase ([`register_builtin`], called from the entry point) -
//! nothing registers as an import side effect.

mod settings;

pub mod amp;
pub mod claude;
pub mod codex;
pub mod gemini;
pub mod opencode;

pub use amp::AmpClient;
pub use claude::ClaudeClient;
pub use codex::CodexClient;
pub use gemini::GeminiClient;
pub use opencode::OpenCodeClient;
pub use settings::{merge_mcp_into_settings, strip_block_comments, SettingsError};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use wait_timeout::ChildExt;

use crate::process::{HeadlessProcess, StartError};

/// Timeout for the synchronous `--version` availability probe.
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// CONFIG
// ============================================================================

/// Provider-agnostic spawn configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Model to use; empty means the provider's default.
    pub model: String,

    /// Session to resume; empty for a fresh session.
    pub session_id: String,

    /// The task prompt.
    pub prompt: String,

    /// Optional system prompt, prefixed to the prompt with a blank line.
    pub system_prompt: Option<String>,

    /// Opaque MCP config blob (JSON), materialized per provider.
    pub mcp_config: Option<String>,

    /// Ask the CLI to skip permission prompts where it supports that.
    pub skip_permissions: bool,

    /// Kill the process after this long.
    pub timeout: Option<Duration>,

    /// Working directory for the session.
    pub work_dir: PathBuf,
}

impl ClientConfig {
    pub fn new(prompt: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            work_dir: work_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_mcp_config(mut self, blob: impl Into<String>) -> Self {
        self.mcp_config = Some(blob.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn skip_permissions(mut self) -> Self {
        self.skip_permissions = true;
        self
    }

    /// The prompt handed to the CLI: the system prompt (when present) joined
    /// to the task prompt by a blank line.
    pub fn full_prompt(&self) -> String {
        match &self.system_prompt {
            Some(system) if !system.is_empty() => format!("{}\n\n{}", system, self.prompt),
            _ => self.prompt.clone(),
        }
    }
}

// ============================================================================
// AUTH & SPAWN ERRORS
// ============================================================================

/// Result of a credential probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Ok,
    NoAuth,
}

/// Synchronous spawn-time failures. All fail fast.
#[derive(Error, Debug)]
pub enum SpawnError {
    /// No credentials found for the provider.
    #[error("{provider} is not authenticated")]
    NoAuth { provider: String, hint: String },

    /// The provider CLI is not installed anywhere we look.
    #[error("{provider} executable not found")]
    NoExecutable { provider: String, hint: String },

    /// The provided MCP blob is not valid JSON.
    #[error("invalid MCP config: {reason}")]
    McpParse { reason: String },

    /// The settings file already on disk is malformed; it was left untouched.
    #[error("existing settings file is malformed: {reason}")]
    McpExistingParse { reason: String },

    /// The settings file could not be written.
    #[error("failed to write MCP settings: {0}")]
    McpWrite(#[source] std::io::Error),

    /// Pipe setup or process launch failed.
    #[error(transparent)]
    Start(#[from] StartError),
}

impl From<SettingsError> for SpawnError {
    fn from(err: SettingsError) -> Self {
        match err {
            SettingsError::InvalidMcp(err) => SpawnError::McpParse {
                reason: err.to_string(),
            },
            SettingsError::InvalidExisting(reason) => SpawnError::McpExistingParse { reason },
            SettingsError::Write(err) => SpawnError::McpWrite(err),
        }
    }
}

// ============================================================================
// CLIENT TRAIT
// ============================================================================

/// One provider CLI, as the orchestrator sees it.
#[async_trait]
pub trait AgentClient: Send + Sync + std::fmt::Debug {
    /// Provider name (registry key).
    fn name(&self) -> &'static str;

    /// Probe credential locations.
    fn check_auth(&self) -> AuthStatus;

    /// Locate the CLI binary: user-local install, system install, then PATH.
    fn find_executable(&self) -> Result<PathBuf, SpawnError>;

    /// Build the argument vector. Pure; ordering is part of the contract.
    fn build_args(&self, config: &ClientConfig, resume: bool) -> Vec<String>;

    /// Spawn a fresh session.
    async fn spawn(&self, config: &ClientConfig) -> Result<HeadlessProcess, SpawnError>;

    /// Resume an existing session (`config.session_id`).
    async fn resume(&self, config: &ClientConfig) -> Result<HeadlessProcess, SpawnError>;

    /// Check the CLI answers `--version` within a short deadline.
    fn is_available(&self) -> bool {
        let Ok(path) = self.find_executable() else {
            return false;
        };
        probe_version(&path)
    }
}

// ============================================================================
// SHARED LOOKUP HELPERS
// ============================================================================

/// Append `.exe` on Windows.
pub(crate) fn binary_name(base: &str) -> String {
    if cfg!(windows) {
        format!("{base}.exe")
    } else {
        base.to_string()
    }
}

/// Search order: the provider's user-local install candidates, the system
/// install dir, then every PATH entry.
pub(crate) fn find_executable_in(
    provider: &str,
    user_candidates: &[PathBuf],
    binary: &str,
    install_hint: &str,
) -> Result<PathBuf, SpawnError> {
    for candidate in user_candidates {
        if candidate.is_file() {
            return Ok(candidate.clone());
        }
    }

    let system = Path::new("/usr/local/bin").join(binary);
    if system.is_file() {
        return Ok(system);
    }

    if let Some(path_var) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join(binary);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }

    Err(SpawnError::NoExecutable {
        provider: provider.to_string(),
        hint: install_hint.to_string(),
    })
}

/// Run `<exe> --version` with a hard deadline, killing on overrun.
pub(crate) fn probe_version(path: &Path) -> bool {
    std::process::Command::new(path)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .and_then(|mut child| match child.wait_timeout(VERSION_PROBE_TIMEOUT)? {
            Some(status) => Ok(status.success()),
            None => {
                let _ = child.kill();
                let _ = child.wait();
                Ok(false)
            }
        })
        .unwrap_or(false)
}

/// True when the env var is set to a non-empty value.
pub(crate) fn env_var_set(name: &str) -> bool {
    std::env::var(name).map(|v| !v.is_empty()).unwrap_or(false)
}

// ============================================================================
// CLIENT REGISTRY
// ============================================================================

/// Factory producing a fresh client instance.
pub type ClientFactory = Arc<dyn Fn() -> Arc<dyn AgentClient> + Send + Sync>;

/// Lookup failure for [`ClientRegistry::create`].
#[derive(Error, Debug)]
#[error("unknown provider '{name}'; registered: {}", .registered.join(", "))]
pub struct UnknownProvider {
    pub name: String,
    pub registered: Vec<String>,
}

/// Process-wide name → factory mapping, built during bootstrap.
///
/// Thread-safe for concurrent reads; re-registering a name replaces the
/// previous factory.
#[derive(Default)]
pub struct ClientRegistry {
    factories: DashMap<String, ClientFactory>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a provider factory.
    pub fn register(&self, name: impl Into<String>, factory: ClientFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Instantiate a client by provider name.
    pub fn create(&self, name: &str) -> Result<Arc<dyn AgentClient>, UnknownProvider> {
        match self.factories.get(name) {
            Some(entry) => {
                let factory = entry.value();
                Ok(factory.as_ref()())
            }
            None => Err(UnknownProvider {
                name: name.to_string(),
                registered: self.names(),
            }),
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered provider names, sorted for stable output.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

/// Bootstrap: wire all five built-in providers. The entry point decides when
/// (and whether) this runs.
pub fn register_builtin(registry: &ClientRegistry) {
    claude::register(registry);
    amp::register(registry);
    codex::register(registry);
    gemini::register(registry);
    opencode::register(registry);
}

// ============================================================================
// TESTS
// ============================================================================
