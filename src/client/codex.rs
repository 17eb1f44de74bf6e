//! Codex CLI adapter.
//!
//! Runs `codex exec --json`; resume inserts `resume <session>` after the
//! subcommand. The MCP blob travels through the `CODEX_MCP_CONFIG`
//! environment variable.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use crate::client::{
    binary_name, env_var_set, find_executable_in, AgentClient, AuthStatus, ClientConfig,
    ClientFactory, ClientRegistry, SpawnError,
};
use crate::parser::CodexParser;
use crate::process::{HeadlessProcess, ProcessOptions};

const INSTALL_HINT: &str = "install with: npm install -g @openai/codex";
const AUTH_HINT: &str = "run 'codex login' or set OPENAI_API_KEY";

/// Environment variable the Codex CLI reads inline MCP config from.
pub const MCP_CONFIG_ENV: &str = "CODEX_MCP_CONFIG";

/// Adapter for the Codex CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodexClient;

impl CodexClient {
    pub fn new() -> Self {
        Self
    }

    fn user_candidates(binary: &str) -> Vec<PathBuf> {
        let Some(home) = dirs::home_dir() else {
            return Vec::new();
        };
        vec![
            home.join(".codex").join("bin").join(binary),
            home.join(".local").join("bin").join(binary),
        ]
    }

    fn build_process(
        &self,
        config: &ClientConfig,
        resume: bool,
    ) -> Result<HeadlessProcess, SpawnError> {
        if self.check_auth() == AuthStatus::NoAuth {
            return Err(SpawnError::NoAuth {
                provider: self.name().to_string(),
                hint: AUTH_HINT.to_string(),
            });
        }
        let exe = self.find_executable()?;

        let mut command = Command::new(exe);
        command.args(self.build_args(config, resume));
        if let Some(blob) = &config.mcp_config {
            serde_json::from_str::<serde_json::Value>(blob).map_err(|err| {
                SpawnError::McpParse {
                    reason: err.to_string(),
                }
            })?;
            command.env(MCP_CONFIG_ENV, blob);
        }

        let mut process = HeadlessProcess::new(
            command,
            ProcessOptions {
                provider: self.name().to_string(),
                parser: Arc::new(CodexParser::new()),
                capture_stderr: true,
                timeout: config.timeout,
                work_dir: config.work_dir.clone(),
            },
        );
        process.start()?;
        Ok(process)
    }
}

#[async_trait]
impl AgentClient for CodexClient {
    fn name(&self) -> &'static str {
        "codex"
    }

    /// Credential order: `~/.codex/auth.json`, then `OPENAI_API_KEY`.
    fn check_auth(&self) -> AuthStatus {
        if let Some(home) = dirs::home_dir() {
            if home.join(".codex").join("auth.json").is_file() {
                return AuthStatus::Ok;
            }
        }
        if env_var_set("OPENAI_API_KEY") {
            return AuthStatus::Ok;
        }
        AuthStatus::NoAuth
    }

    fn find_executable(&self) -> Result<PathBuf, SpawnError> {
        let binary = binary_name("codex");
        find_executable_in(
            self.name(),
            &Self::user_candidates(&binary),
            &binary,
            INSTALL_HINT,
        )
    }

    fn build_args(&self, config: &ClientConfig, resume: bool) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if resume && !config.session_id.is_empty() {
            args.push("resume".to_string());
            args.push(config.session_id.clone());
        }
        args.push("--json".to_string());
        if !config.model.is_empty() {
            args.push("--model".to_string());
            args.push(config.model.clone());
        }
        if config.skip_permissions {
            args.push("--full-auto".to_string());
        }
        args.push(config.full_prompt());
        args
    }

    async fn spawn(&self, config: &ClientConfig) -> Result<HeadlessProcess, SpawnError> {
        self.build_process(config, false)
    }

    async fn resume(&self, config: &ClientConfig) -> Result<HeadlessProcess, SpawnError> {
        self.build_process(config, true)
    }
}

pub fn register(registry: &ClientRegistry) {
    let factory: ClientFactory = Arc::new(|| Arc::new(CodexClient::new()) as Arc<dyn AgentClient>);
    registry.register("codex", factory);
}
