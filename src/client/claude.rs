//! Claude CLI adapter.
//!
//! Spawns `claude -p --output-format stream-json` headlessly. Credentials
//! come from the keychain file written by `claude login` or from
//! `ANTHROPIC_API_KEY`; the MCP blob is passed verbatim through
//! `--mcp-config`, which accepts inline JSON.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use crate::client::{
    binary_name, env_var_set, find_executable_in, AgentClient, AuthStatus, ClientConfig,
    ClientFactory, ClientRegistry, SpawnError,
};
use crate::parser::ClaudeParser;
use crate::process::{HeadlessProcess, ProcessOptions};

const INSTALL_HINT: &str = "install with: npm install -g @anthropic-ai/claude-code";
const AUTH_HINT: &str = "run 'claude login' or set ANTHROPIC_API_KEY";

/// Adapter for the Claude CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeClient;

impl ClaudeClient {
    pub fn new() -> Self {
        Self
    }

    fn user_candidates(binary: &str) -> Vec<PathBuf> {
        let Some(home) = dirs::home_dir() else {
            return Vec::new();
        };
        vec![
            home.join(".claude").join("local").join(binary),
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

        let mut process = HeadlessProcess::new(
            command,
            ProcessOptions {
                provider: self.name().to_string(),
                parser: Arc::new(ClaudeParser::new()),
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
impl AgentClient for ClaudeClient {
    fn name(&self) -> &'static str {
        "claude"
    }

    /// Credential order: `~/.claude/.credentials.json`, then
    /// `ANTHROPIC_API_KEY`.
    fn check_auth(&self) -> AuthStatus {
        if let Some(home) = dirs::home_dir() {
            if home.join(".claude").join(".credentials.json").is_file() {
                return AuthStatus::Ok;
            }
        }
        if env_var_set("ANTHROPIC_API_KEY") {
            return AuthStatus::Ok;
        }
        AuthStatus::NoAuth
    }

    fn find_executable(&self) -> Result<PathBuf, SpawnError> {
        let binary = binary_name("claude");
        find_executable_in(
            self.name(),
            &Self::user_candidates(&binary),
            &binary,
            INSTALL_HINT,
        )
    }

    fn build_args(&self, config: &ClientConfig, resume: bool) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];
        if !config.model.is_empty() {
            args.push("--model".to_string());
            args.push(config.model.clone());
        }
        if resume && !config.session_id.is_empty() {
            args.push("--resume".to_string());
            args.push(config.session_id.clone());
        }
        if config.skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }
        if let Some(mcp) = &config.mcp_config {
            args.push("--mcp-config".to_string());
            args.push(mcp.clone());
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
    let factory: ClientFactory = Arc::new(|| Arc::new(ClaudeClient::new()) as Arc<dyn AgentClient>);
    registry.register("claude", factory);
}
