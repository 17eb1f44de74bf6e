//! OpenCode CLI adapter.
//!
//! Argument contract: `run --format json [--session <id>]? [--model <m>]?
//! -- <prompt>` - `run --format json` always leads, `--` is always the
//! second-to-last token, the prompt is always last (even when empty).
//!
//! MCP config is preferably injected through the `OPENCODE_CONFIG_CONTENT`
//! environment variable, which keeps concurrent sessions isolated from each
//! other; merging into `{workDir}/opencode.jsonc` is the file fallback.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use crate::client::{
    binary_name, env_var_set, find_executable_in, merge_mcp_into_settings, AgentClient,
    AuthStatus, ClientConfig, ClientFactory, ClientRegistry, SpawnError,
};
use crate::parser::OpenCodeParser;
use crate::process::{HeadlessProcess, ProcessOptions};

const INSTALL_HINT: &str = "install with: npm install -g opencode-ai";
const AUTH_HINT: &str = "run 'opencode auth login' or set OPENCODE_API_KEY";

/// Environment variable OpenCode reads a full config document from.
pub const CONFIG_CONTENT_ENV: &str = "OPENCODE_CONFIG_CONTENT";

/// Adapter for the OpenCode CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenCodeClient;

impl OpenCodeClient {
    pub fn new() -> Self {
        Self
    }

    fn user_candidates(binary: &str) -> Vec<PathBuf> {
        let Some(home) = dirs::home_dir() else {
            return Vec::new();
        };
        vec![
            home.join(".opencode").join("bin").join(binary),
            home.join(".local").join("bin").join(binary),
        ]
    }

    /// File-based MCP materialization: merge the blob's `mcp` map into the
    /// session's `opencode.jsonc`, tolerating block comments on read.
    /// Prefer the env-var path ([`CONFIG_CONTENT_ENV`]) where possible.
    pub fn write_mcp_settings(work_dir: &std::path::Path, blob: &str) -> Result<(), SpawnError> {
        let path = work_dir.join("opencode.jsonc");
        merge_mcp_into_settings(&path, "mcp", blob, true)?;
        Ok(())
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
            // Validate before handing it to the CLI so a bad blob fails the
            // spawn rather than the session.
            serde_json::from_str::<serde_json::Value>(blob).map_err(|err| {
                SpawnError::McpParse {
                    reason: err.to_string(),
                }
            })?;
            command.env(CONFIG_CONTENT_ENV, blob);
        }

        let mut process = HeadlessProcess::new(
            command,
            ProcessOptions {
                provider: self.name().to_string(),
                parser: Arc::new(OpenCodeParser::new()),
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
impl AgentClient for OpenCodeClient {
    fn name(&self) -> &'static str {
        "opencode"
    }

    fn check_auth(&self) -> AuthStatus {
        if let Some(data) = dirs::data_dir() {
            if data.join("opencode").join("auth.json").is_file() {
                return AuthStatus::Ok;
            }
        }
        if env_var_set("OPENCODE_API_KEY") {
            return AuthStatus::Ok;
        }
        AuthStatus::NoAuth
    }

    fn find_executable(&self) -> Result<PathBuf, SpawnError> {
        let binary = binary_name("opencode");
        find_executable_in(
            self.name(),
            &Self::user_candidates(&binary),
            &binary,
            INSTALL_HINT,
        )
    }

    fn build_args(&self, config: &ClientConfig, resume: bool) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--format".to_string(),
            "json".to_string(),
        ];
        if resume && !config.session_id.is_empty() {
            args.push("--session".to_string());
            args.push(config.session_id.clone());
        }
        if !config.model.is_empty() {
            args.push("--model".to_string());
            args.push(config.model.clone());
        }
        args.push("--".to_string());
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
    let factory: ClientFactory =
        Arc::new(|| Arc::new(OpenCodeClient::new()) as Arc<dyn AgentClient>);
    registry.register("opencode", factory);
}
