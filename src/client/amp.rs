//! Amp CLI adapter.
//!
//! Runs `amp -x --stream-json` headlessly. MCP servers are merged into
//! `{workDir}/.amp/settings.json` under `amp.mcpServers` before spawn.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use crate::client::{
    binary_name, env_var_set, find_executable_in, merge_mcp_into_settings, AgentClient,
    AuthStatus, ClientConfig, ClientFactory, ClientRegistry, SpawnError,
};
use crate::parser::AmpParser;
use crate::process::{HeadlessProcess, ProcessOptions};

const INSTALL_HINT: &str = "install with: npm install -g @sourcegraph/amp";
const AUTH_HINT: &str = "run 'amp login' or set AMP_API_KEY";

/// Adapter for the Amp CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmpClient;

impl AmpClient {
    pub fn new() -> Self {
        Self
    }

    fn user_candidates(binary: &str) -> Vec<PathBuf> {
        let Some(home) = dirs::home_dir() else {
            return Vec::new();
        };
        vec![
            home.join(".amp").join("bin").join(binary),
            home.join(".local").join("bin").join(binary),
        ]
    }

    fn materialize_mcp(&self, config: &ClientConfig) -> Result<(), SpawnError> {
        let Some(blob) = &config.mcp_config else {
            return Ok(());
        };
        let path = config.work_dir.join(".amp").join("settings.json");
        merge_mcp_into_settings(&path, "amp.mcpServers", blob, false)?;
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
        self.materialize_mcp(config)?;

        let mut command = Command::new(exe);
        command.args(self.build_args(config, resume));

        let mut process = HeadlessProcess::new(
            command,
            ProcessOptions {
                provider: self.name().to_string(),
                parser: Arc::new(AmpParser::new()),
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
impl AgentClient for AmpClient {
    fn name(&self) -> &'static str {
        "amp"
    }

    /// Credential order: `~/.config/amp/settings.json`, then `AMP_API_KEY`.
    fn check_auth(&self) -> AuthStatus {
        if let Some(config_dir) = dirs::config_dir() {
            if config_dir.join("amp").join("settings.json").is_file() {
                return AuthStatus::Ok;
            }
        }
        if env_var_set("AMP_API_KEY") {
            return AuthStatus::Ok;
        }
        AuthStatus::NoAuth
    }

    fn find_executable(&self) -> Result<PathBuf, SpawnError> {
        let binary = binary_name("amp");
        find_executable_in(
            self.name(),
            &Self::user_candidates(&binary),
            &binary,
            INSTALL_HINT,
        )
    }

    fn build_args(&self, config: &ClientConfig, resume: bool) -> Vec<String> {
        let mut args = vec!["-x".to_string(), "--stream-json".to_string()];
        if !config.model.is_empty() {
            args.push("--model".to_string());
            args.push(config.model.clone());
        }
        if resume && !config.session_id.is_empty() {
            args.push("--thread".to_string());
            args.push(config.session_id.clone());
        }
        if config.skip_permissions {
            args.push("--dangerously-allow-all".to_string());
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
    let factory: ClientFactory = Arc::new(|| Arc::new(AmpClient::new()) as Arc<dyn AgentClient>);
    registry.register("amp", factory);
}
