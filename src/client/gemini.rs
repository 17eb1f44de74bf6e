//! Gemini CLI adapter.
//!
//! Credential order: the OAuth token store under
//! `~/.gemini/mcp-oauth-tokens-v2.json`, then `GEMINI_API_KEY`, then
//! `GOOGLE_API_KEY`. MCP servers are materialized into
//! `{workDir}/.gemini/settings.json` before spawn.
//!
//! Argument contract (ordering is load-bearing for the CLI):
//! `[-m <model>]? [--resume <session>]? --yolo --output-format stream-json`
//! followed by the prompt - positional for a fresh session, `-p <prompt>`
//! when resuming, because the CLI refuses a positional prompt in resume
//! mode.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use crate::client::{
    binary_name, env_var_set, find_executable_in, merge_mcp_into_settings, AgentClient,
    AuthStatus, ClientConfig, ClientFactory, ClientRegistry, SpawnError,
};
use crate::parser::GeminiParser;
use crate::process::{HeadlessProcess, ProcessOptions};

const INSTALL_HINT: &str = "install with: npm install -g @google/gemini-cli";
const AUTH_HINT: &str = "run 'gemini' once to sign in, or set GEMINI_API_KEY / GOOGLE_API_KEY";

/// Adapter for the Gemini CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiClient;

impl GeminiClient {
    pub fn new() -> Self {
        Self
    }

    fn user_candidates(binary: &str) -> Vec<PathBuf> {
        let Some(home) = dirs::home_dir() else {
            return Vec::new();
        };
        vec![
            home.join(".gemini").join("bin").join(binary),
            home.join(".local").join("bin").join(binary),
        ]
    }

    /// Write the MCP blob into the session's settings file, merging with
    /// whatever is already there.
    fn materialize_mcp(&self, config: &ClientConfig) -> Result<(), SpawnError> {
        let Some(blob) = &config.mcp_config else {
            return Ok(());
        };
        let path = config.work_dir.join(".gemini").join("settings.json");
        merge_mcp_into_settings(&path, "mcpServers", blob, false)?;
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
                parser: Arc::new(GeminiParser::new()),
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
impl AgentClient for GeminiClient {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn check_auth(&self) -> AuthStatus {
        if let Some(home) = dirs::home_dir() {
            if home
                .join(".gemini")
                .join("mcp-oauth-tokens-v2.json")
                .is_file()
            {
                return AuthStatus::Ok;
            }
        }
        if env_var_set("GEMINI_API_KEY") || env_var_set("GOOGLE_API_KEY") {
            return AuthStatus::Ok;
        }
        AuthStatus::NoAuth
    }

    fn find_executable(&self) -> Result<PathBuf, SpawnError> {
        let binary = binary_name("gemini");
        find_executable_in(
            self.name(),
            &Self::user_candidates(&binary),
            &binary,
            INSTALL_HINT,
        )
    }

    fn build_args(&self, config: &ClientConfig, resume: bool) -> Vec<String> {
        let resuming = resume && !config.session_id.is_empty();
        let mut args = Vec::new();

        if !config.model.is_empty() {
            args.push("-m".to_string());
            args.push(config.model.clone());
        }
        if resuming {
            args.push("--resume".to_string());
            args.push(config.session_id.clone());
        }

        // --yolo is unconditional: the skip-permissions knob is advisory for
        // this provider and neither adds nor removes it.
        args.push("--yolo".to_string());
        args.push("--output-format".to_string());
        args.push("stream-json".to_string());

        if resuming {
            args.push("-p".to_string());
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
    let factory: ClientFactory = Arc::new(|| Arc::new(GeminiClient::new()) as Arc<dyn AgentClient>);
    registry.register("gemini", factory);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_session_args() {
        let config = ClientConfig::new("Implement a feature", "/tmp")
            .with_model("gemini-2.5-flash")
            .skip_permissions();
        let args = GeminiClient::new().build_args(&config, false);
        assert_eq!(
            args,
            vec![
                "-m",
                "gemini-2.5-flash",
                "--yolo",
                "--output-format",
                "stream-json",
                "Implement a feature"
            ]
        );
    }

    #[test]
    fn test_resume_uses_p_flag() {
        let config = ClientConfig::new("Hello", "/tmp").with_session("sess-123");
        let args = GeminiClient::new().build_args(&config, true);
        assert_eq!(
            args,
            vec![
                "--resume",
                "sess-123",
                "--yolo",
                "--output-format",
                "stream-json",
                "-p",
                "Hello"
            ]
        );
        // The prompt must not be positional in resume mode.
        assert_eq!(&args[args.len() - 2..], &["-p", "Hello"]);
    }

    #[test]
    fn test_yolo_always_present() {
        let plain = ClientConfig::new("x", "/tmp");
        let args = GeminiClient::new().build_args(&plain, false);
        assert!(args.contains(&"--yolo".to_string()));

        let skipping = ClientConfig::new("x", "/tmp").skip_permissions();
        let args_skipping = GeminiClient::new().build_args(&skipping, false);
        assert_eq!(args, args_skipping);
    }

    #[test]
    fn test_model_flag_absent_when_empty() {
        let config = ClientConfig::new("x", "/tmp");
        let args = GeminiClient::new().build_args(&config, false);
        assert!(!args.contains(&"-m".to_string()));
        assert_eq!(args[0], "--yolo");
    }

    #[test]
    fn test_resume_without_session_falls_back_to_positional() {
        let config = ClientConfig::new("Hello", "/tmp");
        let args = GeminiClient::new().build_args(&config, true);
        assert!(!args.contains(&"--resume".to_string()));
        assert_eq!(args.last().unwrap(), "Hello");
        assert!(!args.contains(&"-p".to_string()));
    }

    #[test]
    fn test_mcp_settings_written_under_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::new("x", dir.path())
            .with_mcp_config(r#"{"mcpServers":{"files":{"command":"mcp-files"}}}"#);

        GeminiClient::new().materialize_mcp(&config).unwrap();

        let path = dir.path().join(".gemini").join("settings.json");
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written["mcpServers"]["files"]["command"], "mcp-files");
    }
}
