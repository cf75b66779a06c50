//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::tools::process::ProcessConfig;
use crate::tools::session::SessionOptions;
use crate::{AppError, Result};

/// Keychain service under which credentials are stored.
pub const KEYRING_SERVICE: &str = "job-coach";

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HttpConfig {
    /// Port bound on `127.0.0.1`.
    #[serde(default = "default_http_port")]
    pub port: u16,
    /// Origins allowed by CORS; `"*"` allows any.
    #[serde(default = "default_allow_origins")]
    pub allow_origins: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
            allow_origins: default_allow_origins(),
        }
    }
}

fn default_http_port() -> u16 {
    8000
}

fn default_allow_origins() -> Vec<String> {
    vec!["*".into()]
}

/// How to launch and talk to the job-search tool server.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ToolServerConfig {
    /// Interpreter used to run the server script.
    #[serde(default = "default_tool_command")]
    pub command: String,
    /// Server script, relative to the config file's directory when relative.
    #[serde(default = "default_tool_script")]
    pub script: PathBuf,
    /// Maximum wait for the `initialize` response.
    #[serde(default = "default_handshake_seconds")]
    pub handshake_timeout_seconds: u64,
    /// Maximum wait for one tool call.
    #[serde(default = "default_call_seconds")]
    pub call_timeout_seconds: u64,
    /// Grace period before a shutting-down server is killed.
    #[serde(default = "default_grace_seconds")]
    pub shutdown_grace_seconds: u64,
    /// Connect at boot instead of on first use.
    #[serde(default)]
    pub eager_connect: bool,
    /// Number of listings requested per chat turn.
    #[serde(default = "default_job_limit")]
    pub job_limit: u32,
}

impl Default for ToolServerConfig {
    fn default() -> Self {
        Self {
            command: default_tool_command(),
            script: default_tool_script(),
            handshake_timeout_seconds: default_handshake_seconds(),
            call_timeout_seconds: default_call_seconds(),
            shutdown_grace_seconds: default_grace_seconds(),
            eager_connect: false,
            job_limit: default_job_limit(),
        }
    }
}

impl ToolServerConfig {
    /// Process launch settings.
    #[must_use]
    pub fn process_config(&self) -> ProcessConfig {
        ProcessConfig {
            command: self.command.clone(),
            script: self.script.clone(),
            working_dir: None,
        }
    }

    /// Session manager timing.
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            call_timeout: Duration::from_secs(self.call_timeout_seconds),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_seconds),
            eager_connect: self.eager_connect,
        }
    }

    /// Handshake timeout as a [`Duration`].
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_seconds)
    }
}

fn default_tool_command() -> String {
    "python3".into()
}

fn default_tool_script() -> PathBuf {
    PathBuf::from("mcp-servers/jobs_server.py")
}

fn default_handshake_seconds() -> u64 {
    20
}

fn default_call_seconds() -> u64 {
    30
}

fn default_grace_seconds() -> u64 {
    5
}

fn default_job_limit() -> u32 {
    crate::tools::jobs::DEFAULT_LIMIT
}

/// OpenAI-compatible completion endpoint settings.
///
/// The API key is loaded at runtime via OS keychain or environment
/// variable, never from the TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CompletionConfig {
    /// Base URL; `/chat/completions` is appended.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,
    /// Request timeout.
    #[serde(default = "default_completion_seconds")]
    pub timeout_seconds: u64,
    /// Bearer token (populated at runtime).
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            model: default_model(),
            timeout_seconds: default_completion_seconds(),
            api_key: None,
        }
    }
}

fn default_api_base() -> String {
    "https://integrate.api.nvidia.com/v1".into()
}

fn default_model() -> String {
    "nvidia/llama-3.3-nemotron-super-49b-v1".into()
}

fn default_completion_seconds() -> u64 {
    60
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// System prompt prepended to every conversation.
    pub system_prompt_path: PathBuf,
    /// Where uploaded resumes are stored; OS temp dir when absent.
    #[serde(default)]
    pub upload_dir: Option<PathBuf>,
    /// HTTP listener.
    #[serde(default)]
    pub http: HttpConfig,
    /// Job-search tool server.
    #[serde(default)]
    pub tool_server: ToolServerConfig,
    /// Completion endpoint.
    #[serde(default)]
    pub completion: CompletionConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// Relative paths in the file are resolved against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        let mut config = Self::from_toml_str(&raw)?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        Ok(config)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply the environment overrides honoured by the deployment scripts:
    /// `NVIDIA_API_BASE`, `NVIDIA_MODEL`, `ALLOW_ORIGINS` (comma separated)
    /// and `PORT_BACKEND`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `PORT_BACKEND` is not a valid port.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(base) = non_empty_env("NVIDIA_API_BASE") {
            self.completion.api_base = base;
        }
        if let Some(model) = non_empty_env("NVIDIA_MODEL") {
            self.completion.model = model;
        }
        if let Some(origins) = non_empty_env("ALLOW_ORIGINS") {
            self.http.allow_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Some(port) = non_empty_env("PORT_BACKEND") {
            self.http.port = port
                .parse()
                .map_err(|err| AppError::Config(format!("invalid PORT_BACKEND: {err}")))?;
        }
        self.validate()
    }

    /// Load the completion API key from OS keychain with env-var fallback.
    ///
    /// A missing key is not an error here: completion calls report it when
    /// they are attempted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the keychain lookup task panics.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.completion.api_key = load_credential("nvidia_api_key", "NVIDIA_API_KEY").await?;
        if self.completion.api_key.is_none() {
            warn!("no completion API key configured; chat requests will fail");
        }
        Ok(())
    }

    /// Directory for uploaded files.
    #[must_use]
    pub fn upload_dir(&self) -> PathBuf {
        self.upload_dir.clone().unwrap_or_else(env::temp_dir)
    }

    /// Read the system prompt from disk.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read.
    pub fn read_system_prompt(&self) -> Result<String> {
        fs::read_to_string(&self.system_prompt_path).map_err(|err| {
            AppError::Config(format!(
                "cannot read system prompt {}: {err}",
                self.system_prompt_path.display()
            ))
        })
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.system_prompt_path);
        resolve(&mut self.tool_server.script);
        if let Some(ref mut dir) = self.upload_dir {
            resolve(dir);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.tool_server.command.trim().is_empty() {
            return Err(AppError::Config(
                "tool_server.command must not be empty".into(),
            ));
        }
        if self.tool_server.call_timeout_seconds == 0 {
            return Err(AppError::Config(
                "tool_server.call_timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.tool_server.handshake_timeout_seconds == 0 {
            return Err(AppError::Config(
                "tool_server.handshake_timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.http.allow_origins.is_empty() {
            return Err(AppError::Config(
                "http.allow_origins must not be empty".into(),
            ));
        }
        if self.completion.api_base.trim().is_empty() {
            return Err(AppError::Config(
                "completion.api_base must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<Option<String>> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(Some(value)),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            tracing::debug!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    Ok(non_empty_env(env_key))
}
