use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::paths::Paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Resolved XDG-compliant paths (not serialized)
    #[serde(skip)]
    pub paths: Paths,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Request/response schema spoken by the configured LLM backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendShape {
    /// Conversational `contents`/`parts` envelope, plain text answer
    #[default]
    Native,
    /// Conversational envelope with a strict `{code}` response schema
    Structured,
    /// OpenAI-style `messages` envelope
    ChatCompletions,
}

/// Where the API key travels on the outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStyle {
    /// `?key=...` URL query parameter
    Query,
    /// `Authorization: Bearer ...` header
    Bearer,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayStore {
    /// Process memory; lost when the process is recycled
    #[default]
    Memory,
    /// Slot file in the state directory, guarded by an advisory lock
    File,
}

/// Which HTTP services this process exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceSet {
    #[default]
    All,
    Generate,
    Relay,
}

impl ServiceSet {
    pub fn generate(self) -> bool {
        matches!(self, ServiceSet::All | ServiceSet::Generate)
    }

    pub fn relay(self) -> bool {
        matches!(self, ServiceSet::All | ServiceSet::Relay)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub shape: BackendShape,

    /// Base URL; defaults per shape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Defaults per shape: query for native/structured, bearer for chat-completions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthStyle>,

    /// Default backend model; used when the caller gives no hint or an unknown one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Literal key or `${VAR}` reference, resolved on every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Env var holding the key when `api_key` is unset; defaults per shape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Overrides the built-in ground rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    /// Outbound request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Caller hint -> backend model
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub model_map: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub store: RelayStore,

    /// Commands shorter than this (after trimming) are rejected
    #[serde(default = "default_min_code_length")]
    pub min_code_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default)]
    pub services: ServiceSet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "pretty" (default) or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_timeout_secs() -> u64 {
    60
}
fn default_min_code_length() -> usize {
    5
}
fn default_port() -> u16 {
    31328
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            shape: BackendShape::default(),
            endpoint: None,
            auth: None,
            model: None,
            api_key: None,
            api_key_env: None,
            system_prompt: None,
            temperature: None,
            max_output_tokens: None,
            timeout_secs: default_timeout_secs(),
            model_map: HashMap::new(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            store: RelayStore::default(),
            min_code_length: default_min_code_length(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            services: ServiceSet::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl BackendConfig {
    pub fn endpoint(&self) -> &str {
        match (&self.endpoint, self.shape) {
            (Some(endpoint), _) => endpoint.trim_end_matches('/'),
            (None, BackendShape::Native | BackendShape::Structured) => {
                "https://generativelanguage.googleapis.com/v1beta"
            }
            (None, BackendShape::ChatCompletions) => "https://api.openai.com/v1",
        }
    }

    pub fn auth_style(&self) -> AuthStyle {
        self.auth.unwrap_or(match self.shape {
            BackendShape::Native | BackendShape::Structured => AuthStyle::Query,
            BackendShape::ChatCompletions => AuthStyle::Bearer,
        })
    }

    pub fn default_model(&self) -> &str {
        match (&self.model, self.shape) {
            (Some(model), _) => model.as_str(),
            (None, BackendShape::Native | BackendShape::Structured) => "gemini-2.0-flash",
            (None, BackendShape::ChatCompletions) => "gpt-4o-mini",
        }
    }

    pub fn api_key_env(&self) -> &str {
        match (&self.api_key_env, self.shape) {
            (Some(var), _) => var.as_str(),
            (None, BackendShape::Native | BackendShape::Structured) => "GEMINI_API_KEY",
            (None, BackendShape::ChatCompletions) => "OPENAI_API_KEY",
        }
    }

    /// Read the API key from the process environment. Called per request so
    /// that a missing key is a request error rather than a startup failure.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.resolve_api_key_with_env(|key| std::env::var(key))
    }

    pub fn resolve_api_key_with_env<F>(&self, env_fn: F) -> Option<String>
    where
        F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
    {
        let key = match &self.api_key {
            Some(literal) => expand_env(literal, &env_fn)?,
            None => env_fn(self.api_key_env()).ok()?,
        };

        let key = key.trim();
        if key.is_empty() {
            None
        } else {
            Some(key.to_string())
        }
    }
}

impl Config {
    /// Load config from `path`, or from the default location when `None`.
    ///
    /// A missing file yields defaults; environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        config.apply_env_overrides_with(|key| std::env::var(key))?;
        Ok(config)
    }

    /// Load only what the file says, without `SCRIPTRELAY_*` overrides.
    /// Used when the result is written back to disk.
    pub fn load_file(path: Option<&Path>) -> Result<Self> {
        let paths = Paths::resolve()?;
        let path = path.map(Path::to_path_buf).unwrap_or_else(|| paths.config_file());

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Config::default()
        };
        config.paths = paths;

        Ok(config)
    }

    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.paths.config_file());

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let paths = Paths::resolve()?;
        Ok(paths.config_file())
    }

    /// Apply `SCRIPTRELAY_*` overrides from the given env lookup.
    pub fn apply_env_overrides_with<F>(&mut self, env_fn: F) -> Result<()>
    where
        F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
    {
        const OVERRIDES: [(&str, &str); 7] = [
            ("SCRIPTRELAY_BACKEND", "backend.shape"),
            ("SCRIPTRELAY_ENDPOINT", "backend.endpoint"),
            ("SCRIPTRELAY_MODEL", "backend.model"),
            ("SCRIPTRELAY_API_KEY_ENV", "backend.api_key_env"),
            ("SCRIPTRELAY_BIND", "server.bind"),
            ("SCRIPTRELAY_PORT", "server.port"),
            ("SCRIPTRELAY_RELAY_STORE", "relay.store"),
        ];

        for (var, key) in OVERRIDES {
            if let Ok(value) = env_fn(var) {
                let value = value.trim();
                if value.is_empty() {
                    continue;
                }
                self.set_value(key, value)
                    .with_context(|| format!("Invalid value for {}", var))?;
            }
        }

        Ok(())
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["backend", "shape"] => Ok(self.backend.shape.to_string()),
            ["backend", "endpoint"] => Ok(self.backend.endpoint().to_string()),
            ["backend", "auth"] => Ok(self.backend.auth_style().to_string()),
            ["backend", "model"] => Ok(self.backend.default_model().to_string()),
            ["backend", "api_key_env"] => Ok(self.backend.api_key_env().to_string()),
            ["backend", "timeout_secs"] => Ok(self.backend.timeout_secs.to_string()),
            ["relay", "store"] => Ok(self.relay.store.to_string()),
            ["relay", "min_code_length"] => Ok(self.relay.min_code_length.to_string()),
            ["server", "port"] => Ok(self.server.port.to_string()),
            ["server", "bind"] => Ok(self.server.bind.clone()),
            ["server", "services"] => Ok(self.server.services.to_string()),
            ["logging", "level"] => Ok(self.logging.level.clone()),
            ["logging", "format"] => Ok(self.logging.format.clone()),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["backend", "shape"] => self.backend.shape = value.parse()?,
            ["backend", "endpoint"] => self.backend.endpoint = Some(value.to_string()),
            ["backend", "auth"] => self.backend.auth = Some(value.parse()?),
            ["backend", "model"] => self.backend.model = Some(value.to_string()),
            ["backend", "api_key_env"] => self.backend.api_key_env = Some(value.to_string()),
            ["backend", "timeout_secs"] => self.backend.timeout_secs = value.parse()?,
            ["relay", "store"] => self.relay.store = value.parse()?,
            ["relay", "min_code_length"] => self.relay.min_code_length = value.parse()?,
            ["server", "port"] => self.server.port = value.parse()?,
            ["server", "bind"] => self.server.bind = value.to_string(),
            ["server", "services"] => self.server.services = value.parse()?,
            ["logging", "level"] => self.logging.level = value.to_string(),
            ["logging", "format"] => self.logging.format = value.to_string(),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }

        Ok(())
    }
}

/// Expand a `${VAR}` or `$VAR` reference. Returns `None` when the variable is unset.
fn expand_env<F>(s: &str, env_fn: &F) -> Option<String>
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        env_fn(var_name).ok()
    } else if let Some(var_name) = s.strip_prefix('$') {
        env_fn(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

macro_rules! keyword_enum {
    ($ty:ty { $($variant:path => $name:literal),+ $(,)? }) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let name = match self {
                    $($variant => $name,)+
                };
                f.write_str(name)
            }
        }

        impl FromStr for $ty {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($name => Ok($variant),)+
                    other => anyhow::bail!(
                        "Unknown value '{}', expected one of: {}",
                        other,
                        [$($name),+].join(", ")
                    ),
                }
            }
        }
    };
}

keyword_enum!(BackendShape {
    BackendShape::Native => "native",
    BackendShape::Structured => "structured",
    BackendShape::ChatCompletions => "chat_completions",
});

keyword_enum!(AuthStyle {
    AuthStyle::Query => "query",
    AuthStyle::Bearer => "bearer",
});

keyword_enum!(RelayStore {
    RelayStore::Memory => "memory",
    RelayStore::File => "file",
});

keyword_enum!(ServiceSet {
    ServiceSet::All => "all",
    ServiceSet::Generate => "generate",
    ServiceSet::Relay => "relay",
});

/// Default config template with comments (written by `config init`)
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# ScriptRelay Configuration

[backend]
# native | structured | chat_completions
shape = "native"
# endpoint = "https://generativelanguage.googleapis.com/v1beta"
# auth = "query"                      # query | bearer
# model = "gemini-2.0-flash"
# api_key_env = "GEMINI_API_KEY"      # read on every request
# api_key = "${GEMINI_API_KEY}"
# temperature = 0.4
# max_output_tokens = 2048
timeout_secs = 60

# Caller model hints -> backend models. Unknown hints use `model`.
# [backend.model_map]
# "gpt-4o" = "gemini-2.0-flash"

[relay]
# memory: lost on restart, one hot instance assumed
# file:   survives restart on this host, never replicated across hosts
store = "memory"
min_code_length = 5

[server]
port = 31328
bind = "127.0.0.1"
# all | generate | relay
services = "all"

[logging]
level = "info"
# pretty | json
format = "pretty"
"#;
