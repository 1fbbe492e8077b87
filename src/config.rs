//! Client configuration loading and validation.
//!
//! Reads `toolbridge.yaml` and resolves environment variables before
//! parsing. Every timeout and the normalisation table have defaults, so a
//! config only needs its `servers` map.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::codegen::CallingConvention;
use crate::errors::ClientError;
use crate::mcp_client::client::{
    ClientOptions, DEFAULT_CALL_TIMEOUT_MS, DEFAULT_INIT_TIMEOUT_MS, DEFAULT_SHUTDOWN_TIMEOUT_MS,
};
use crate::mcp_client::types::ServerConfig;
use crate::schema::{default_rules, NormalizationRule, NormalizationTable};

/// Config file searched for when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = "toolbridge.yaml";

/// Env var naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "TOOLBRIDGE_CONFIG";

// ─── Public Types ────────────────────────────────────────────────────────────

/// Top-level configuration (mirrors `toolbridge.yaml`).
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Tool servers by name.
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
    #[serde(default = "default_init_timeout_ms")]
    pub init_timeout_ms: u64,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Field-name prefix rules. Omit for the built-in work-item table; an
    /// empty list disables normalisation.
    #[serde(default = "default_rules")]
    pub normalization: Vec<NormalizationRule>,
    #[serde(default)]
    pub calling_convention: CallingConvention,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
    /// Log file. When absent, logs go to stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Rotated files kept next to `file`.
    #[serde(default = "default_keep_files")]
    pub keep_files: u32,
}

fn default_init_timeout_ms() -> u64 {
    DEFAULT_INIT_TIMEOUT_MS
}
fn default_call_timeout_ms() -> u64 {
    DEFAULT_CALL_TIMEOUT_MS
}
fn default_shutdown_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}
fn default_log_level() -> String {
    "toolbridge=info,warn".to_string()
}
fn default_keep_files() -> u32 {
    3
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
            keep_files: default_keep_files(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: BTreeMap::new(),
            init_timeout_ms: DEFAULT_INIT_TIMEOUT_MS,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            normalization: default_rules(),
            calling_convention: CallingConvention::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Reject configs that would only fail later, at connect time.
    pub fn validate(&self) -> Result<(), ClientError> {
        for (name, server) in &self.servers {
            if name.trim().is_empty() {
                return Err(config_error("server names must not be empty"));
            }
            if server.command.trim().is_empty() {
                return Err(config_error(format!("server '{name}' has an empty command")));
            }
        }
        for (key, value) in [
            ("init_timeout_ms", self.init_timeout_ms),
            ("call_timeout_ms", self.call_timeout_ms),
            ("shutdown_timeout_ms", self.shutdown_timeout_ms),
        ] {
            if value == 0 {
                return Err(config_error(format!("{key} must be greater than zero")));
            }
        }
        self.normalization_table()?;
        Ok(())
    }

    pub fn normalization_table(&self) -> Result<NormalizationTable, ClientError> {
        NormalizationTable::new(self.normalization.clone())
    }

    /// Options shared by every client built from this config.
    pub fn client_options(&self) -> Result<ClientOptions, ClientError> {
        Ok(ClientOptions {
            init_timeout: Duration::from_millis(self.init_timeout_ms),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
            normalization: Arc::new(self.normalization_table()?),
            calling_convention: self.calling_convention,
        })
    }
}

fn config_error(reason: impl Into<String>) -> ClientError {
    ClientError::Config {
        reason: reason.into(),
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// `TOOLBRIDGE_CONFIG` wins when it names an existing file; otherwise
/// searches upward from `start` for `toolbridge.yaml`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, ClientError> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&explicit));
        if candidate.is_file() {
            return Ok(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_ENV_VAR} does not name a file, searching upward");
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(config_error(format!(
        "could not find {CONFIG_FILE_NAME} above {}",
        start.display()
    )))
}

/// Load, interpolate, parse and validate a config file.
pub fn load_config(path: &Path) -> Result<ClientConfig, ClientError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| config_error(format!("failed to read {}: {e}", path.display())))?;
    let config = parse_config(&raw)?;
    tracing::debug!(
        path = %path.display(),
        servers = config.servers.len(),
        "loaded config"
    );
    Ok(config)
}

/// Parse config text. `${VAR}` and `${VAR:-default}` are resolved first.
pub fn parse_config(raw: &str) -> Result<ClientConfig, ClientError> {
    let interpolated = interpolate_env_vars(raw);
    let config: ClientConfig = serde_yaml::from_str(&interpolated)
        .map_err(|e| config_error(format!("failed to parse config: {e}")))?;
    config.validate()?;
    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` from the process environment.
fn interpolate_env_vars(input: &str) -> String {
    interpolate_with(input, |name| std::env::var(name).ok())
}

/// Replace `${VAR}` and `${VAR:-default}` using `lookup`. An unterminated
/// `${` is kept as written.
fn interpolate_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                result.push_str(&resolve_var_expr(&after[..end], &lookup));
                rest = &after[end + 1..];
            }
            None => {
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    result
}

/// `VAR` or `VAR:-default`. Unset variables without a default become "".
fn resolve_var_expr(expr: &str, lookup: &impl Fn(&str) -> Option<String>) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => lookup(name).unwrap_or_else(|| expand_tilde(default)),
        None => lookup(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
