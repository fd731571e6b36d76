//! Configuration management for stylemail.
//!
//! Configuration is loaded from `~/.config/stylemail/config.toml`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// What to do when the external program exits non-zero.
    #[serde(default)]
    pub exit_policy: ExitPolicy,
    /// Backend configuration.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Worker pool limits.
    #[serde(default)]
    pub pool: PoolConfig,
}

/// How a non-zero exit from the external program is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitPolicy {
    /// Non-zero exit (or death by signal) is an error.
    #[default]
    Strict,
    /// Any termination is a reply; the exit code rides along with it.
    Permissive,
}

/// Backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// External engine invoked once per call.
    Process {
        /// Executable to run (default: python3).
        #[serde(default = "default_program")]
        program: String,
        /// Entry point passed as the first argument. Relative paths are
        /// resolved against the config directory; an empty string means none.
        #[serde(default = "default_entry", skip_serializing_if = "Option::is_none")]
        entry: Option<PathBuf>,
        /// Extra arguments placed between the entry point and the request.
        #[serde(default)]
        args: Vec<String>,
        /// Working directory for the child.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_dir: Option<PathBuf>,
    },
    /// In-process engine backed by the OpenAI API.
    OpenAI {
        /// Chat model (default: gpt-4o).
        #[serde(default = "default_chat_model")]
        model: String,
        /// Embedding model (default: text-embedding-ada-002).
        #[serde(default = "default_embedding_model")]
        embedding_model: String,
        /// API key (prefer OPENAI_API_KEY env var).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
        /// API root, for proxies and compatible servers.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base_url: Option<String>,
        /// Where style samples are kept (default: data dir).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        store_dir: Option<PathBuf>,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Process {
            program: default_program(),
            entry: default_entry(),
            args: Vec::new(),
            working_dir: None,
        }
    }
}

impl BackendConfig {
    /// The native engine with default models and the API key from the environment.
    pub fn openai_default() -> Self {
        BackendConfig::OpenAI {
            model: default_chat_model(),
            embedding_model: default_embedding_model(),
            api_key: None,
            base_url: None,
            store_dir: None,
        }
    }
}

fn default_program() -> String {
    "python3".to_string()
}

fn default_entry() -> Option<PathBuf> {
    Some(PathBuf::from("engine/cli.py"))
}

fn default_chat_model() -> String {
    "gpt-4o".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}

/// Limits on concurrent external work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of external processes running at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Kill a run after this many seconds. Unset means wait forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            timeout_secs: None,
        }
    }
}

fn default_max_concurrency() -> usize {
    4
}

impl Config {
    /// Get the config directory path.
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("stylemail"))
            .context("Could not determine config directory")
    }

    /// Get the config file path.
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Get the data directory used by the native engine.
    pub fn data_dir() -> Result<PathBuf> {
        dirs::data_dir()
            .map(|p| p.join("stylemail"))
            .context("Could not determine data directory")
    }

    /// Get the socket path for daemon communication.
    pub fn socket_path() -> Result<PathBuf> {
        // Prefer XDG_RUNTIME_DIR, fall back to ~/.local/run/stylemail.sock
        if let Some(runtime_dir) = std::env::var_os("XDG_RUNTIME_DIR") {
            Ok(PathBuf::from(runtime_dir).join("stylemail.sock"))
        } else {
            dirs::home_dir()
                .map(|p| p.join(".local/run/stylemail.sock"))
                .context("Could not determine home directory")
        }
    }

    /// Get the PID file path for the daemon.
    pub fn pid_path() -> Result<PathBuf> {
        if let Some(runtime_dir) = std::env::var_os("XDG_RUNTIME_DIR") {
            Ok(PathBuf::from(runtime_dir).join("stylemail.pid"))
        } else {
            dirs::home_dir()
                .map(|p| p.join(".local/run/stylemail.pid"))
                .context("Could not determine home directory")
        }
    }

    /// Load configuration from file, using defaults if not found.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Get the backend type as a string.
    pub fn backend_type(&self) -> &'static str {
        match &self.backend {
            BackendConfig::Process { .. } => "process",
            BackendConfig::OpenAI { .. } => "openai",
        }
    }
}

/// Resolve an entry point against a base directory. Absolute paths win.
pub fn resolve_entry(base: &Path, entry: &Path) -> PathBuf {
    if entry.is_absolute() {
        entry.to_path_buf()
    } else {
        base.join(entry)
    }
}
