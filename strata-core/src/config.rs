//! User configuration, loaded from `config.toml` in the platform config dir.
//!
//! Every field has a default, so a partial (or missing) file is fine:
//!
//! ```toml
//! [shell]
//! path = "/bin/zsh"
//!
//! [grid]
//! scrollback_limit = 50000
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Everything a [`PtySession`](crate::pty::PtySession) needs to spawn a shell.
#[derive(Debug, Clone, PartialEq)]
pub struct PtyConfig {
    pub shell: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub working_directory: Option<PathBuf>,
    pub columns: u16,
    pub rows: u16,
    pub term: String,
    pub read_chunk_size: usize,
    pub shutdown_grace: Duration,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Config::default().pty_config()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub shell: ShellConfig,
    pub grid: GridConfig,
    pub io: IoConfig,
    pub blocks: BlocksConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Shell binary. Falls back to `$SHELL`, then `/bin/sh`.
    pub path: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_directory: Option<PathBuf>,
    /// Exported as `TERM`.
    pub term: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            path: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            working_directory: None,
            term: "xterm-256color".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub columns: u16,
    pub rows: u16,
    pub scrollback_limit: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            columns: 80,
            rows: 24,
            scrollback_limit: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    pub read_chunk_size: usize,
    pub shutdown_grace_ms: u64,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: 4096,
            shutdown_grace_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlocksConfig {
    /// Pending output is flushed into the open block at this many bytes.
    pub output_chunk_limit: usize,
    /// Without shell integration, a block closes after this much silence.
    pub fallback_quiescence_ms: u64,
}

impl Default for BlocksConfig {
    fn default() -> Self {
        Self {
            output_chunk_limit: 4096,
            fallback_quiescence_ms: 1000,
        }
    }
}

impl BlocksConfig {
    pub fn fallback_quiescence(&self) -> Duration {
        Duration::from_millis(self.fallback_quiescence_ms)
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// `<config dir>/strata/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "strata")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from [`Config::default_path`]; defaults when there is no file.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let config = Self::from_toml_str(&text)?;
                tracing::debug!(path = %path.display(), "loaded config");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn resolve_shell(&self) -> String {
        self.shell
            .path
            .clone()
            .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "/bin/sh".to_string())
    }

    pub fn pty_config(&self) -> PtyConfig {
        PtyConfig {
            shell: self.resolve_shell(),
            args: self.shell.args.clone(),
            env: self
                .shell
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            working_directory: self.shell.working_directory.clone(),
            columns: self.grid.columns.max(1),
            rows: self.grid.rows.max(1),
            term: self.shell.term.clone(),
            read_chunk_size: self.io.read_chunk_size.max(1),
            shutdown_grace: Duration::from_millis(self.io.shutdown_grace_ms),
        }
    }
}
