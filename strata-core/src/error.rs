use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to bring up a PTY session. Never retried.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to open pseudo-terminal: {0}")]
    OpenPty(#[source] io::Error),

    #[error("failed to configure pty master: {0}")]
    Configure(#[source] io::Error),

    #[error("failed to spawn shell `{shell}`: {source}")]
    Spawn {
        shell: String,
        #[source]
        source: io::Error,
    },

    #[error("PtySession::start must be called inside a tokio runtime")]
    NoRuntime,
}

/// Fatal (non would-block, non interrupted) read failure on the master.
#[derive(Debug, Error)]
#[error("pty read failed: {0}")]
pub struct ReadError(#[from] pub io::Error);

#[derive(Debug, Error)]
pub enum ResizeError {
    #[error("TIOCSWINSZ to {cols}x{rows} failed: {source}")]
    Ioctl {
        cols: u16,
        rows: u16,
        #[source]
        source: io::Error,
    },

    #[error("session is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}
