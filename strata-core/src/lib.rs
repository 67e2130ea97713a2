//! Terminal core: PTY session, byte decoder, cell grid and command blocks.
//!
//! ```text
//! shell -> PtySession -> ByteDecoder -> { TerminalBuffer, BlockSegmenter }
//!                                             |                |
//!                                       BufferSnapshot     TerminalBlock
//! ```

pub mod blocks;
pub mod config;
pub mod error;
pub mod grid;
pub mod hooks;
pub mod pipeline;
pub mod term;

#[cfg(unix)]
pub mod engine;
#[cfg(unix)]
pub mod pty;

pub use blocks::{BlockExit, BlockId, BlockList, BlockSegmenter, SegmenterEvent, TerminalBlock};
pub use config::{Config, PtyConfig};
pub use error::{ConfigError, ReadError, ResizeError, SpawnError};
pub use grid::{BufferSnapshot, Cell, CellFlags, Color, TerminalBuffer};
pub use pipeline::Pipeline;
pub use term::{ByteDecoder, DecodeEvent};

#[cfg(unix)]
pub use engine::{EngineEvent, TerminalEngine};
#[cfg(unix)]
pub use pty::{PtySession, SessionEvent, SessionState};
