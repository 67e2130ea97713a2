//! Command blocks.
//!
//! A "block" is an atomic terminal interaction:
//! - input line
//! - output text
//! - exit status
//! - cwd
//! - timing
//!
//! The segmenter cuts the decoded stream into blocks using OSC 133 prompt
//! markers, or submitted lines plus silence when the shell has no hooks.

pub mod list;
pub mod model;
pub mod segmenter;

pub use list::BlockList;
pub use model::{BlockExit, BlockId, TerminalBlock};
pub use segmenter::{BlockSegmenter, SegmenterEvent, SegmenterState};
