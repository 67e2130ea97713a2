//! Terminal block model.
//!
//! A block is one command interaction: the input line, everything the
//! command printed, how it ended, where it ran and when.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type BlockId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockExit {
    Code(i32),
    /// Closed without a reported status (missing `D`, desync, fallback mode).
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalBlock {
    pub id: BlockId,
    pub input: String,
    pub output: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// `None` while the block is open.
    pub exit: Option<BlockExit>,
    pub cwd: Option<String>,
    /// Display-only annotation; settable after finalization.
    pub summary: Option<String>,
}

impl TerminalBlock {
    pub fn open(input: impl Into<String>, cwd: Option<String>) -> Self {
        Self::open_at(input, cwd, Utc::now())
    }

    pub fn open_at(input: impl Into<String>, cwd: Option<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            input: input.into(),
            output: String::new(),
            started_at,
            ended_at: None,
            exit: None,
            cwd,
            summary: None,
        }
    }

    /// Close the block. The end timestamp never precedes the start.
    pub fn finalize_at(&mut self, exit: BlockExit, ended_at: DateTime<Utc>) {
        self.ended_at = Some(ended_at.max(self.started_at));
        self.exit = Some(exit);
    }

    pub fn finalize(&mut self, exit: BlockExit) {
        self.finalize_at(exit, Utc::now());
    }

    pub fn is_finalized(&self) -> bool {
        self.exit.is_some()
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.exit {
            Some(BlockExit::Code(code)) => Some(code),
            _ => None,
        }
    }

    /// `ended_at - started_at`; `None` while open.
    pub fn duration(&self) -> Option<Duration> {
        let ended = self.ended_at?;
        (ended - self.started_at).to_std().ok()
    }
}
