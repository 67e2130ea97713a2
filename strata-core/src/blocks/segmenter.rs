//! Block segmenter.
//!
//! Inputs:
//! - decoded events from the PTY stream (OSC 133 / OSC 7 markers + text)
//! - lines the host submitted to the shell
//! - a clock tick, for sessions without shell integration
//!
//! Output: `SegmenterEvent`s, and the session's `BlockList`.
//!
//! With shell integration the marker sequence drives everything:
//!
//! ```text
//! A (prompt) -> B (input) -> C (output) -> D;exit (done) -> A ...
//! ```
//!
//! Without it, each submitted line opens a block that closes on the next
//! submission or after a period of silence.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::BlocksConfig;
use crate::term::{DecodeEvent, ShellMarker};

use super::list::BlockList;
use super::model::{BlockExit, BlockId, TerminalBlock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmenterState {
    #[default]
    AwaitingPrompt,
    PromptShown,
    CommandEntered,
    OutputStreaming,
    CommandComplete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SegmenterEvent {
    PromptShown,
    BlockOpened(BlockId),
    OutputAppended { id: BlockId, text: String },
    BlockFinalized(TerminalBlock),
    CwdChanged(String),
}

#[derive(Debug)]
pub struct BlockSegmenter {
    output_chunk_limit: usize,
    fallback_quiescence: Duration,

    state: SegmenterState,
    blocks: BlockList,
    cwd: Option<String>,

    /// Set by the first OSC 133 marker; never cleared.
    integration_seen: bool,
    input_echo: String,
    submitted: Option<String>,
    pending: String,
    last_activity: Option<Instant>,
    desyncs: u64,
}

impl Default for BlockSegmenter {
    fn default() -> Self {
        Self::new(&BlocksConfig::default())
    }
}

impl BlockSegmenter {
    pub fn new(config: &BlocksConfig) -> Self {
        Self {
            output_chunk_limit: config.output_chunk_limit.max(1),
            fallback_quiescence: config.fallback_quiescence(),
            state: SegmenterState::AwaitingPrompt,
            blocks: BlockList::new(),
            cwd: None,
            integration_seen: false,
            input_echo: String::new(),
            submitted: None,
            pending: String::new(),
            last_activity: None,
            desyncs: 0,
        }
    }

    pub fn state(&self) -> SegmenterState {
        self.state
    }

    pub fn blocks(&self) -> &BlockList {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut BlockList {
        &mut self.blocks
    }

    pub fn cwd(&self) -> Option<&str> {
        self.cwd.as_deref()
    }

    /// Whether an OSC 133 marker has been seen on this session.
    pub fn integration_active(&self) -> bool {
        self.integration_seen
    }

    /// Blocks force-closed because `B` arrived while one was still open.
    pub fn desyncs(&self) -> u64 {
        self.desyncs
    }

    /// Observe one decoded batch. Pending output is flushed at the end.
    pub fn feed(&mut self, events: &[DecodeEvent], out: &mut Vec<SegmenterEvent>) {
        for event in events {
            self.observe(event, out);
        }
        self.flush_output(out);
    }

    /// Record a line the host wrote to the shell.
    ///
    /// With shell integration it only backs up the echoed input. Without it,
    /// it closes the current block and opens a new one for `text`.
    pub fn note_submitted_input(&mut self, text: &str, out: &mut Vec<SegmenterEvent>) {
        let text = text.trim_end_matches(['\r', '\n']).to_string();
        if self.integration_seen {
            self.submitted = Some(text);
            return;
        }

        self.finalize_open(BlockExit::Unknown, out);
        self.open_block(text.trim().to_string(), out);
        self.state = SegmenterState::OutputStreaming;
        self.last_activity = Some(Instant::now());
    }

    /// Close a fallback block once output has been quiet long enough.
    pub fn tick(&mut self, now: Instant, out: &mut Vec<SegmenterEvent>) {
        if self.integration_seen || self.state != SegmenterState::OutputStreaming {
            return;
        }
        let Some(last) = self.last_activity else {
            return;
        };
        if now.saturating_duration_since(last) >= self.fallback_quiescence {
            self.finalize_open(BlockExit::Unknown, out);
            self.state = SegmenterState::AwaitingPrompt;
        }
    }

    /// The session ended: close whatever is still open.
    pub fn close(&mut self, out: &mut Vec<SegmenterEvent>) {
        self.finalize_open(BlockExit::Unknown, out);
        self.state = SegmenterState::AwaitingPrompt;
    }

    fn observe(&mut self, event: &DecodeEvent, out: &mut Vec<SegmenterEvent>) {
        match event {
            DecodeEvent::Osc(seq) => {
                if let Some(marker) = ShellMarker::from_osc(seq) {
                    self.on_marker(marker, out);
                }
            }
            DecodeEvent::Codepoint(ch) => self.on_char(*ch, out),
            DecodeEvent::Replacement => self.on_char(char::REPLACEMENT_CHARACTER, out),
            DecodeEvent::Control(byte) => self.on_control(*byte, out),
            DecodeEvent::Csi(_) | DecodeEvent::Esc { .. } => {}
        }
    }

    fn on_char(&mut self, ch: char, out: &mut Vec<SegmenterEvent>) {
        match self.state {
            SegmenterState::CommandEntered => self.input_echo.push(ch),
            SegmenterState::OutputStreaming => self.push_output(ch, out),
            _ => {}
        }
    }

    fn on_control(&mut self, byte: u8, out: &mut Vec<SegmenterEvent>) {
        match (self.state, byte) {
            (SegmenterState::CommandEntered, 0x08 | 0x7f) => {
                self.input_echo.pop();
            }
            (SegmenterState::OutputStreaming, b'\n') => self.push_output('\n', out),
            (SegmenterState::OutputStreaming, b'\t') => self.push_output('\t', out),
            // Flushed text cannot be retracted, so output keeps what was
            // written no matter where the read boundaries fall.
            (SegmenterState::OutputStreaming, 0x08) => {
                self.last_activity = Some(Instant::now());
            }
            _ => {}
        }
    }

    fn on_marker(&mut self, marker: ShellMarker, out: &mut Vec<SegmenterEvent>) {
        if let ShellMarker::WorkingDirectory(path) = marker {
            self.cwd = Some(path.clone());
            out.push(SegmenterEvent::CwdChanged(path));
            return;
        }

        self.enter_marker_mode(out);

        match marker {
            ShellMarker::PromptStart => {
                self.finalize_open(BlockExit::Unknown, out);
                self.state = SegmenterState::PromptShown;
                out.push(SegmenterEvent::PromptShown);
            }
            ShellMarker::CommandStart => {
                if self.blocks.open().is_some() {
                    self.desyncs += 1;
                    warn!(
                        desyncs = self.desyncs,
                        "command start while a block is open; closing it with unknown exit"
                    );
                    if self.state == SegmenterState::CommandEntered {
                        self.capture_input();
                    }
                    self.finalize_open(BlockExit::Unknown, out);
                }
                self.input_echo.clear();
                self.open_block(String::new(), out);
                self.state = SegmenterState::CommandEntered;
            }
            ShellMarker::OutputStart => {
                if self.state == SegmenterState::CommandEntered && self.blocks.open().is_some() {
                    self.capture_input();
                } else if self.blocks.open().is_none() {
                    let input = self.take_input();
                    self.open_block(input, out);
                }
                self.state = SegmenterState::OutputStreaming;
            }
            ShellMarker::CommandEnd { exit_code } => {
                if self.state == SegmenterState::CommandEntered {
                    self.capture_input();
                }
                let exit = exit_code.map_or(BlockExit::Unknown, BlockExit::Code);
                self.finalize_open(exit, out);
                self.state = SegmenterState::CommandComplete;
            }
            ShellMarker::WorkingDirectory(_) => {}
        }
    }

    fn enter_marker_mode(&mut self, out: &mut Vec<SegmenterEvent>) {
        if self.integration_seen {
            return;
        }
        self.integration_seen = true;
        debug!("shell integration markers detected");
        self.finalize_open(BlockExit::Unknown, out);
    }

    fn open_block(&mut self, input: String, out: &mut Vec<SegmenterEvent>) {
        let block = TerminalBlock::open(input, self.cwd.clone());
        let id = block.id;
        self.blocks.push(block);
        debug!(%id, "block opened");
        out.push(SegmenterEvent::BlockOpened(id));
    }

    /// Echoed text, or the last submitted line when nothing was echoed.
    fn take_input(&mut self) -> String {
        let echoed = std::mem::take(&mut self.input_echo);
        let submitted = self.submitted.take();
        let echoed = echoed.trim();
        if echoed.is_empty() {
            submitted.map(|s| s.trim().to_string()).unwrap_or_default()
        } else {
            echoed.to_string()
        }
    }

    fn capture_input(&mut self) {
        let input = self.take_input();
        if let Some(block) = self.blocks.open_mut() {
            block.input = input;
        }
    }

    fn push_output(&mut self, ch: char, out: &mut Vec<SegmenterEvent>) {
        self.last_activity = Some(Instant::now());
        if self.blocks.open().is_none() {
            return;
        }
        self.pending.push(ch);
        if self.pending.len() >= self.output_chunk_limit {
            self.flush_output(out);
        }
    }

    fn flush_output(&mut self, out: &mut Vec<SegmenterEvent>) {
        if self.pending.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.pending);
        if let Some(block) = self.blocks.open_mut() {
            block.output.push_str(&text);
            out.push(SegmenterEvent::OutputAppended { id: block.id, text });
        }
    }

    fn finalize_open(&mut self, exit: BlockExit, out: &mut Vec<SegmenterEvent>) {
        self.flush_output(out);
        if let Some(block) = self.blocks.open_mut() {
            block.finalize(exit);
            debug!(id = %block.id, ?exit, output_len = block.output.len(), "block finalized");
            out.push(SegmenterEvent::BlockFinalized(block.clone()));
        }
    }
}
