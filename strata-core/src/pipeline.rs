//! Decoder -> buffer -> segmenter, for one session.
//!
//! `Pipeline` is the synchronous core the engine task drives. It does no
//! I/O, so it can be fed from tests or replayed captures directly.

use std::time::Instant;

use crate::blocks::{BlockList, BlockSegmenter, SegmenterEvent};
use crate::config::Config;
use crate::grid::{BufferSnapshot, TerminalBuffer};
use crate::term::{ByteDecoder, DecodeEvent};

/// What one `feed` produced besides grid changes.
#[derive(Debug, Default)]
pub struct FeedOutcome {
    pub block_events: Vec<SegmenterEvent>,
    /// Device replies to write back to the shell.
    pub replies: Vec<Vec<u8>>,
    pub bells: u32,
    pub title: Option<String>,
}

#[derive(Debug)]
pub struct Pipeline {
    decoder: ByteDecoder,
    buffer: TerminalBuffer,
    segmenter: BlockSegmenter,
    scratch: Vec<DecodeEvent>,
}

impl Pipeline {
    pub fn new(config: &Config) -> Self {
        Self {
            decoder: ByteDecoder::new(),
            buffer: TerminalBuffer::new(
                config.grid.columns,
                config.grid.rows,
                config.grid.scrollback_limit,
            ),
            segmenter: BlockSegmenter::new(&config.blocks),
            scratch: Vec::new(),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) -> FeedOutcome {
        self.scratch.clear();
        self.decoder.feed(bytes, &mut self.scratch);

        for event in &self.scratch {
            self.buffer.apply(event);
        }

        let mut outcome = FeedOutcome::default();
        self.segmenter.feed(&self.scratch, &mut outcome.block_events);
        outcome.replies = self.buffer.take_replies();
        outcome.bells = self.buffer.take_bells();
        outcome.title = self.buffer.take_title_change();
        outcome
    }

    pub fn submit(&mut self, text: &str) -> Vec<SegmenterEvent> {
        let mut out = Vec::new();
        self.segmenter.note_submitted_input(text, &mut out);
        out
    }

    pub fn tick(&mut self, now: Instant) -> Vec<SegmenterEvent> {
        let mut out = Vec::new();
        self.segmenter.tick(now, &mut out);
        out
    }

    pub fn close(&mut self) -> Vec<SegmenterEvent> {
        let mut out = Vec::new();
        self.segmenter.close(&mut out);
        out
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.buffer.resize(cols, rows);
    }

    pub fn snapshot(&self) -> BufferSnapshot {
        self.buffer.snapshot()
    }

    pub fn buffer(&self) -> &TerminalBuffer {
        &self.buffer
    }

    pub fn decoder(&self) -> &ByteDecoder {
        &self.decoder
    }

    pub fn segmenter(&self) -> &BlockSegmenter {
        &self.segmenter
    }

    pub fn blocks(&self) -> &BlockList {
        self.segmenter.blocks()
    }

    pub fn blocks_mut(&mut self) -> &mut BlockList {
        self.segmenter.blocks_mut()
    }
}
