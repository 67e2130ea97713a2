use super::model::{BlockId, TerminalBlock};

/// Blocks of one session in creation order. Only the last one may be open.
#[derive(Debug, Clone, Default)]
pub struct BlockList {
    blocks: Vec<TerminalBlock>,
}

impl BlockList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TerminalBlock> {
        self.blocks.iter()
    }

    pub fn get(&self, id: BlockId) -> Option<&TerminalBlock> {
        self.blocks.iter().rev().find(|b| b.id == id)
    }

    pub fn last(&self) -> Option<&TerminalBlock> {
        self.blocks.last()
    }

    /// The block still collecting output, if any.
    pub fn open(&self) -> Option<&TerminalBlock> {
        self.blocks.last().filter(|b| !b.is_finalized())
    }

    /// Attach a display summary. Returns `false` for an unknown id.
    pub fn annotate(&mut self, id: BlockId, summary: impl Into<String>) -> bool {
        match self.blocks.iter_mut().rev().find(|b| b.id == id) {
            Some(block) => {
                block.summary = Some(summary.into());
                true
            }
            None => false,
        }
    }

    pub fn to_vec(&self) -> Vec<TerminalBlock> {
        self.blocks.clone()
    }

    pub(crate) fn open_mut(&mut self) -> Option<&mut TerminalBlock> {
        self.blocks.last_mut().filter(|b| !b.is_finalized())
    }

    pub(crate) fn push(&mut self, block: TerminalBlock) {
        debug_assert!(self.open().is_none(), "previous block still open");
        self.blocks.push(block);
    }
}
