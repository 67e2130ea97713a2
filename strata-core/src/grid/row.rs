use std::ops::Range;

use super::cell::Cell;

/// One line of cells plus the bookkeeping the renderer keys on.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    cells: Vec<Cell>,
    /// Buffer generation of the last change to this row.
    pub(crate) version: u64,
    /// The line continued onto the next row through auto-wrap.
    pub(crate) wrapped: bool,
}

impl Row {
    pub fn new(cols: u16) -> Self {
        Self {
            cells: vec![Cell::default(); cols as usize],
            version: 0,
            wrapped: false,
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cell(&self, col: usize) -> Option<&Cell> {
        self.cells.get(col)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_wrapped(&self) -> bool {
        self.wrapped
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(Cell::is_blank)
    }

    /// Visible text with trailing blanks trimmed; wide-char spacers skipped.
    pub fn text(&self) -> String {
        let s: String = self
            .cells
            .iter()
            .filter(|c| !c.is_spacer())
            .map(|c| c.ch)
            .collect();
        s.trim_end().to_string()
    }

    pub(crate) fn cells_mut(&mut self) -> &mut Vec<Cell> {
        &mut self.cells
    }

    pub(crate) fn clear_range(&mut self, range: Range<usize>) {
        let end = range.end.min(self.cells.len());
        let start = range.start.min(end);
        self.cells[start..end].fill(Cell::default());
    }

    pub(crate) fn reset(&mut self) {
        self.cells.fill(Cell::default());
        self.wrapped = false;
    }

    /// Truncate or pad to `cols`. A wide character cut in half is blanked.
    pub(crate) fn resize(&mut self, cols: u16) {
        let cols = cols as usize;
        self.cells.resize(cols, Cell::default());
        if let Some(last) = self.cells.last_mut() {
            if last.is_wide() {
                *last = Cell::default();
            }
        }
    }
}
