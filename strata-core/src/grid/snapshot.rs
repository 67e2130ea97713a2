use super::cell::Cell;
use super::row::Row;
use super::CursorPos;

/// Immutable copy of the viewport, handed to renderers and other readers.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferSnapshot {
    /// Buffer generation this copy was taken at.
    pub generation: u64,
    pub cols: u16,
    pub rows: u16,
    pub cursor: CursorPos,
    pub cursor_visible: bool,
    pub lines: Vec<Row>,
    pub scrollback_len: usize,
    pub title: String,
    pub alternate_screen: bool,
}

impl BufferSnapshot {
    pub fn cell(&self, col: usize, row: usize) -> Option<&Cell> {
        self.lines.get(row).and_then(|r| r.cell(col))
    }

    /// Per-row change versions, top to bottom.
    pub fn row_versions(&self) -> impl Iterator<Item = u64> + '_ {
        self.lines.iter().map(Row::version)
    }

    pub fn row_text(&self, row: usize) -> String {
        self.lines.get(row).map(Row::text).unwrap_or_default()
    }

    pub fn text(&self) -> String {
        let lines: Vec<String> = self.lines.iter().map(Row::text).collect();
        let used = lines
            .iter()
            .rposition(|l| !l.is_empty())
            .map_or(0, |i| i + 1);
        lines[..used].join("\n")
    }
}
