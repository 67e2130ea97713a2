//! Terminal buffer: the cell grid the decoder's events are applied to.
//!
//! The viewport is a `Vec<Row>` of exactly `rows` entries. Rows scrolled off
//! the top of the primary screen move into a bounded scrollback; rows pushed
//! out by a height shrink are parked and come back first when the viewport
//! grows again.
//!
//! Every mutation bumps `generation`; every row carries the generation of its
//! last change so a renderer can rebuild only what moved.

pub mod cell;
mod csi;
pub mod row;
pub mod snapshot;

use std::collections::VecDeque;
use std::ops::Range;

use tracing::trace;
use unicode_width::UnicodeWidthChar;

use crate::term::decoder::{CsiSequence, DecodeEvent, OscSequence};

pub use cell::{Cell, CellFlags, Color, Pen};
pub use csi::CsiOutcome;
pub use row::Row;
pub use snapshot::BufferSnapshot;

const TAB_WIDTH: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CursorPos {
    pub col: u16,
    pub row: u16,
}

/// Diagnostic counters. Nothing here is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferStats {
    pub unsupported_csi: u64,
    pub unsupported_esc: u64,
    pub bells: u64,
    pub dropped_zero_width: u64,
}

#[derive(Debug, Clone, Copy)]
struct SavedCursor {
    pos: CursorPos,
    pen: Pen,
}

/// Primary screen stashed while the alternate screen is active.
#[derive(Debug)]
struct PrimaryScreen {
    rows: Vec<Row>,
    cursor: CursorPos,
}

#[derive(Debug)]
pub struct TerminalBuffer {
    cols: u16,
    rows: u16,
    screen: Vec<Row>,
    /// Rows pushed above the viewport by a height shrink, oldest first.
    parked: Vec<Row>,
    scrollback: VecDeque<Row>,
    scrollback_limit: usize,
    primary: Option<PrimaryScreen>,

    cursor: CursorPos,
    wrap_pending: bool,
    pen: Pen,
    saved: Option<SavedCursor>,
    scroll_top: u16,
    scroll_bottom: u16,
    auto_wrap: bool,
    cursor_visible: bool,

    title: String,
    title_changed: bool,
    pending_bells: u32,
    replies: Vec<Vec<u8>>,

    generation: u64,
    stats: BufferStats,
}

impl TerminalBuffer {
    pub fn new(cols: u16, rows: u16, scrollback_limit: usize) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            cols,
            rows,
            screen: (0..rows).map(|_| Row::new(cols)).collect(),
            parked: Vec::new(),
            scrollback: VecDeque::new(),
            scrollback_limit,
            primary: None,
            cursor: CursorPos::default(),
            wrap_pending: false,
            pen: Pen::default(),
            saved: None,
            scroll_top: 0,
            scroll_bottom: rows - 1,
            auto_wrap: true,
            cursor_visible: true,
            title: String::new(),
            title_changed: false,
            pending_bells: 0,
            replies: Vec::new(),
            generation: 0,
            stats: BufferStats::default(),
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    pub fn cursor(&self) -> CursorPos {
        self.cursor
    }

    pub fn cursor_visible(&self) -> bool {
        self.cursor_visible
    }

    pub fn auto_wrap(&self) -> bool {
        self.auto_wrap
    }

    pub fn wrap_pending(&self) -> bool {
        self.wrap_pending
    }

    pub fn pen(&self) -> Pen {
        self.pen
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    pub fn scroll_region(&self) -> (u16, u16) {
        (self.scroll_top, self.scroll_bottom)
    }

    pub fn using_alternate_screen(&self) -> bool {
        self.primary.is_some()
    }

    pub fn scrollback_len(&self) -> usize {
        self.scrollback.len()
    }

    pub fn row(&self, row: usize) -> Option<&Row> {
        self.screen.get(row)
    }

    pub fn cell(&self, col: usize, row: usize) -> Option<&Cell> {
        self.screen.get(row).and_then(|r| r.cell(col))
    }

    pub fn row_text(&self, row: usize) -> String {
        self.screen.get(row).map(Row::text).unwrap_or_default()
    }

    /// Viewport text, one line per row, trailing blank rows dropped.
    pub fn viewport_text(&self) -> String {
        join_lines(self.screen.iter())
    }

    /// Scrollback followed by the viewport, for export.
    pub fn full_text(&self) -> String {
        join_lines(self.scrollback.iter().chain(self.screen.iter()))
    }

    // ── Host-facing drains ──────────────────────────────────────────

    /// Device replies (DSR, DA) queued for the PTY.
    pub fn take_replies(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.replies)
    }

    /// The new title, if OSC 0/2 changed it since the last call.
    pub fn take_title_change(&mut self) -> Option<String> {
        std::mem::take(&mut self.title_changed).then(|| self.title.clone())
    }

    pub fn take_bells(&mut self) -> u32 {
        std::mem::take(&mut self.pending_bells)
    }

    // ── Snapshots ───────────────────────────────────────────────────

    pub fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            generation: self.generation,
            cols: self.cols,
            rows: self.rows,
            cursor: self.cursor,
            cursor_visible: self.cursor_visible,
            lines: self.screen.clone(),
            scrollback_len: self.scrollback.len(),
            title: self.title.clone(),
            alternate_screen: self.primary.is_some(),
        }
    }

    /// Copy of scrollback rows in `range` (0 = oldest), clamped to what exists.
    pub fn scrollback_snapshot(&self, range: Range<usize>) -> Vec<Row> {
        let end = range.end.min(self.scrollback.len());
        let start = range.start.min(end);
        self.scrollback.range(start..end).cloned().collect()
    }

    pub fn is_current(&self, snapshot: &BufferSnapshot) -> bool {
        snapshot.generation == self.generation
    }

    // ── Event application ───────────────────────────────────────────

    pub fn apply(&mut self, event: &DecodeEvent) {
        match event {
            DecodeEvent::Codepoint(ch) => self.apply_codepoint(*ch),
            DecodeEvent::Replacement => self.apply_codepoint(char::REPLACEMENT_CHARACTER),
            DecodeEvent::Control(byte) => self.apply_control(*byte),
            DecodeEvent::Csi(seq) => {
                self.apply_csi(seq);
            }
            DecodeEvent::Osc(seq) => self.apply_osc(seq),
            DecodeEvent::Esc {
                intermediates,
                final_byte,
            } => self.apply_esc(intermediates, *final_byte),
        }
    }

    pub fn apply_codepoint(&mut self, ch: char) {
        let width = match ch.width() {
            Some(w) if w > 0 => w.min(2) as u16,
            _ => {
                self.stats.dropped_zero_width += 1;
                return;
            }
        };
        if width > self.cols {
            return;
        }

        if self.wrap_pending {
            self.wrap_pending = false;
            if self.auto_wrap {
                self.wrap_line();
            }
        }
        if u32::from(self.cursor.col) + u32::from(width) > u32::from(self.cols) {
            if self.auto_wrap {
                self.wrap_line();
            } else {
                self.cursor.col = self.cols - width;
            }
        }

        let col = self.cursor.col as usize;
        let row = self.cursor.row as usize;
        self.clear_wide_fragments(row, col, col + width as usize);

        let pen = self.pen;
        let cells = self.screen[row].cells_mut();
        if width == 2 {
            let mut lead = Cell::new(ch, &pen);
            lead.flags |= CellFlags::WIDE;
            cells[col] = lead;
            cells[col + 1] = Cell::spacer(&pen);
        } else {
            cells[col] = Cell::new(ch, &pen);
        }
        self.touch(row);

        let next = u32::from(self.cursor.col) + u32::from(width);
        if next >= u32::from(self.cols) {
            self.cursor.col = self.cols - 1;
            self.wrap_pending = self.auto_wrap;
        } else {
            self.cursor.col = next as u16;
        }
    }

    pub fn apply_control(&mut self, byte: u8) {
        match byte {
            b'\r' => {
                self.cursor.col = 0;
                self.wrap_pending = false;
                self.bump();
            }
            b'\n' | 0x0b | 0x0c => self.linefeed(),
            b'\t' => {
                let next = (u32::from(self.cursor.col) / TAB_WIDTH + 1) * TAB_WIDTH;
                self.cursor.col = next.min(u32::from(self.cols - 1)) as u16;
                self.wrap_pending = false;
                self.bump();
            }
            0x08 => {
                self.cursor.col = self.cursor.col.saturating_sub(1);
                self.wrap_pending = false;
                self.bump();
            }
            0x07 => {
                self.stats.bells += 1;
                self.pending_bells = self.pending_bells.saturating_add(1);
            }
            _ => {}
        }
    }

    pub fn apply_csi(&mut self, seq: &CsiSequence) -> CsiOutcome {
        let outcome = match csi::handler(seq.final_byte) {
            Some(handler) if seq.intermediates.is_empty() => handler(self, seq),
            _ => CsiOutcome::Unsupported,
        };
        if outcome == CsiOutcome::Unsupported {
            self.stats.unsupported_csi += 1;
            trace!(?seq, "unsupported CSI sequence");
        }
        outcome
    }

    pub fn apply_esc(&mut self, intermediates: &[u8], final_byte: u8) {
        match (intermediates, final_byte) {
            ([], b'7') => self.save_cursor(),
            ([], b'8') => self.restore_cursor(),
            ([], b'D') => self.linefeed(),
            ([], b'M') => self.reverse_index(),
            ([], b'E') => {
                self.cursor.col = 0;
                self.linefeed();
            }
            ([], b'c') => self.full_reset(),
            // Keypad modes and charset designation have no effect on the grid.
            ([], b'=' | b'>') | ([b'(' | b')' | b'*' | b'+'], _) => {}
            _ => {
                self.stats.unsupported_esc += 1;
                trace!(?intermediates, final_byte, "unsupported ESC sequence");
            }
        }
    }

    pub fn apply_osc(&mut self, seq: &OscSequence) {
        if matches!(seq.code, 0 | 2) {
            self.title = seq.payload.clone();
            self.title_changed = true;
            self.bump();
        }
    }

    // ── Geometry ────────────────────────────────────────────────────

    pub fn resize(&mut self, cols: u16, rows: u16) {
        let cols = cols.max(1);
        let rows = rows.max(1);
        if cols == self.cols && rows == self.rows {
            return;
        }

        for row in &mut self.screen {
            row.resize(cols);
        }
        match self.primary.as_mut() {
            None => refit_height(
                &mut self.screen,
                &mut self.cursor,
                Some(&mut self.parked),
                rows,
                cols,
            ),
            Some(primary) => {
                for row in &mut primary.rows {
                    row.resize(cols);
                }
                refit_height(
                    &mut primary.rows,
                    &mut primary.cursor,
                    Some(&mut self.parked),
                    rows,
                    cols,
                );
                refit_height(&mut self.screen, &mut self.cursor, None, rows, cols);
                primary.cursor = clamp_pos(primary.cursor, cols, rows);
            }
        }

        self.cols = cols;
        self.rows = rows;
        self.scroll_top = 0;
        self.scroll_bottom = rows - 1;
        self.wrap_pending = false;
        self.cursor = clamp_pos(self.cursor, cols, rows);
        if let Some(saved) = self.saved.as_mut() {
            saved.pos = clamp_pos(saved.pos, cols, rows);
        }
        self.touch_range(0..rows as usize);
    }

    // ── Primitives shared with the CSI handlers ─────────────────────

    fn bump(&mut self) {
        self.generation += 1;
    }

    fn touch(&mut self, row: usize) {
        self.generation += 1;
        if let Some(r) = self.screen.get_mut(row) {
            r.version = self.generation;
        }
    }

    fn touch_range(&mut self, rows: Range<usize>) {
        self.generation += 1;
        let generation = self.generation;
        let end = rows.end.min(self.screen.len());
        for row in &mut self.screen[rows.start.min(end)..end] {
            row.version = generation;
        }
    }

    /// Absolute move, clamped to the viewport.
    fn goto(&mut self, col: u16, row: u16) {
        self.cursor = clamp_pos(CursorPos { col, row }, self.cols, self.rows);
        self.wrap_pending = false;
        self.bump();
    }

    fn move_by(&mut self, dcol: i32, drow: i32) {
        let col = (i32::from(self.cursor.col) + dcol).max(0) as u16;
        let row = (i32::from(self.cursor.row) + drow).max(0) as u16;
        self.goto(col, row);
    }

    fn wrap_line(&mut self) {
        let row = self.cursor.row as usize;
        self.screen[row].wrapped = true;
        self.cursor.col = 0;
        self.linefeed();
    }

    fn linefeed(&mut self) {
        self.wrap_pending = false;
        if self.cursor.row == self.scroll_bottom {
            self.scroll_up(1);
        } else if self.cursor.row + 1 < self.rows {
            self.cursor.row += 1;
            self.bump();
        } else {
            self.bump();
        }
    }

    fn reverse_index(&mut self) {
        self.wrap_pending = false;
        if self.cursor.row == self.scroll_top {
            self.scroll_down(1);
        } else if self.cursor.row > 0 {
            self.cursor.row -= 1;
            self.bump();
        }
    }

    /// Scroll the region up; rows leaving the top of a full-height region on
    /// the primary screen go to scrollback.
    fn scroll_up(&mut self, n: u16) {
        let top = self.scroll_top as usize;
        let bottom = self.scroll_bottom as usize;
        let n = (n as usize).min(bottom - top + 1);
        for _ in 0..n {
            let row = self.screen.remove(top);
            self.screen.insert(bottom, Row::new(self.cols));
            if top == 0 && self.primary.is_none() {
                self.push_scrollback(row);
            }
        }
        self.touch_range(top..bottom + 1);
    }

    fn scroll_down(&mut self, n: u16) {
        let top = self.scroll_top as usize;
        let bottom = self.scroll_bottom as usize;
        let n = (n as usize).min(bottom - top + 1);
        for _ in 0..n {
            self.screen.remove(bottom);
            self.screen.insert(top, Row::new(self.cols));
        }
        self.touch_range(top..bottom + 1);
    }

    fn push_scrollback(&mut self, row: Row) {
        // Parked rows sat above the viewport, so they are older.
        let parked = std::mem::take(&mut self.parked);
        for old in parked {
            self.store_scrollback(old);
        }
        self.store_scrollback(row);
    }

    fn store_scrollback(&mut self, row: Row) {
        if self.scrollback_limit == 0 {
            return;
        }
        self.scrollback.push_back(row);
        while self.scrollback.len() > self.scrollback_limit {
            self.scrollback.pop_front();
        }
    }

    fn insert_lines(&mut self, n: u16) {
        let row = self.cursor.row as usize;
        let top = self.scroll_top as usize;
        let bottom = self.scroll_bottom as usize;
        if row < top || row > bottom {
            return;
        }
        let n = (n as usize).min(bottom - row + 1);
        for _ in 0..n {
            self.screen.remove(bottom);
            self.screen.insert(row, Row::new(self.cols));
        }
        self.cursor.col = 0;
        self.wrap_pending = false;
        self.touch_range(row..bottom + 1);
    }

    fn delete_lines(&mut self, n: u16) {
        let row = self.cursor.row as usize;
        let top = self.scroll_top as usize;
        let bottom = self.scroll_bottom as usize;
        if row < top || row > bottom {
            return;
        }
        let n = (n as usize).min(bottom - row + 1);
        for _ in 0..n {
            self.screen.remove(row);
            self.screen.insert(bottom, Row::new(self.cols));
        }
        self.cursor.col = 0;
        self.wrap_pending = false;
        self.touch_range(row..bottom + 1);
    }

    /// Reset cells `cols` of `row` to the default cell.
    fn erase_cells(&mut self, row: usize, cols: Range<usize>) {
        self.clear_wide_fragments(row, cols.start, cols.end);
        self.screen[row].clear_range(cols);
        self.touch(row);
    }

    fn erase_rows(&mut self, rows: Range<usize>) {
        for row in &mut self.screen[rows.clone()] {
            row.reset();
        }
        self.touch_range(rows);
    }

    fn insert_blanks(&mut self, n: u16) {
        let row = self.cursor.row as usize;
        let col = self.cursor.col as usize;
        let cols = self.cols as usize;
        let n = (n as usize).min(cols - col);
        self.clear_wide_fragments(row, col, col);
        let cells = self.screen[row].cells_mut();
        cells[col..].rotate_right(n);
        cells[col..col + n].fill(Cell::default());
        if let Some(last) = cells.last_mut() {
            if last.is_wide() {
                *last = Cell::default();
            }
        }
        self.wrap_pending = false;
        self.touch(row);
    }

    fn delete_chars(&mut self, n: u16) {
        let row = self.cursor.row as usize;
        let col = self.cursor.col as usize;
        let cols = self.cols as usize;
        let n = (n as usize).min(cols - col);
        self.clear_wide_fragments(row, col, col + n);
        let cells = self.screen[row].cells_mut();
        cells[col..].rotate_left(n);
        cells[cols - n..].fill(Cell::default());
        self.wrap_pending = false;
        self.touch(row);
    }

    /// Blank the far half of any wide pair that straddles `start` or `end`.
    fn clear_wide_fragments(&mut self, row: usize, start: usize, end: usize) {
        let cells = self.screen[row].cells_mut();
        let len = cells.len();
        if start > 0 && start < len && cells[start].is_spacer() {
            cells[start - 1] = Cell::default();
            cells[start] = Cell::default();
        }
        if end > 0 && end < len && cells[end - 1].is_wide() {
            cells[end] = Cell::default();
        }
    }

    fn save_cursor(&mut self) {
        self.saved = Some(SavedCursor {
            pos: self.cursor,
            pen: self.pen,
        });
    }

    fn restore_cursor(&mut self) {
        let saved = self.saved.unwrap_or(SavedCursor {
            pos: CursorPos::default(),
            pen: Pen::default(),
        });
        self.pen = saved.pen;
        self.goto(saved.pos.col, saved.pos.row);
    }

    fn enter_alternate_screen(&mut self, save_cursor: bool) {
        if self.primary.is_some() {
            return;
        }
        if save_cursor {
            self.save_cursor();
        }
        let blank = (0..self.rows).map(|_| Row::new(self.cols)).collect();
        let rows = std::mem::replace(&mut self.screen, blank);
        self.primary = Some(PrimaryScreen {
            rows,
            cursor: self.cursor,
        });
        self.wrap_pending = false;
        self.touch_range(0..self.rows as usize);
    }

    fn leave_alternate_screen(&mut self, restore_cursor: bool) {
        let Some(primary) = self.primary.take() else {
            return;
        };
        self.screen = primary.rows;
        self.cursor = clamp_pos(primary.cursor, self.cols, self.rows);
        self.wrap_pending = false;
        if restore_cursor {
            self.restore_cursor();
        }
        self.touch_range(0..self.rows as usize);
    }

    fn full_reset(&mut self) {
        self.primary = None;
        for row in &mut self.screen {
            row.reset();
        }
        self.cursor = CursorPos::default();
        self.wrap_pending = false;
        self.pen = Pen::default();
        self.saved = None;
        self.scroll_top = 0;
        self.scroll_bottom = self.rows - 1;
        self.auto_wrap = true;
        self.cursor_visible = true;
        self.touch_range(0..self.rows as usize);
    }
}

fn clamp_pos(pos: CursorPos, cols: u16, rows: u16) -> CursorPos {
    CursorPos {
        col: pos.col.min(cols - 1),
        row: pos.row.min(rows - 1),
    }
}

/// Bring `rows` to `target` entries. Shrinking drops blank rows below the
/// cursor, then moves rows above the cursor into `parked`, then discards rows
/// below it; the cursor stays on its line. Growing takes parked rows back
/// before appending blanks.
fn refit_height(
    rows: &mut Vec<Row>,
    cursor: &mut CursorPos,
    mut parked: Option<&mut Vec<Row>>,
    target: u16,
    cols: u16,
) {
    let target = target as usize;
    while rows.len() > target {
        let below_cursor = rows.len() - 1 > cursor.row as usize;
        if below_cursor && rows.last().is_some_and(Row::is_blank) {
            rows.pop();
            continue;
        }
        if cursor.row == 0 {
            rows.pop();
            continue;
        }
        let top = rows.remove(0);
        if let Some(parked) = parked.as_deref_mut() {
            parked.push(top);
        }
        cursor.row = cursor.row.saturating_sub(1);
    }
    while rows.len() < target {
        match parked.as_deref_mut().and_then(Vec::pop) {
            Some(mut row) => {
                row.resize(cols);
                rows.insert(0, row);
                cursor.row += 1;
            }
            None => rows.push(Row::new(cols)),
        }
    }
}

fn join_lines<'a>(rows: impl Iterator<Item = &'a Row>) -> String {
    let lines: Vec<String> = rows.map(Row::text).collect();
    let used = lines
        .iter()
        .rposition(|l| !l.is_empty())
        .map_or(0, |i| i + 1);
    lines[..used].join("\n")
}
