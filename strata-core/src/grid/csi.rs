//! CSI dispatch: a static table indexed by final byte.

use super::cell::{CellFlags, Color, Pen};
use super::TerminalBuffer;
use crate::term::decoder::CsiSequence;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsiOutcome {
    Applied,
    /// Unknown final byte, private marker, mode or parameter; state unchanged.
    Unsupported,
}

use CsiOutcome::{Applied, Unsupported};

pub(crate) type CsiHandler = fn(&mut TerminalBuffer, &CsiSequence) -> CsiOutcome;

const FIRST_FINAL: u8 = 0x40;
const LAST_FINAL: u8 = 0x7e;
const TABLE_LEN: usize = (LAST_FINAL - FIRST_FINAL + 1) as usize;

static HANDLERS: [Option<CsiHandler>; TABLE_LEN] = build_table();

const fn slot(final_byte: u8) -> usize {
    (final_byte - FIRST_FINAL) as usize
}

const fn build_table() -> [Option<CsiHandler>; TABLE_LEN] {
    let mut t: [Option<CsiHandler>; TABLE_LEN] = [None; TABLE_LEN];
    t[slot(b'@')] = Some(insert_chars);
    t[slot(b'A')] = Some(cursor_up);
    t[slot(b'B')] = Some(cursor_down);
    t[slot(b'C')] = Some(cursor_forward);
    t[slot(b'D')] = Some(cursor_back);
    t[slot(b'E')] = Some(cursor_next_line);
    t[slot(b'F')] = Some(cursor_prev_line);
    t[slot(b'G')] = Some(cursor_column);
    t[slot(b'`')] = Some(cursor_column);
    t[slot(b'H')] = Some(cursor_position);
    t[slot(b'f')] = Some(cursor_position);
    t[slot(b'J')] = Some(erase_display);
    t[slot(b'K')] = Some(erase_line);
    t[slot(b'L')] = Some(insert_lines);
    t[slot(b'M')] = Some(delete_lines);
    t[slot(b'P')] = Some(delete_chars);
    t[slot(b'S')] = Some(scroll_up);
    t[slot(b'T')] = Some(scroll_down);
    t[slot(b'X')] = Some(erase_chars);
    t[slot(b'c')] = Some(device_attributes);
    t[slot(b'd')] = Some(cursor_row);
    t[slot(b'h')] = Some(set_mode);
    t[slot(b'l')] = Some(reset_mode);
    t[slot(b'm')] = Some(select_graphic_rendition);
    t[slot(b'n')] = Some(device_status);
    t[slot(b'r')] = Some(set_scroll_region);
    t[slot(b's')] = Some(save_cursor);
    t[slot(b'u')] = Some(restore_cursor);
    t
}

pub(crate) fn handler(final_byte: u8) -> Option<CsiHandler> {
    if (FIRST_FINAL..=LAST_FINAL).contains(&final_byte) {
        HANDLERS[slot(final_byte)]
    } else {
        None
    }
}

/// Run `f` with the first parameter (default 1) unless a private marker is set.
fn counted(seq: &CsiSequence, f: impl FnOnce(u16)) -> CsiOutcome {
    if seq.private.is_some() {
        return Unsupported;
    }
    f(seq.param_or(0, 1));
    Applied
}

// ── Cursor movement ─────────────────────────────────────────────────

fn cursor_up(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    counted(seq, |n| buf.move_by(0, -i32::from(n)))
}

fn cursor_down(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    counted(seq, |n| buf.move_by(0, i32::from(n)))
}

fn cursor_forward(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    counted(seq, |n| buf.move_by(i32::from(n), 0))
}

fn cursor_back(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    counted(seq, |n| buf.move_by(-i32::from(n), 0))
}

fn cursor_next_line(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    counted(seq, |n| {
        let row = buf.cursor.row.saturating_add(n);
        buf.goto(0, row);
    })
}

fn cursor_prev_line(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    counted(seq, |n| {
        let row = buf.cursor.row.saturating_sub(n);
        buf.goto(0, row);
    })
}

fn cursor_column(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    counted(seq, |n| {
        let row = buf.cursor.row;
        buf.goto(n - 1, row);
    })
}

fn cursor_row(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    counted(seq, |n| {
        let col = buf.cursor.col;
        buf.goto(col, n - 1);
    })
}

fn cursor_position(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    if seq.private.is_some() {
        return Unsupported;
    }
    let row = seq.param_or(0, 1) - 1;
    let col = seq.param_or(1, 1) - 1;
    buf.goto(col, row);
    Applied
}

// ── Erasing and editing ─────────────────────────────────────────────

fn erase_display(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    if seq.private.is_some() {
        return Unsupported;
    }
    let rows = buf.rows as usize;
    let cols = buf.cols as usize;
    let row = buf.cursor.row as usize;
    let col = buf.cursor.col as usize;
    match seq.raw_param(0).unwrap_or(0) {
        0 => {
            buf.erase_cells(row, col..cols);
            buf.erase_rows(row + 1..rows);
        }
        1 => {
            buf.erase_rows(0..row);
            buf.erase_cells(row, 0..col + 1);
        }
        2 => buf.erase_rows(0..rows),
        3 => {
            buf.scrollback.clear();
            buf.parked.clear();
            buf.bump();
        }
        _ => return Unsupported,
    }
    buf.wrap_pending = false;
    Applied
}

fn erase_line(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    if seq.private.is_some() {
        return Unsupported;
    }
    let cols = buf.cols as usize;
    let row = buf.cursor.row as usize;
    let col = buf.cursor.col as usize;
    let range = match seq.raw_param(0).unwrap_or(0) {
        0 => col..cols,
        1 => 0..col + 1,
        2 => 0..cols,
        _ => return Unsupported,
    };
    buf.erase_cells(row, range);
    buf.wrap_pending = false;
    Applied
}

fn erase_chars(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    counted(seq, |n| {
        let row = buf.cursor.row as usize;
        let col = buf.cursor.col as usize;
        let end = (col + n as usize).min(buf.cols as usize);
        buf.erase_cells(row, col..end);
        buf.wrap_pending = false;
    })
}

fn insert_chars(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    counted(seq, |n| buf.insert_blanks(n))
}

fn delete_chars(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    counted(seq, |n| buf.delete_chars(n))
}

fn insert_lines(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    counted(seq, |n| buf.insert_lines(n))
}

fn delete_lines(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    counted(seq, |n| buf.delete_lines(n))
}

fn scroll_up(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    counted(seq, |n| buf.scroll_up(n))
}

fn scroll_down(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    counted(seq, |n| buf.scroll_down(n))
}

// ── Modes ───────────────────────────────────────────────────────────

fn set_mode(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    apply_modes(buf, seq, true)
}

fn reset_mode(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    apply_modes(buf, seq, false)
}

fn apply_modes(buf: &mut TerminalBuffer, seq: &CsiSequence, enable: bool) -> CsiOutcome {
    if seq.private != Some(b'?') {
        return Unsupported;
    }
    let mut known = false;
    for &mode in &seq.params {
        match mode {
            7 => {
                buf.auto_wrap = enable;
                if !enable {
                    buf.wrap_pending = false;
                }
            }
            25 => buf.cursor_visible = enable,
            47 | 1047 => {
                if enable {
                    buf.enter_alternate_screen(false);
                } else {
                    buf.leave_alternate_screen(false);
                }
            }
            1049 => {
                if enable {
                    buf.enter_alternate_screen(true);
                } else {
                    buf.leave_alternate_screen(true);
                }
            }
            _ => continue,
        }
        known = true;
    }
    if known {
        buf.bump();
        Applied
    } else {
        Unsupported
    }
}

fn set_scroll_region(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    if seq.private.is_some() {
        return Unsupported;
    }
    let top = seq.param_or(0, 1);
    let bottom = seq.param_or(1, buf.rows).min(buf.rows);
    if top >= bottom {
        return Unsupported;
    }
    buf.scroll_top = top - 1;
    buf.scroll_bottom = bottom - 1;
    buf.goto(0, 0);
    Applied
}

fn save_cursor(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    if seq.private.is_some() || !seq.params.is_empty() {
        return Unsupported;
    }
    buf.save_cursor();
    Applied
}

fn restore_cursor(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    if seq.private.is_some() || !seq.params.is_empty() {
        return Unsupported;
    }
    buf.restore_cursor();
    Applied
}

// ── Reports ─────────────────────────────────────────────────────────

fn device_status(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    if seq.private.is_some() {
        return Unsupported;
    }
    match seq.raw_param(0) {
        Some(5) => buf.replies.push(b"\x1b[0n".to_vec()),
        Some(6) => {
            let report = format!("\x1b[{};{}R", buf.cursor.row + 1, buf.cursor.col + 1);
            buf.replies.push(report.into_bytes());
        }
        _ => return Unsupported,
    }
    Applied
}

fn device_attributes(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    if seq.raw_param(0).unwrap_or(0) != 0 {
        return Unsupported;
    }
    match seq.private {
        // VT220 with ANSI color.
        None => buf.replies.push(b"\x1b[?62;22c".to_vec()),
        Some(b'>') => buf.replies.push(b"\x1b[>1;10;0c".to_vec()),
        Some(_) => return Unsupported,
    }
    Applied
}

// ── SGR ─────────────────────────────────────────────────────────────

fn select_graphic_rendition(buf: &mut TerminalBuffer, seq: &CsiSequence) -> CsiOutcome {
    if seq.private.is_some() {
        return Unsupported;
    }
    if seq.params.is_empty() {
        buf.pen = Pen::default();
        return Applied;
    }

    // Worked on a copy so a malformed parameter leaves the pen untouched.
    let mut next = buf.pen;
    let pen = &mut next;
    let params = &seq.params;
    let mut i = 0;
    while i < params.len() {
        match params[i] {
            0 => *pen = Pen::default(),
            1 => pen.flags.insert(CellFlags::BOLD),
            2 => pen.flags.insert(CellFlags::DIM),
            3 => pen.flags.insert(CellFlags::ITALIC),
            4 | 21 => pen.flags.insert(CellFlags::UNDERLINE),
            5 | 6 => pen.flags.insert(CellFlags::BLINK),
            7 => pen.flags.insert(CellFlags::INVERSE),
            8 => pen.flags.insert(CellFlags::HIDDEN),
            9 => pen.flags.insert(CellFlags::STRIKE),
            22 => pen.flags.remove(CellFlags::BOLD | CellFlags::DIM),
            23 => pen.flags.remove(CellFlags::ITALIC),
            24 => pen.flags.remove(CellFlags::UNDERLINE),
            25 => pen.flags.remove(CellFlags::BLINK),
            27 => pen.flags.remove(CellFlags::INVERSE),
            28 => pen.flags.remove(CellFlags::HIDDEN),
            29 => pen.flags.remove(CellFlags::STRIKE),
            p @ 30..=37 => pen.fg = Color::Indexed((p - 30) as u8),
            39 => pen.fg = Color::Default,
            p @ 40..=47 => pen.bg = Color::Indexed((p - 40) as u8),
            49 => pen.bg = Color::Default,
            p @ 90..=97 => pen.fg = Color::Indexed((p - 90 + 8) as u8),
            p @ 100..=107 => pen.bg = Color::Indexed((p - 100 + 8) as u8),
            p @ (38 | 48) => {
                let Some((color, used)) = extended_color(&params[i + 1..]) else {
                    return Unsupported;
                };
                if p == 38 {
                    pen.fg = color;
                } else {
                    pen.bg = color;
                }
                i += used;
            }
            _ => {}
        }
        i += 1;
    }
    buf.pen = next;
    Applied
}

/// `5;n` or `2;r;g;b`, returning the color and how many params it used.
fn extended_color(rest: &[u16]) -> Option<(Color, usize)> {
    let channel = |v: u16| v.min(255) as u8;
    match *rest.first()? {
        5 => Some((Color::Indexed(channel(*rest.get(1)?)), 2)),
        2 => {
            let r = *rest.get(1)?;
            let g = *rest.get(2)?;
            let b = *rest.get(3)?;
            Some((Color::Rgb(channel(r), channel(g), channel(b)), 4))
        }
        _ => None,
    }
}
