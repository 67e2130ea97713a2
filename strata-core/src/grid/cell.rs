//! Cell, color and attribute types.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Color {
    #[default]
    Default,
    /// 0-15 ANSI, 16-231 color cube, 232-255 grayscale ramp.
    Indexed(u8),
    Rgb(u8, u8, u8),
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CellFlags: u16 {
        const BOLD        = 1 << 0;
        const DIM         = 1 << 1;
        const ITALIC      = 1 << 2;
        const UNDERLINE   = 1 << 3;
        const BLINK       = 1 << 4;
        const INVERSE     = 1 << 5;
        const HIDDEN      = 1 << 6;
        const STRIKE      = 1 << 7;
        /// Left half of a double-width character.
        const WIDE        = 1 << 8;
        /// Right half of a double-width character (holds no glyph).
        const WIDE_SPACER = 1 << 9;
    }
}

impl CellFlags {
    /// Bits that SGR may set; the layout bits are owned by the grid.
    pub const STYLE: CellFlags = CellFlags::BOLD
        .union(CellFlags::DIM)
        .union(CellFlags::ITALIC)
        .union(CellFlags::UNDERLINE)
        .union(CellFlags::BLINK)
        .union(CellFlags::INVERSE)
        .union(CellFlags::HIDDEN)
        .union(CellFlags::STRIKE);
}

/// Current drawing attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pen {
    pub fg: Color,
    pub bg: Color,
    pub flags: CellFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub ch: char,
    pub fg: Color,
    pub bg: Color,
    pub flags: CellFlags,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            ch: ' ',
            fg: Color::Default,
            bg: Color::Default,
            flags: CellFlags::empty(),
        }
    }
}

impl Cell {
    pub fn new(ch: char, pen: &Pen) -> Self {
        Self {
            ch,
            fg: pen.fg,
            bg: pen.bg,
            flags: pen.flags & CellFlags::STYLE,
        }
    }

    /// Right half of a wide character written with `pen`.
    pub fn spacer(pen: &Pen) -> Self {
        Self {
            ch: ' ',
            fg: pen.fg,
            bg: pen.bg,
            flags: (pen.flags & CellFlags::STYLE) | CellFlags::WIDE_SPACER,
        }
    }

    pub fn is_wide(&self) -> bool {
        self.flags.contains(CellFlags::WIDE)
    }

    pub fn is_spacer(&self) -> bool {
        self.flags.contains(CellFlags::WIDE_SPACER)
    }

    pub fn is_blank(&self) -> bool {
        *self == Cell::default()
    }
}
