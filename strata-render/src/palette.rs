//! Cell colors to linear RGBA.
//!
//! The 16 ANSI entries are authored in sRGB and converted once; the GPU
//! target is an sRGB surface, so everything handed to the shader is linear.

use strata_core::{Cell, CellFlags, Color};

/// Multiplier applied to the foreground of `DIM` cells.
const DIM_FACTOR: f32 = 0.5;

/// xterm's 6x6x6 cube levels.
const CUBE_LEVELS: [u8; 6] = [0, 95, 135, 175, 215, 255];

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Opaque color from sRGB components in `0.0..=1.0`.
    pub fn from_srgb(r: f32, g: f32, b: f32) -> Self {
        Self::new(srgb_to_linear(r), srgb_to_linear(g), srgb_to_linear(b), 1.0)
    }

    pub fn from_srgb8(r: u8, g: u8, b: u8) -> Self {
        Self::from_srgb(
            f32::from(r) / 255.0,
            f32::from(g) / 255.0,
            f32::from(b) / 255.0,
        )
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    fn scaled(self, k: f32) -> Self {
        Self::new(self.r * k, self.g * k, self.b * k, self.a)
    }
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.040_45 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    ansi: [Rgba; 16],
    pub foreground: Rgba,
    pub background: Rgba,
    pub cursor: Rgba,
}

impl Default for Palette {
    fn default() -> Self {
        let ansi = [
            (0.15, 0.15, 0.15), // black
            (0.90, 0.30, 0.30), // red
            (0.35, 0.90, 0.35), // green
            (0.95, 0.85, 0.30), // yellow
            (0.40, 0.55, 0.95), // blue
            (0.85, 0.40, 0.85), // magenta
            (0.40, 0.90, 0.90), // cyan
            (0.90, 0.90, 0.90), // white
            (0.45, 0.45, 0.45),
            (1.00, 0.45, 0.45),
            (0.45, 1.00, 0.45),
            (1.00, 1.00, 0.45),
            (0.55, 0.70, 1.00),
            (1.00, 0.55, 1.00),
            (0.55, 1.00, 1.00),
            (1.00, 1.00, 1.00),
        ]
        .map(|(r, g, b)| Rgba::from_srgb(r, g, b));

        Self {
            ansi,
            foreground: Rgba::from_srgb(0.85, 0.85, 0.85),
            background: Rgba::from_srgb(0.07, 0.07, 0.08),
            cursor: Rgba::from_srgb(0.85, 0.85, 0.85),
        }
    }
}

impl Palette {
    /// Replace the 16 ANSI entries (already linear).
    pub fn with_ansi(mut self, ansi: [Rgba; 16]) -> Self {
        self.ansi = ansi;
        self
    }

    /// 256-color lookup: ANSI, then the 6x6x6 cube, then the gray ramp.
    pub fn indexed(&self, idx: u8) -> Rgba {
        match idx {
            0..=15 => self.ansi[idx as usize],
            16..=231 => {
                let i = idx - 16;
                Rgba::from_srgb8(
                    CUBE_LEVELS[(i / 36) as usize],
                    CUBE_LEVELS[((i / 6) % 6) as usize],
                    CUBE_LEVELS[(i % 6) as usize],
                )
            }
            232..=255 => {
                let level = 8 + (idx - 232) * 10;
                Rgba::from_srgb8(level, level, level)
            }
        }
    }

    fn color(&self, color: Color, default: Rgba) -> Rgba {
        match color {
            Color::Default => default,
            Color::Indexed(i) => self.indexed(i),
            Color::Rgb(r, g, b) => Rgba::from_srgb8(r, g, b),
        }
    }

    /// Final (foreground, background) for a cell after its attributes.
    pub fn resolve(&self, cell: &Cell) -> (Rgba, Rgba) {
        let flags = cell.flags;
        let mut fg = match cell.fg {
            Color::Indexed(i) if i < 8 && flags.contains(CellFlags::BOLD) => self.indexed(i + 8),
            other => self.color(other, self.foreground),
        };
        let mut bg = self.color(cell.bg, self.background);

        if flags.contains(CellFlags::INVERSE) {
            std::mem::swap(&mut fg, &mut bg);
        }
        if flags.contains(CellFlags::DIM) {
            fg = fg.scaled(DIM_FACTOR);
        }
        if flags.contains(CellFlags::HIDDEN) {
            fg = bg;
        }
        (fg, bg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Rgba, b: Rgba) -> bool {
        a.to_array()
            .iter()
            .zip(b.to_array())
            .all(|(x, y)| (x - y).abs() < 1e-4)
    }

    fn cell(fg: Color, bg: Color, flags: CellFlags) -> Cell {
        Cell {
            ch: 'x',
            fg,
            bg,
            flags,
        }
    }

    #[test]
    fn test_cube_and_gray_ramp() {
        let p = Palette::default();
        assert!(close(p.indexed(196), Rgba::new(1.0, 0.0, 0.0, 1.0)));
        assert!(close(p.indexed(16), Rgba::new(0.0, 0.0, 0.0, 1.0)));
        assert!(close(p.indexed(231), Rgba::new(1.0, 1.0, 1.0, 1.0)));
        let gray = p.indexed(244);
        assert_eq!(gray, Rgba::from_srgb8(128, 128, 128));
        assert!(gray.r > 0.2 && gray.r < 0.25);
    }

    #[test]
    fn test_defaults() {
        let p = Palette::default();
        let (fg, bg) = p.resolve(&Cell::default());
        assert_eq!(fg, p.foreground);
        assert_eq!(bg, p.background);
    }

    #[test]
    fn test_bold_brightens_low_ansi() {
        let p = Palette::default();
        let (fg, _) = p.resolve(&cell(Color::Indexed(1), Color::Default, CellFlags::BOLD));
        assert_eq!(fg, p.indexed(9));
        let (fg, _) = p.resolve(&cell(Color::Indexed(100), Color::Default, CellFlags::BOLD));
        assert_eq!(fg, p.indexed(100));
    }

    #[test]
    fn test_inverse_dim_hidden() {
        let p = Palette::default();
        let (fg, bg) = p.resolve(&cell(Color::Indexed(2), Color::Indexed(4), CellFlags::INVERSE));
        assert_eq!((fg, bg), (p.indexed(4), p.indexed(2)));

        let (fg, _) = p.resolve(&cell(Color::Rgb(255, 255, 255), Color::Default, CellFlags::DIM));
        assert!(close(fg, Rgba::new(0.5, 0.5, 0.5, 1.0)));

        let (fg, bg) = p.resolve(&cell(Color::Indexed(1), Color::Indexed(3), CellFlags::HIDDEN));
        assert_eq!(fg, bg);
    }
}
