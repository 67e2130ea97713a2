//! Font atlas: every glyph of the set in one R8 coverage texture.
//!
//! Slots are one cell (two for wide glyphs) and are packed left to right on
//! shelves one cell tall. Slot 0 is always the blank glyph. The atlas never
//! changes after `build`; share it between renderers with an `Arc`.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::debug;
use unicode_width::UnicodeWidthChar;

/// wgpu's default `max_texture_dimension_2d`.
pub const DEFAULT_MAX_DIMENSION: u32 = 8192;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellMetrics {
    pub width: u32,
    pub height: u32,
    /// Size requested from the rasterizer.
    pub font_px: f32,
}

impl CellMetrics {
    pub fn new(width: u32, height: u32, font_px: f32) -> Self {
        Self {
            width,
            height,
            font_px,
        }
    }
}

/// Coverage bitmap for one glyph, positioned inside its cell box.
/// Anything beyond the slot is clipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphBitmap {
    pub width: u32,
    pub height: u32,
    /// Row-major, `width * height` bytes.
    pub coverage: Vec<u8>,
}

/// Source of glyph bitmaps. `None` means the font has no such glyph.
pub trait GlyphRasterizer {
    fn rasterize(&self, ch: char, px_height: f32) -> Option<GlyphBitmap>;
}

impl<F> GlyphRasterizer for F
where
    F: Fn(char, f32) -> Option<GlyphBitmap>,
{
    fn rasterize(&self, ch: char, px_height: f32) -> Option<GlyphBitmap> {
        self(ch, px_height)
    }
}

/// Normalized texture rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UvRect {
    pub u0: f32,
    pub v0: f32,
    pub u1: f32,
    pub v1: f32,
}

impl UvRect {
    pub fn left_half(&self) -> Self {
        Self {
            u1: (self.u0 + self.u1) / 2.0,
            ..*self
        }
    }

    pub fn right_half(&self) -> Self {
        Self {
            u0: (self.u0 + self.u1) / 2.0,
            ..*self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphSlot {
    /// Top-left corner in texels.
    pub x: u32,
    pub y: u32,
    pub wide: bool,
    pub uv: UvRect,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AtlasError {
    #[error("cell size must be non-zero, got {width}x{height}")]
    EmptyCell { width: u32, height: u32 },

    #[error("atlas needs {width}x{height} texels, limit is {max}")]
    TooLarge { width: u32, height: u32, max: u32 },
}

#[derive(Debug)]
pub struct FontAtlas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    cell: CellMetrics,
    slots: Vec<GlyphSlot>,
    index: HashMap<char, u32>,
    fallback: u32,
}

impl FontAtlas {
    pub fn build<R>(
        rasterizer: &R,
        glyphs: impl IntoIterator<Item = char>,
        cell: CellMetrics,
    ) -> Result<Self, AtlasError>
    where
        R: GlyphRasterizer + ?Sized,
    {
        Self::build_with_limit(rasterizer, glyphs, cell, DEFAULT_MAX_DIMENSION)
    }

    /// Like [`FontAtlas::build`] with an explicit texture side limit.
    pub fn build_with_limit<R>(
        rasterizer: &R,
        glyphs: impl IntoIterator<Item = char>,
        cell: CellMetrics,
        max_dimension: u32,
    ) -> Result<Self, AtlasError>
    where
        R: GlyphRasterizer + ?Sized,
    {
        if cell.width == 0 || cell.height == 0 {
            return Err(AtlasError::EmptyCell {
                width: cell.width,
                height: cell.height,
            });
        }

        let mut entries: Vec<(char, bool, GlyphBitmap)> = Vec::new();
        let mut seen = HashSet::new();
        let mut missing = 0usize;
        for ch in glyphs {
            if ch == ' ' || !seen.insert(ch) {
                continue;
            }
            let wide = match ch.width() {
                Some(1) => false,
                Some(2) => true,
                _ => continue,
            };
            match rasterizer.rasterize(ch, cell.font_px) {
                Some(bitmap) => entries.push((ch, wide, bitmap)),
                None => missing += 1,
            }
        }

        let units: u32 = 1 + entries
            .iter()
            .map(|(_, wide, _)| if *wide { 2 } else { 1 })
            .sum::<u32>();
        let max_cols = max_dimension / cell.width;
        if max_cols < 2 {
            return Err(AtlasError::TooLarge {
                width: cell.width.saturating_mul(2),
                height: cell.height,
                max: max_dimension,
            });
        }
        let per_row = (f64::from(units).sqrt().ceil() as u32).clamp(2, max_cols);
        let width = per_row * cell.width;

        // Shelf placement in cell units; slot 0 (blank) sits at the origin.
        let mut placed = Vec::with_capacity(entries.len());
        let (mut col, mut row) = (1u32, 0u32);
        for (_, wide, _) in &entries {
            let span = if *wide { 2 } else { 1 };
            if col + span > per_row {
                row += 1;
                col = 0;
            }
            placed.push((col, row));
            col += span;
        }
        let height = (row + 1).saturating_mul(cell.height);
        if height > max_dimension {
            return Err(AtlasError::TooLarge {
                width,
                height,
                max: max_dimension,
            });
        }

        let mut atlas = Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
            cell,
            slots: Vec::with_capacity(entries.len() + 1),
            index: HashMap::with_capacity(entries.len()),
            fallback: 0,
        };
        atlas.slots.push(atlas.make_slot(0, 0, false));

        for ((ch, wide, bitmap), (col, row)) in entries.iter().zip(placed) {
            let slot = atlas.make_slot(col * cell.width, row * cell.height, *wide);
            atlas.blit(&slot, bitmap);
            atlas.index.insert(*ch, atlas.slots.len() as u32);
            atlas.slots.push(slot);
        }
        atlas.fallback = atlas.index.get(&'?').copied().unwrap_or(0);

        debug!(
            glyphs = atlas.slots.len(),
            missing,
            width,
            height,
            "font atlas built"
        );
        Ok(atlas)
    }

    fn make_slot(&self, x: u32, y: u32, wide: bool) -> GlyphSlot {
        let span = if wide { 2 } else { 1 };
        let (w, h) = (self.width as f32, self.height as f32);
        GlyphSlot {
            x,
            y,
            wide,
            uv: UvRect {
                u0: x as f32 / w,
                v0: y as f32 / h,
                u1: (x + span * self.cell.width) as f32 / w,
                v1: (y + self.cell.height) as f32 / h,
            },
        }
    }

    fn blit(&mut self, slot: &GlyphSlot, bitmap: &GlyphBitmap) {
        let span = if slot.wide { 2 } else { 1 };
        let cols = bitmap.width.min(span * self.cell.width) as usize;
        let rows = bitmap.height.min(self.cell.height) as usize;
        let stride = self.width as usize;
        for y in 0..rows {
            let src_start = y * bitmap.width as usize;
            let Some(src) = bitmap.coverage.get(src_start..src_start + cols) else {
                break;
            };
            let dst_start = (slot.y as usize + y) * stride + slot.x as usize;
            self.pixels[dst_start..dst_start + cols].copy_from_slice(src);
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// R8 texels, row-major, `width * height` bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn cell(&self) -> CellMetrics {
        self.cell
    }

    /// Number of slots, the blank one included.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn contains(&self, ch: char) -> bool {
        self.index.contains_key(&ch)
    }

    pub fn blank(&self) -> GlyphSlot {
        self.slots[0]
    }

    /// Slot for `ch`. Glyphs outside the set map to `?`, or to blank when
    /// the set has no `?` either.
    pub fn slot(&self, ch: char) -> GlyphSlot {
        if ch == ' ' {
            return self.slots[0];
        }
        let idx = self.index.get(&ch).copied().unwrap_or(self.fallback);
        self.slots[idx as usize]
    }
}
