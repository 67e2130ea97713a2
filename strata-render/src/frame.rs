//! Snapshot to vertex batch.
//!
//! Every visible cell owns a fixed run of six vertices, rows are laid out top
//! to bottom, and one trailing quad is reserved for the cursor. The whole
//! frame is therefore a single vertex array drawn with a single call. Rows are
//! regenerated only when their version differs from the one last written.

use std::ops::Range;
use std::sync::Arc;

use strata_core::{BufferSnapshot, Cell};
use tracing::debug;

use crate::atlas::{FontAtlas, UvRect};
use crate::palette::Palette;
use crate::vertex::{quad, GlyphVertex, VERTICES_PER_QUAD};

// ════════════════════════════════════════════════════════════════════
// Frame Batch
// ════════════════════════════════════════════════════════════════════

/// A range of the vertex array to draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawCall {
    pub first_vertex: u32,
    pub vertex_count: u32,
}

/// Output of [`Renderer::prepare`].
#[derive(Debug, Clone, Default)]
pub struct FrameBatch {
    vertices: Vec<GlyphVertex>,
    draw: DrawCall,
    cols: u16,
    rows: u16,
    /// Vertex ranges rewritten by the last `prepare`, sorted and merged.
    dirty: Vec<Range<usize>>,
    generation: u64,
}

impl FrameBatch {
    pub fn vertices(&self) -> &[GlyphVertex] {
        &self.vertices
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Always exactly one entry.
    pub fn draw_calls(&self) -> &[DrawCall] {
        std::slice::from_ref(&self.draw)
    }

    pub fn draw_call(&self) -> DrawCall {
        self.draw
    }

    pub fn dirty_ranges(&self) -> &[Range<usize>] {
        &self.dirty
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    /// Snapshot generation this batch was built from.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub frames: u64,
    /// Rows rewritten across all frames.
    pub rows_rebuilt: u64,
    pub reallocations: u64,
}

// ════════════════════════════════════════════════════════════════════
// Renderer
// ════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct Renderer {
    atlas: Arc<FontAtlas>,
    palette: Palette,
    dirty_tracking: bool,
    /// False until the first full build, and again after anything that
    /// invalidates every vertex.
    primed: bool,
    row_versions: Vec<u64>,
    batch: FrameBatch,
    stats: RenderStats,
}

impl Renderer {
    pub fn new(atlas: Arc<FontAtlas>, palette: Palette) -> Self {
        Self {
            atlas,
            palette,
            dirty_tracking: true,
            primed: false,
            row_versions: Vec::new(),
            batch: FrameBatch::default(),
            stats: RenderStats::default(),
        }
    }

    pub fn atlas(&self) -> &Arc<FontAtlas> {
        &self.atlas
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    /// Colors change everywhere, so the next frame is rebuilt in full.
    pub fn set_palette(&mut self, palette: Palette) {
        self.palette = palette;
        self.primed = false;
    }

    /// With tracking off every `prepare` rebuilds all rows. Output is the
    /// same either way.
    pub fn set_dirty_tracking(&mut self, enabled: bool) {
        self.dirty_tracking = enabled;
    }

    pub fn dirty_tracking(&self) -> bool {
        self.dirty_tracking
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    /// Pixel size of the grid for the current batch dimensions.
    pub fn surface_size(&self) -> (u32, u32) {
        let cell = self.atlas.cell();
        (
            u32::from(self.batch.cols) * cell.width,
            u32::from(self.batch.rows) * cell.height,
        )
    }

    /// Last prepared batch.
    pub fn batch(&self) -> &FrameBatch {
        &self.batch
    }

    pub fn prepare(&mut self, snapshot: &BufferSnapshot) -> &FrameBatch {
        let (cols, rows) = (snapshot.cols, snapshot.rows);
        if cols != self.batch.cols || rows != self.batch.rows || self.batch.vertices.is_empty() {
            self.reallocate(cols, rows);
        }

        let full = !self.primed || !self.dirty_tracking;
        let row_len = cols as usize * VERTICES_PER_QUAD;
        self.batch.dirty.clear();

        let mut rebuilt = 0u64;
        for row in 0..rows as usize {
            let (cells, version) = snapshot
                .lines
                .get(row)
                .map_or((&[][..], 0), |line| (line.cells(), line.version()));
            if !full && self.row_versions[row] == version {
                continue;
            }
            let range = row * row_len..(row + 1) * row_len;
            write_row(
                &mut self.batch.vertices[range.clone()],
                cells,
                row,
                &self.atlas,
                &self.palette,
            );
            self.row_versions[row] = version;
            push_merged(&mut self.batch.dirty, range);
            rebuilt += 1;
        }

        let cursor_start = rows as usize * row_len;
        let cursor_range = cursor_start..cursor_start + VERTICES_PER_QUAD;
        write_cursor(
            &mut self.batch.vertices[cursor_range.clone()],
            snapshot,
            &self.atlas,
            &self.palette,
        );
        push_merged(&mut self.batch.dirty, cursor_range);

        self.batch.generation = snapshot.generation;
        self.primed = true;
        self.stats.frames += 1;
        self.stats.rows_rebuilt += rebuilt;
        &self.batch
    }

    fn reallocate(&mut self, cols: u16, rows: u16) {
        let quads = cols as usize * rows as usize + 1;
        let vertex_count = quads * VERTICES_PER_QUAD;
        debug!(cols, rows, vertex_count, "frame batch reallocated");

        self.batch.vertices = vec![GlyphVertex::default(); vertex_count];
        self.batch.cols = cols;
        self.batch.rows = rows;
        self.batch.draw = DrawCall {
            first_vertex: 0,
            vertex_count: vertex_count as u32,
        };
        self.row_versions = vec![0; rows as usize];
        self.primed = false;
        self.stats.reallocations += 1;
    }
}

fn push_merged(ranges: &mut Vec<Range<usize>>, range: Range<usize>) {
    match ranges.last_mut() {
        Some(last) if last.end == range.start => last.end = range.end,
        _ => ranges.push(range),
    }
}

fn cell_origin(atlas: &FontAtlas, col: usize, row: usize) -> (f32, f32, f32, f32) {
    let cell = atlas.cell();
    let (w, h) = (cell.width as f32, cell.height as f32);
    let x0 = col as f32 * w;
    let y0 = row as f32 * h;
    (x0, y0, x0 + w, y0 + h)
}

/// UVs for one cell. A wide glyph spans its lead cell and the spacer that
/// follows, each showing its half of the slot.
fn cell_uv(atlas: &FontAtlas, cells: &[Cell], col: usize) -> UvRect {
    let cell = &cells[col];
    if cell.is_spacer() {
        return match col.checked_sub(1).map(|prev| &cells[prev]) {
            Some(lead) if lead.is_wide() => {
                let slot = atlas.slot(lead.ch);
                if slot.wide {
                    slot.uv.right_half()
                } else {
                    atlas.blank().uv
                }
            }
            _ => atlas.blank().uv,
        };
    }
    let slot = atlas.slot(cell.ch);
    if slot.wide {
        slot.uv.left_half()
    } else {
        slot.uv
    }
}

fn write_row(
    out: &mut [GlyphVertex],
    cells: &[Cell],
    row: usize,
    atlas: &FontAtlas,
    palette: &Palette,
) {
    let blank = Cell::default();
    for (col, chunk) in out.chunks_exact_mut(VERTICES_PER_QUAD).enumerate() {
        let (x0, y0, x1, y1) = cell_origin(atlas, col, row);
        let (uv, cell) = match cells.get(col) {
            Some(cell) => (cell_uv(atlas, cells, col), cell),
            None => (atlas.blank().uv, &blank),
        };
        let (fg, bg) = palette.resolve(cell);
        chunk.copy_from_slice(&quad(x0, y0, x1, y1, uv, fg, bg));
    }
}

/// Block cursor: the glyph under it drawn in the background color on the
/// cursor color. Hidden or out-of-range cursors collapse to a zero-area quad.
fn write_cursor(
    out: &mut [GlyphVertex],
    snapshot: &BufferSnapshot,
    atlas: &FontAtlas,
    palette: &Palette,
) {
    let (col, row) = (snapshot.cursor.col as usize, snapshot.cursor.row as usize);
    let in_bounds = col < snapshot.cols as usize && row < snapshot.rows as usize;
    if !snapshot.cursor_visible || !in_bounds {
        out.fill(GlyphVertex::default());
        return;
    }

    let cells = snapshot.lines.get(row).map_or(&[][..], |line| line.cells());
    let (uv, under) = match cells.get(col) {
        Some(cell) => (cell_uv(atlas, cells, col), palette.resolve(cell).1),
        None => (atlas.blank().uv, palette.background),
    };
    let (x0, y0, x1, y1) = cell_origin(atlas, col, row);
    out.copy_from_slice(&quad(x0, y0, x1, y1, uv, under, palette.cursor));
}
