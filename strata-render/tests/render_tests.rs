use std::sync::Arc;

use proptest::prelude::*;
use strata_core::term::ByteDecoder;
use strata_core::{BufferSnapshot, TerminalBuffer};
use strata_render::{
    AtlasError, CellMetrics, FontAtlas, GlyphBitmap, GlyphVertex, Palette, Renderer,
    VERTICES_PER_QUAD,
};

const CELL: CellMetrics = CellMetrics {
    width: 8,
    height: 16,
    font_px: 14.0,
};

/// Fills the whole glyph box with a coverage value derived from the char.
fn solid(ch: char, _px: f32) -> Option<GlyphBitmap> {
    let width = if ch.is_ascii() { CELL.width } else { CELL.width * 2 };
    Some(GlyphBitmap {
        width,
        height: CELL.height,
        coverage: vec![coverage_of(ch); (width * CELL.height) as usize],
    })
}

fn coverage_of(ch: char) -> u8 {
    (ch as u32 % 200) as u8 + 50
}

fn printable_ascii() -> impl Iterator<Item = char> {
    (' '..='~').chain(['中', '文'])
}

fn atlas() -> Arc<FontAtlas> {
    Arc::new(FontAtlas::build(&solid, printable_ascii(), CELL).unwrap())
}

fn snapshot(cols: u16, rows: u16, bytes: &[u8]) -> (TerminalBuffer, BufferSnapshot) {
    let mut buf = TerminalBuffer::new(cols, rows, 100);
    feed(&mut buf, bytes);
    let snap = buf.snapshot();
    (buf, snap)
}

fn feed(buf: &mut TerminalBuffer, bytes: &[u8]) {
    for event in ByteDecoder::new().decode(bytes) {
        buf.apply(&event);
    }
}

fn cell_quad(vertices: &[GlyphVertex], cols: u16, col: usize, row: usize) -> &[GlyphVertex] {
    let start = (row * cols as usize + col) * VERTICES_PER_QUAD;
    &vertices[start..start + VERTICES_PER_QUAD]
}

fn cursor_quad(vertices: &[GlyphVertex]) -> &[GlyphVertex] {
    &vertices[vertices.len() - VERTICES_PER_QUAD..]
}

// ============================================================================
// FontAtlas Tests
// ============================================================================

#[test]
fn test_atlas_blank_slot_at_origin() {
    let atlas = atlas();
    let blank = atlas.blank();
    assert_eq!((blank.x, blank.y), (0, 0));
    assert_eq!(atlas.slot(' '), blank);
    assert!(!atlas.contains(' '));

    let stride = atlas.width() as usize;
    for y in 0..CELL.height as usize {
        let row = &atlas.pixels()[y * stride..y * stride + CELL.width as usize];
        assert!(row.iter().all(|&p| p == 0));
    }
}

#[test]
fn test_atlas_ascii_slots_do_not_overlap() {
    let atlas = FontAtlas::build(&solid, ' '..='~', CELL).unwrap();
    // 94 printable glyphs plus the blank slot.
    assert_eq!(atlas.slot_count(), 95);

    let mut rects: Vec<(u32, u32)> = vec![(0, 0)];
    for ch in '!'..='~' {
        let slot = atlas.slot(ch);
        assert!(!slot.wide);
        assert!(slot.x + CELL.width <= atlas.width());
        assert!(slot.y + CELL.height <= atlas.height());
        rects.push((slot.x, slot.y));
    }
    let mut unique = rects.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), rects.len());
    assert!(rects.iter().all(|(x, y)| x % CELL.width == 0 && y % CELL.height == 0));
}

#[test]
fn test_atlas_duplicates_collapse() {
    let atlas = FontAtlas::build(&solid, "aaab".chars(), CELL).unwrap();
    assert_eq!(atlas.slot_count(), 3);
}

#[test]
fn test_atlas_wide_slot_spans_two_cells() {
    let atlas = atlas();
    let slot = atlas.slot('中');
    assert!(slot.wide);
    let texels = (slot.uv.u1 - slot.uv.u0) * atlas.width() as f32;
    assert!((texels - 2.0 * CELL.width as f32).abs() < 1e-3);

    let left = slot.uv.left_half();
    let right = slot.uv.right_half();
    assert_eq!(left.u0, slot.uv.u0);
    assert_eq!(right.u1, slot.uv.u1);
    assert_eq!(left.u1, right.u0);
}

#[test]
fn test_atlas_bitmap_copied_into_slot() {
    let atlas = atlas();
    let slot = atlas.slot('A');
    let stride = atlas.width() as usize;
    let at = |x: u32, y: u32| atlas.pixels()[(slot.y + y) as usize * stride + (slot.x + x) as usize];
    assert_eq!(at(0, 0), coverage_of('A'));
    assert_eq!(at(CELL.width - 1, CELL.height - 1), coverage_of('A'));
}

#[test]
fn test_atlas_oversized_bitmap_is_clipped() {
    let big = |_ch: char, _px: f32| {
        Some(GlyphBitmap {
            width: 64,
            height: 64,
            coverage: vec![255; 64 * 64],
        })
    };
    let atlas = FontAtlas::build(&big, "ab".chars(), CELL).unwrap();
    let a = atlas.slot('a');
    let b = atlas.slot('b');
    assert_ne!((a.x, a.y), (b.x, b.y));
    // The blank slot was not painted over.
    assert_eq!(atlas.pixels()[0], 0);
}

#[test]
fn test_atlas_unknown_glyph_falls_back_to_question_mark() {
    let atlas = FontAtlas::build(&solid, "ab?".chars(), CELL).unwrap();
    assert_eq!(atlas.slot('z'), atlas.slot('?'));

    let atlas = FontAtlas::build(&solid, "ab".chars(), CELL).unwrap();
    assert_eq!(atlas.slot('z'), atlas.blank());
}

#[test]
fn test_atlas_missing_glyph_from_rasterizer() {
    let partial = |ch: char, px: f32| if ch == 'b' { None } else { solid(ch, px) };
    let atlas = FontAtlas::build(&partial, "ab?".chars(), CELL).unwrap();
    assert!(atlas.contains('a'));
    assert!(!atlas.contains('b'));
    assert_eq!(atlas.slot('b'), atlas.slot('?'));
}

#[test]
fn test_atlas_zero_width_chars_skipped() {
    let atlas = FontAtlas::build(&solid, ['a', '\u{301}', '\u{200b}'], CELL).unwrap();
    assert_eq!(atlas.slot_count(), 2);
}

#[test]
fn test_atlas_too_large() {
    let err = FontAtlas::build_with_limit(&solid, ' '..='~', CELL, 16).unwrap_err();
    assert!(matches!(err, AtlasError::TooLarge { max: 16, .. }), "got {err:?}");

    let err = FontAtlas::build_with_limit(&solid, "a".chars(), CELL, 8).unwrap_err();
    assert!(matches!(err, AtlasError::TooLarge { .. }));
}

#[test]
fn test_atlas_empty_cell() {
    let cell = CellMetrics::new(0, 16, 14.0);
    let err = FontAtlas::build(&solid, "a".chars(), cell).unwrap_err();
    assert_eq!(err, AtlasError::EmptyCell { width: 0, height: 16 });
}

// ============================================================================
// Renderer Tests
// ============================================================================

#[test]
fn test_one_draw_call_for_standard_sizes() {
    for (cols, rows) in [(80u16, 24u16), (200, 60)] {
        let (_, snap) = snapshot(cols, rows, b"hello\r\nworld");
        let mut renderer = Renderer::new(atlas(), Palette::default());
        let batch = renderer.prepare(&snap);

        let expected = (cols as usize * rows as usize + 1) * VERTICES_PER_QUAD;
        assert_eq!(batch.draw_calls().len(), 1);
        assert_eq!(batch.draw_call().first_vertex, 0);
        assert_eq!(batch.draw_call().vertex_count as usize, expected);
        assert_eq!(batch.vertices().len(), expected);
        assert_eq!(
            batch.vertex_bytes().len(),
            expected * std::mem::size_of::<GlyphVertex>()
        );
        assert_eq!(renderer.surface_size(), (cols as u32 * 8, rows as u32 * 16));
    }
}

#[test]
fn test_cells_carry_glyph_uv_and_colors() {
    let atlas = atlas();
    let palette = Palette::default();
    let (_, snap) = snapshot(10, 3, b"h\x1b[31mi");
    let mut renderer = Renderer::new(atlas.clone(), palette.clone());
    let batch = renderer.prepare(&snap);

    let h = cell_quad(batch.vertices(), 10, 0, 0);
    let uv = atlas.slot('h').uv;
    assert_eq!(h[0].pos, [0.0, 0.0]);
    assert_eq!(h[4].pos, [8.0, 16.0]);
    assert_eq!(h[0].uv, [uv.u0, uv.v0]);
    assert_eq!(h[4].uv, [uv.u1, uv.v1]);
    assert_eq!(h[0].fg, palette.foreground.to_array());
    assert_eq!(h[0].bg, palette.background.to_array());

    let i = cell_quad(batch.vertices(), 10, 1, 0);
    assert_eq!(i[0].fg, palette.indexed(1).to_array());
    assert_eq!(i[0].pos, [8.0, 0.0]);

    // Untouched cells use the blank slot.
    let empty = cell_quad(batch.vertices(), 10, 5, 2);
    let blank = atlas.blank().uv;
    assert_eq!(empty[0].uv, [blank.u0, blank.v0]);
    assert_eq!(empty[0].pos, [40.0, 32.0]);
}

#[test]
fn test_wide_glyph_split_across_cells() {
    let atlas = atlas();
    let (_, snap) = snapshot(10, 2, "中".as_bytes());
    let mut renderer = Renderer::new(atlas.clone(), Palette::default());
    let batch = renderer.prepare(&snap);

    let slot = atlas.slot('中').uv;
    let lead = cell_quad(batch.vertices(), 10, 0, 0);
    let spacer = cell_quad(batch.vertices(), 10, 1, 0);
    assert_eq!(lead[0].uv[0], slot.left_half().u0);
    assert_eq!(lead[4].uv[0], slot.left_half().u1);
    assert_eq!(spacer[0].uv[0], slot.right_half().u0);
    assert_eq!(spacer[4].uv[0], slot.right_half().u1);
    assert_eq!(lead[0].fg, spacer[0].fg);
}

#[test]
fn test_only_changed_rows_rebuilt() {
    let (mut buf, snap) = snapshot(20, 5, b"one\r\ntwo");
    let mut renderer = Renderer::new(atlas(), Palette::default());
    renderer.prepare(&snap);
    assert_eq!(renderer.stats().rows_rebuilt, 5);

    // Same snapshot again: only the cursor quad is rewritten.
    let batch = renderer.prepare(&snap);
    let cursor_start = 20 * 5 * VERTICES_PER_QUAD;
    assert_eq!(batch.dirty_ranges(), &[cursor_start..cursor_start + VERTICES_PER_QUAD]);
    assert_eq!(renderer.stats().rows_rebuilt, 5);

    feed(&mut buf, b"\x1b[4;1Hfour");
    renderer.prepare(&buf.snapshot());
    assert_eq!(renderer.stats().rows_rebuilt, 6);
    assert_eq!(renderer.stats().frames, 3);
    let row_len = 20 * VERTICES_PER_QUAD;
    assert_eq!(
        renderer.batch().dirty_ranges()[0],
        3 * row_len..4 * row_len
    );
}

#[test]
fn test_full_rebuild_matches_incremental() {
    let atlas = atlas();
    let mut incremental = Renderer::new(atlas.clone(), Palette::default());
    let mut full = Renderer::new(atlas, Palette::default());
    full.set_dirty_tracking(false);
    assert!(!full.dirty_tracking());

    let mut buf = TerminalBuffer::new(12, 4, 50);
    let steps: [&[u8]; 6] = [
        b"abc\r\ndef",
        b"\x1b[1;7mINV\x1b[0m",
        b"\r\n\r\n\r\nscrolled",
        "中文".as_bytes(),
        b"\x1b[?1049hALT",
        b"\x1b[?1049l\x1b[2J",
    ];
    for step in steps {
        feed(&mut buf, step);
        let snap = buf.snapshot();
        let a = incremental.prepare(&snap).vertices().to_vec();
        let b = full.prepare(&snap).vertices().to_vec();
        assert_eq!(a, b);
    }
    assert!(incremental.stats().rows_rebuilt < full.stats().rows_rebuilt);
}

#[test]
fn test_resize_reallocates() {
    let mut buf = TerminalBuffer::new(10, 4, 50);
    feed(&mut buf, b"hi");
    let mut renderer = Renderer::new(atlas(), Palette::default());
    renderer.prepare(&buf.snapshot());
    renderer.prepare(&buf.snapshot());
    assert_eq!(renderer.stats().reallocations, 1);

    buf.resize(30, 8);
    let batch = renderer.prepare(&buf.snapshot());
    assert_eq!((batch.cols(), batch.rows()), (30, 8));
    assert_eq!(batch.vertices().len(), (30 * 8 + 1) * VERTICES_PER_QUAD);
    assert_eq!(batch.dirty_ranges(), &[0..batch.vertices().len()]);
    assert_eq!(renderer.stats().reallocations, 2);
}

#[test]
fn test_palette_change_rebuilds_everything() {
    let (_, snap) = snapshot(10, 3, b"x");
    let mut renderer = Renderer::new(atlas(), Palette::default());
    renderer.prepare(&snap);

    let mut palette = Palette::default();
    palette.foreground = strata_render::Rgba::new(1.0, 0.0, 0.0, 1.0);
    renderer.set_palette(palette);
    let batch = renderer.prepare(&snap);
    assert_eq!(batch.dirty_ranges().len(), 1);
    assert_eq!(cell_quad(batch.vertices(), 10, 0, 0)[0].fg, [1.0, 0.0, 0.0, 1.0]);
}

#[test]
fn test_cursor_quad_visibility() {
    let palette = Palette::default();
    let (mut buf, snap) = snapshot(10, 3, b"ab");
    let mut renderer = Renderer::new(atlas(), palette.clone());

    let cursor = cursor_quad(renderer.prepare(&snap).vertices()).to_vec();
    assert_eq!(cursor[0].pos, [16.0, 0.0]);
    assert_eq!(cursor[0].bg, palette.cursor.to_array());

    feed(&mut buf, b"\x1b[?25l");
    let cursor = cursor_quad(renderer.prepare(&buf.snapshot()).vertices()).to_vec();
    assert!(cursor.iter().all(|v| *v == GlyphVertex::default()));
}

#[test]
fn test_batch_tracks_snapshot_generation() {
    let (buf, snap) = snapshot(10, 3, b"abc");
    let mut renderer = Renderer::new(atlas(), Palette::default());
    let batch = renderer.prepare(&snap);
    assert_eq!(batch.generation(), buf.generation());
}

// ============================================================================
// Property Tests
// ============================================================================

fn chunk() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        "[a-z ]{1,12}".prop_map(String::into_bytes),
        Just(b"\r\n".to_vec()),
        Just("中".as_bytes().to_vec()),
        Just(b"\x1b[2J".to_vec()),
        Just(b"\x1b[K".to_vec()),
        Just(b"\x1b[H".to_vec()),
        Just(b"\x1b[3;5H".to_vec()),
        Just(b"\x1b[L".to_vec()),
        Just(b"\x1b[2M".to_vec()),
        Just(b"\x1b[S".to_vec()),
        Just(b"\x1b[T".to_vec()),
        Just(b"\x1b[1;32;44m".to_vec()),
        Just(b"\x1b[0m".to_vec()),
        Just(b"\x1b[?1049h".to_vec()),
        Just(b"\x1b[?1049l".to_vec()),
        Just(b"\x1b[?25l".to_vec()),
        Just(b"\x1b[?25h".to_vec()),
        Just(b"\x1bc".to_vec()),
    ]
}

proptest! {
    #[test]
    fn prop_dirty_tracking_matches_full_rebuild(chunks in prop::collection::vec(chunk(), 1..30)) {
        let atlas = atlas();
        let mut incremental = Renderer::new(atlas.clone(), Palette::default());
        let mut full = Renderer::new(atlas, Palette::default());
        full.set_dirty_tracking(false);

        let mut buf = TerminalBuffer::new(16, 6, 20);
        for bytes in &chunks {
            feed(&mut buf, bytes);
            let snap = buf.snapshot();
            let a = incremental.prepare(&snap).vertices().to_vec();
            let b = full.prepare(&snap).vertices().to_vec();
            prop_assert_eq!(a, b);
        }
    }
}
