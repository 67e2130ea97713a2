use crate::atlas::UvRect;
use crate::palette::Rgba;

pub const VERTICES_PER_QUAD: usize = 6;

/// One corner of a cell quad. Positions are in pixels from the top-left of
/// the grid; the shader mixes `bg` and `fg` by atlas coverage.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GlyphVertex {
    pub pos: [f32; 2],
    pub uv: [f32; 2],
    pub fg: [f32; 4],
    pub bg: [f32; 4],
}

/// Two triangles covering `(x0, y0)..(x1, y1)`.
pub fn quad(
    x0: f32,
    y0: f32,
    x1: f32,
    y1: f32,
    uv: UvRect,
    fg: Rgba,
    bg: Rgba,
) -> [GlyphVertex; VERTICES_PER_QUAD] {
    let fg = fg.to_array();
    let bg = bg.to_array();
    let v = |x, y, u, v| GlyphVertex {
        pos: [x, y],
        uv: [u, v],
        fg,
        bg,
    };
    [
        v(x0, y0, uv.u0, uv.v0),
        v(x1, y0, uv.u1, uv.v0),
        v(x0, y1, uv.u0, uv.v1),
        v(x1, y0, uv.u1, uv.v0),
        v(x1, y1, uv.u1, uv.v1),
        v(x0, y1, uv.u0, uv.v1),
    ]
}
