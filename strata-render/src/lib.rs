//! Grid rendering for Strata.
//!
//! ```text
//! GlyphRasterizer -> FontAtlas ─┐
//!                               ├─> Renderer::prepare(&BufferSnapshot) -> FrameBatch
//!                      Palette ─┘                                              |
//!                                                        GlyphPipeline (feature "gpu")
//! ```
//!
//! A frame is one vertex array and one draw call no matter what the grid
//! holds. Without the `gpu` feature the crate is pure CPU and the host can
//! feed `FrameBatch::vertex_bytes` and `FontAtlas::pixels` to any backend.

pub mod atlas;
pub mod frame;
pub mod palette;
pub mod vertex;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use atlas::{
    AtlasError, CellMetrics, FontAtlas, GlyphBitmap, GlyphRasterizer, GlyphSlot, UvRect,
};
pub use frame::{DrawCall, FrameBatch, RenderStats, Renderer};
pub use palette::{Palette, Rgba};
pub use vertex::{GlyphVertex, VERTICES_PER_QUAD};

#[cfg(feature = "gpu")]
pub use gpu::GlyphPipeline;
