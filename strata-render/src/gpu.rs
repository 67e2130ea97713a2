//! wgpu pipeline for [`FrameBatch`]es.
//!
//! The atlas is uploaded once as an R8 texture. The batch lives in one
//! persistent vertex buffer that only grows; each upload writes just the
//! ranges the last `prepare` touched. Drawing is a single `draw` into a render
//! pass owned by the host.

use wgpu::util::DeviceExt;
use wgpu::{Buffer, BufferUsages, Device, Queue, RenderPass, RenderPipeline, TextureFormat};

use crate::atlas::FontAtlas;
use crate::frame::{DrawCall, FrameBatch};
use crate::vertex::GlyphVertex;

// ════════════════════════════════════════════════════════════════════
// Vertex Layout
// ════════════════════════════════════════════════════════════════════

impl GlyphVertex {
    const ATTRIBS: [wgpu::VertexAttribute; 4] =
        wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2, 2 => Float32x4, 3 => Float32x4];

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBS,
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct Globals {
    resolution: [f32; 2],
    _pad: [f32; 2],
}

// ════════════════════════════════════════════════════════════════════
// Pipeline
// ════════════════════════════════════════════════════════════════════

pub struct GlyphPipeline {
    pipeline: RenderPipeline,
    globals_buffer: Buffer,
    bind_group: wgpu::BindGroup,
    vertex_buffer: Buffer,
    /// Bytes allocated in `vertex_buffer`.
    capacity: u64,
    /// Bytes of valid vertex data after the last upload.
    used: u64,
    draw: DrawCall,
}

impl GlyphPipeline {
    pub fn new(device: &Device, queue: &Queue, format: TextureFormat, atlas: &FontAtlas) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("glyph.wgsl"),
            source: wgpu::ShaderSource::Wgsl(include_str!("glyph.wgsl").into()),
        });

        let size = wgpu::Extent3d {
            width: atlas.width(),
            height: atlas.height(),
            depth_or_array_layers: 1,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("glyph-atlas"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TextureFormat::R8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            atlas.pixels(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(atlas.width()),
                rows_per_image: Some(atlas.height()),
            },
            size,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        // Cells map texels 1:1, so no filtering.
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("glyph-sampler"),
            ..Default::default()
        });

        let globals_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("glyph-globals"),
            contents: bytemuck::bytes_of(&Globals {
                resolution: [1.0, 1.0],
                _pad: [0.0; 2],
            }),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        });

        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("glyph-bgl"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::VERTEX,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
            });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("glyph-bg"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: globals_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("glyph-pl"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("glyph-pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[GlyphVertex::layout()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            cache: None,
            multiview_mask: None,
        });

        let capacity = initial_capacity();
        let vertex_buffer = create_vertex_buffer(device, capacity);

        tracing::debug!(
            atlas_width = atlas.width(),
            atlas_height = atlas.height(),
            ?format,
            "glyph pipeline created"
        );

        Self {
            pipeline,
            globals_buffer,
            bind_group,
            vertex_buffer,
            capacity,
            used: 0,
            draw: DrawCall::default(),
        }
    }

    /// Copy the batch to the GPU. `viewport` is the render target size in
    /// pixels. A buffer that is too small is replaced and filled in full;
    /// otherwise only the batch's dirty ranges are written.
    pub fn upload(&mut self, device: &Device, queue: &Queue, batch: &FrameBatch, viewport: [u32; 2]) {
        let globals = Globals {
            resolution: [viewport[0].max(1) as f32, viewport[1].max(1) as f32],
            _pad: [0.0; 2],
        };
        queue.write_buffer(&self.globals_buffer, 0, bytemuck::bytes_of(&globals));

        let bytes = batch.vertex_bytes();
        let needed = bytes.len() as u64;
        if needed > self.capacity {
            self.capacity = needed.next_power_of_two();
            self.vertex_buffer = create_vertex_buffer(device, self.capacity);
            tracing::debug!(capacity = self.capacity, "glyph vertex buffer grown");
            queue.write_buffer(&self.vertex_buffer, 0, bytes);
        } else {
            let stride = std::mem::size_of::<GlyphVertex>();
            for range in batch.dirty_ranges() {
                let slice = &bytes[range.start * stride..range.end * stride];
                queue.write_buffer(&self.vertex_buffer, (range.start * stride) as u64, slice);
            }
        }

        self.used = needed;
        self.draw = batch.draw_call();
    }

    /// Record the frame into `pass`: one pipeline, one bind group, one draw.
    pub fn render(&self, pass: &mut RenderPass<'_>) {
        if self.draw.vertex_count == 0 || self.used == 0 {
            return;
        }
        let first = self.draw.first_vertex;
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.set_vertex_buffer(0, self.vertex_buffer.slice(..self.used));
        pass.draw(first..first + self.draw.vertex_count, 0..1);
    }
}

/// Room for an 80x24 grid before the first grow.
fn initial_capacity() -> u64 {
    let vertices = (80 * 24 + 1) * crate::vertex::VERTICES_PER_QUAD;
    ((vertices * std::mem::size_of::<GlyphVertex>()) as u64).next_power_of_two()
}

fn create_vertex_buffer(device: &Device, size: u64) -> Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("glyph-vb"),
        size,
        usage: BufferUsages::VERTEX | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}
