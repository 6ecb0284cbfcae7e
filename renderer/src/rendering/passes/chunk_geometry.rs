use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::rendering::{
    chunk_buffers::WorldBuffers,
    texture::RenderTargets,
    util::bind_group_builder::BindGroupBuilder,
};

/// Per-frame uniforms shared by the chunk shaders and the selection
/// overlay.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct FrameUniforms {
    pub projection: Mat4,
    pub view: Mat4,
    pub ambient_light: [f32; 3],
    pub fog_density: f32,
    pub fog_color: [f32; 3],
    pub z_near: f32,
    pub z_far: f32,
    pub _padding: [f32; 3],
}

/// Per-draw values pushed for every chunk: the player-relative model
/// position (subtracted in f64 before the cast so distant chunks keep
/// their precision), the octant visibility mask, the voxel size and the
/// chunk-descriptor slot.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct ChunkPushConstants {
    pub model_position: [f32; 3],
    pub visibility_mask: u32,
    pub voxel_size: u32,
    pub chunk_data_index: u32,
    pub _padding: [u32; 2],
}

/// One chunk draw: the push constants plus the face run in the face slab.
pub struct ChunkDraw {
    pub push: ChunkPushConstants,
    pub start: u32,
    pub count: u32,
}

/// The opaque, voxel-model and transparent chunk passes. All three share
/// the camera and world bind groups and the generated quad index buffer;
/// faces are expanded to four vertices in the vertex shader, addressed by
/// `base_vertex = allocation.start * 4`.
pub struct ChunkGeometryPass {
    opaque_pipeline: wgpu::RenderPipeline,
    voxel_pipeline: wgpu::RenderPipeline,
    transparent_pipeline: wgpu::RenderPipeline,
    pub frame_uniforms: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    world_bind_group: wgpu::BindGroup,
    textures_bind_group: wgpu::BindGroup,
    index_buffer: wgpu::Buffer,
    index_capacity_faces: u32,
}

impl ChunkGeometryPass {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        buffers: &WorldBuffers,
        opaque_shader: &wgpu::ShaderModule,
        voxel_shader: &wgpu::ShaderModule,
        transparent_shader: &wgpu::ShaderModule,
        texture_array: &wgpu::TextureView,
        texture_sampler: &wgpu::Sampler,
    ) -> Self {
        let frame_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Frame uniform buffer"),
            size: size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let (camera_layout, camera_bind_group) = BindGroupBuilder::new(
            "chunk camera",
            wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
        )
        .uniform(
            0,
            "Frame uniform buffer",
            wgpu::BindingResource::Buffer(frame_uniforms.as_entire_buffer_binding()),
        )
        .build(device);

        let (world_layout, world_bind_group) = Self::build_world_bind_group(device, buffers);

        let (textures_layout, textures_bind_group) =
            BindGroupBuilder::new("chunk textures", wgpu::ShaderStages::FRAGMENT)
                .array_texture(
                    0,
                    "Block texture array",
                    wgpu::BindingResource::TextureView(texture_array),
                    wgpu::TextureSampleType::Float { filterable: true },
                )
                .sampler(
                    1,
                    "Block texture sampler",
                    wgpu::BindingResource::Sampler(texture_sampler),
                    wgpu::SamplerBindingType::Filtering,
                )
                .build(device);

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Chunk pipeline layout"),
            bind_group_layouts: &[&camera_layout, &world_layout, &textures_layout],
            push_constant_ranges: &[wgpu::PushConstantRange {
                stages: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                range: 0..size_of::<ChunkPushConstants>() as u32,
            }],
        });

        let geometry_targets = [
            Some(wgpu::ColorTargetState {
                format: RenderTargets::COLOR_FORMAT,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            }),
            Some(wgpu::ColorTargetState {
                format: RenderTargets::FRAGMENT_DATA_FORMAT,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            }),
        ];

        let opaque_pipeline = create_chunk_pipeline(
            device,
            &layout,
            opaque_shader,
            &geometry_targets,
            true,
            Some(wgpu::Face::Back),
            "Opaque chunk pipeline",
        );
        let voxel_pipeline = create_chunk_pipeline(
            device,
            &layout,
            voxel_shader,
            &geometry_targets,
            true,
            Some(wgpu::Face::Back),
            "Voxel model chunk pipeline",
        );

        let transparent_targets = [Some(wgpu::ColorTargetState {
            format: RenderTargets::SCENE_FORMAT,
            blend: Some(wgpu::BlendState::ALPHA_BLENDING),
            write_mask: wgpu::ColorWrites::ALL,
        })];
        let transparent_pipeline = create_chunk_pipeline(
            device,
            &layout,
            transparent_shader,
            &transparent_targets,
            false,
            None,
            "Transparent chunk pipeline",
        );

        let mut pass = ChunkGeometryPass {
            opaque_pipeline,
            voxel_pipeline,
            transparent_pipeline,
            frame_uniforms,
            camera_bind_group,
            world_bind_group,
            textures_bind_group,
            index_buffer: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Chunk quad index buffer"),
                size: 4,
                usage: wgpu::BufferUsages::INDEX,
                mapped_at_creation: false,
            }),
            index_capacity_faces: 0,
        };
        pass.ensure_index_capacity(device, queue, crate::rendering::limits::INITIAL_INDEX_FACES);
        pass
    }

    fn build_world_bind_group(
        device: &wgpu::Device,
        buffers: &WorldBuffers,
    ) -> (wgpu::BindGroupLayout, wgpu::BindGroup) {
        BindGroupBuilder::new(
            "chunk world",
            wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
        )
        .storage_r(
            buffers.faces.binding(),
            "Face buffer",
            wgpu::BindingResource::Buffer(buffers.faces.buffer().as_entire_buffer_binding()),
        )
        .storage_r(
            buffers.chunks.binding(),
            "Chunk descriptor buffer",
            wgpu::BindingResource::Buffer(buffers.chunks.buffer().as_entire_buffer_binding()),
        )
        .storage_r(
            buffers.light.binding(),
            "Light buffer",
            wgpu::BindingResource::Buffer(buffers.light.buffer().as_entire_buffer_binding()),
        )
        .build(device)
    }

    /// Rebuilds the world bind group after a slab buffer was replaced.
    pub fn rebind_world(&mut self, device: &wgpu::Device, buffers: &WorldBuffers) {
        let (_, bind_group) = Self::build_world_bind_group(device, buffers);
        self.world_bind_group = bind_group;
    }

    /// Grows the generated quad index buffer to cover `faces` quads.
    pub fn ensure_index_capacity(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, faces: u32) {
        if faces <= self.index_capacity_faces {
            return;
        }
        let capacity = faces.next_power_of_two();
        let mut indices: Vec<u32> = Vec::with_capacity(capacity as usize * 6);
        for face in 0..capacity {
            let base = face * 4;
            indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
        }
        self.index_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Chunk quad index buffer"),
            size: indices.len() as u64 * 4,
            usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        queue.write_buffer(&self.index_buffer, 0, bytemuck::cast_slice(&indices));
        self.index_capacity_faces = capacity;
    }

    pub fn write_frame_uniforms(&self, queue: &wgpu::Queue, uniforms: &FrameUniforms) {
        queue.write_buffer(&self.frame_uniforms, 0, bytemuck::bytes_of(uniforms));
    }

    /// The opaque and voxel-model passes into the MRT framebuffer.
    #[profiling::function]
    pub fn draw_geometry(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        targets: &RenderTargets,
        opaque_draws: &[ChunkDraw],
        voxel_draws: &[ChunkDraw],
    ) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Chunk geometry pass"),
            color_attachments: &[
                Some(wgpu::RenderPassColorAttachment {
                    view: &targets.color,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                }),
                Some(wgpu::RenderPassColorAttachment {
                    view: &targets.fragment_data,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                }),
            ],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &targets.depth,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        self.bind_common(&mut pass);
        pass.set_pipeline(&self.opaque_pipeline);
        self.draw_chunks(&mut pass, opaque_draws);
        pass.set_pipeline(&self.voxel_pipeline);
        self.draw_chunks(&mut pass, voxel_draws);
    }

    /// The transparent pass into the composed scene, depth-tested against
    /// the geometry but not writing depth.
    #[profiling::function]
    pub fn draw_transparent(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        targets: &RenderTargets,
        draws: &[ChunkDraw],
    ) {
        if draws.is_empty() {
            return;
        }
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Transparent chunk pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &targets.scene,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &targets.depth,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        self.bind_common(&mut pass);
        pass.set_pipeline(&self.transparent_pipeline);
        self.draw_chunks(&mut pass, draws);
    }

    fn bind_common(&self, pass: &mut wgpu::RenderPass<'_>) {
        pass.set_bind_group(0, &self.camera_bind_group, &[]);
        pass.set_bind_group(1, &self.world_bind_group, &[]);
        pass.set_bind_group(2, &self.textures_bind_group, &[]);
        pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
    }

    fn draw_chunks(&self, pass: &mut wgpu::RenderPass<'_>, draws: &[ChunkDraw]) {
        for draw in draws {
            if draw.count == 0 {
                continue;
            }
            debug_assert!(draw.count <= self.index_capacity_faces);
            pass.set_push_constants(
                wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                0,
                bytemuck::bytes_of(&draw.push),
            );
            pass.draw_indexed(0..draw.count * 6, (draw.start * 4) as i32, 0..1);
        }
    }
}

fn create_chunk_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    targets: &[Option<wgpu::ColorTargetState>],
    depth_write: bool,
    cull_mode: Option<wgpu::Face>,
    label: &str,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            targets,
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: RenderTargets::DEPTH_FORMAT,
            depth_write_enabled: depth_write,
            depth_compare: wgpu::CompareFunction::LessEqual,
            stencil: Default::default(),
            bias: Default::default(),
        }),
        multisample: Default::default(),
        multiview_mask: None,
        cache: None,
    })
}
