use bytemuck::{Pod, Zeroable};
use engine::voxels::block::{Block, BlockRegistry};
use glam::{DVec3, IVec3, Vec3};
use wgpu::util::DeviceExt;

use crate::rendering::texture::RenderTargets;

/// Result of the block-selection ray cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHit {
    pub cell: IVec3,
    pub block: Block,
}

/// Walks the voxel grid with the Amanatides & Woo traversal and returns
/// the first block whose rotated model box the ray actually intersects.
pub fn pick_block(
    get_block: impl Fn(IVec3) -> Option<Block>,
    origin: DVec3,
    direction: DVec3,
    max_distance: f64,
) -> Option<BlockHit> {
    let direction = direction.normalize();
    let inv_direction = 1.0 / direction;

    let mut cell = origin.floor().as_ivec3();
    let step = direction.signum().as_ivec3();

    // Distance along the ray to the next cell boundary, per axis.
    let mut t_max = DVec3::new(
        axis_t_max(origin.x, direction.x, cell.x),
        axis_t_max(origin.y, direction.y, cell.y),
        axis_t_max(origin.z, direction.z, cell.z),
    );
    let t_delta = inv_direction.abs();

    let mut travelled = 0.0;
    while travelled <= max_distance {
        if let Some(block) = get_block(cell)
            && !block.is_air()
            && let Some(t) = intersect_model_box(block, cell, origin, inv_direction)
            && t <= max_distance
        {
            return Some(BlockHit { cell, block });
        }

        if t_max.x <= t_max.y && t_max.x <= t_max.z {
            travelled = t_max.x;
            t_max.x += t_delta.x;
            cell.x += step.x;
        } else if t_max.y <= t_max.z {
            travelled = t_max.y;
            t_max.y += t_delta.y;
            cell.y += step.y;
        } else {
            travelled = t_max.z;
            t_max.z += t_delta.z;
            cell.z += step.z;
        }
    }
    None
}

fn axis_t_max(origin: f64, direction: f64, cell: i32) -> f64 {
    if direction > 0.0 {
        (cell as f64 + 1.0 - origin) / direction
    } else if direction < 0.0 {
        (cell as f64 - origin) / direction
    } else {
        f64::INFINITY
    }
}

/// Slab test against the block's model box, rotated by its permutation and
/// scaled from 16-unit cells to world units.
fn intersect_model_box(
    block: Block,
    cell: IVec3,
    origin: DVec3,
    inv_direction: DVec3,
) -> Option<f64> {
    let model = block.model();
    let shape = BlockRegistry::global().model_shape(model.index);
    let (min, max) = model.permutation.apply_to_box(shape.min, shape.max);

    let box_min = cell.as_dvec3() + DVec3::new(min[0] as f64, min[1] as f64, min[2] as f64) / 16.0;
    let box_max = cell.as_dvec3() + DVec3::new(max[0] as f64, max[1] as f64, max[2] as f64) / 16.0;

    let t1 = (box_min - origin) * inv_direction;
    let t2 = (box_max - origin) * inv_direction;
    let t_near = t1.min(t2).max_element().max(0.0);
    let t_far = t1.max(t2).min_element();
    (t_near <= t_far).then_some(t_near)
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct SelectionPushConstants {
    position: [f32; 3],
    _padding: f32,
}

const CUBE_EDGES: [[f32; 3]; 24] = [
    [0.0, 0.0, 0.0], [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0], [1.0, 1.0, 0.0],
    [0.0, 0.0, 1.0], [1.0, 0.0, 1.0],
    [0.0, 1.0, 1.0], [1.0, 1.0, 1.0],
    [0.0, 0.0, 0.0], [0.0, 1.0, 0.0],
    [1.0, 0.0, 0.0], [1.0, 1.0, 0.0],
    [0.0, 0.0, 1.0], [0.0, 1.0, 1.0],
    [1.0, 0.0, 1.0], [1.0, 1.0, 1.0],
    [0.0, 0.0, 0.0], [0.0, 0.0, 1.0],
    [1.0, 0.0, 0.0], [1.0, 0.0, 1.0],
    [0.0, 1.0, 0.0], [0.0, 1.0, 1.0],
    [1.0, 1.0, 0.0], [1.0, 1.0, 1.0],
];

/// Draws the 12-line wireframe around the selected cell.
pub struct SelectionPass {
    pipeline: wgpu::RenderPipeline,
    camera_bind_group: wgpu::BindGroup,
    vertices: wgpu::Buffer,
}

impl SelectionPass {
    pub fn new(
        device: &wgpu::Device,
        shader: &wgpu::ShaderModule,
        frame_uniforms: &wgpu::Buffer,
        output_format: wgpu::TextureFormat,
    ) -> Self {
        let vertices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Selection wireframe vertices"),
            contents: bytemuck::cast_slice(&CUBE_EDGES),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let (camera_layout, camera_bind_group) = crate::rendering::util::bind_group_builder::BindGroupBuilder::new(
            "selection camera",
            wgpu::ShaderStages::VERTEX,
        )
        .uniform(
            0,
            "Frame uniform buffer",
            wgpu::BindingResource::Buffer(frame_uniforms.as_entire_buffer_binding()),
        )
        .build(device);

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Selection pipeline layout"),
            bind_group_layouts: &[&camera_layout],
            push_constant_ranges: &[wgpu::PushConstantRange {
                stages: wgpu::ShaderStages::VERTEX,
                range: 0..size_of::<SelectionPushConstants>() as u32,
            }],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Selection pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: 12,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x3],
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: output_format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::LineList,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: RenderTargets::DEPTH_FORMAT,
                depth_write_enabled: false,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: Default::default(),
                bias: Default::default(),
            }),
            multisample: Default::default(),
            multiview_mask: None,
            cache: None,
        });

        SelectionPass {
            pipeline,
            camera_bind_group,
            vertices,
        }
    }

    /// `position` is the selected cell's corner relative to the player.
    pub fn render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        color_view: &wgpu::TextureView,
        depth_view: &wgpu::TextureView,
        position: Vec3,
    ) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Selection pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: color_view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.camera_bind_group, &[]);
        pass.set_vertex_buffer(0, self.vertices.slice(..));
        pass.set_push_constants(
            wgpu::ShaderStages::VERTEX,
            0,
            bytemuck::bytes_of(&SelectionPushConstants {
                position: position.to_array(),
                _padding: 0.0,
            }),
        );
        pass.draw(0..CUBE_EDGES.len() as u32, 0..1);
    }
}
