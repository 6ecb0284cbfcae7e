use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use engine::{
    config::graphics_settings::GraphicsSettings,
    lod::LodManager,
    math::frustum::Frustum,
    mesh_generation::{chunk_mesh::ChunkMesh, primitive_mesh::MeshKind},
    voxels::chunk::CHUNK_SIZE,
};
use glam::{DVec3, Mat4, Vec3};

use crate::rendering::{
    chunk_buffers::WorldBuffers,
    limits::SELECTION_RANGE,
    passes::{
        bloom::BloomPass,
        chunk_geometry::{ChunkDraw, ChunkGeometryPass, ChunkPushConstants, FrameUniforms},
        composition::CompositionPass,
    },
    selection::{BlockHit, SelectionPass, pick_block},
    texture::{RenderTargets, Resolution},
    transparent,
};

const Z_NEAR: f32 = 0.1;

/// Compiled shader modules supplied by the embedding application; the
/// renderer owns pipelines and draw submission, not shader sources.
pub struct WorldShaders {
    pub opaque: wgpu::ShaderModule,
    pub voxel_model: wgpu::ShaderModule,
    pub transparent: wgpu::ShaderModule,
    pub composition: wgpu::ShaderModule,
    pub selection: wgpu::ShaderModule,
    pub bloom_downsample: wgpu::ShaderModule,
    pub bloom_first_blur: wgpu::ShaderModule,
    pub bloom_second_blur: wgpu::ShaderModule,
    pub bloom_composite: wgpu::ShaderModule,
}

/// Everything the world renderer needs from the frame loop.
pub struct FrameInput {
    pub player: DVec3,
    pub view_direction: Vec3,
    pub up: Vec3,
    pub ambient_light: Vec3,
    pub fog_color: Vec3,
    pub fog_density: f32,
    /// Wall-clock budget for deferred mesh uploads this frame.
    pub mesh_update_budget: Duration,
}

pub struct WorldRendererStatistics {
    pub face_buffer_capacity: u32,
    pub face_buffer_used: u32,
    pub chunk_buffer_capacity: u32,
    pub chunk_buffer_used: u32,
    pub light_buffer_capacity: u32,
    pub light_buffer_used: u32,
    pub drawn_chunks: usize,
}

/// Draws the chunk world each frame: finishes pending mesh uploads, asks
/// the LOD manager for the visible set, then runs the opaque, voxel-model,
/// composition, transparent, selection and bloom passes.
pub struct WorldRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pub buffers: WorldBuffers,
    targets: RenderTargets,
    geometry_pass: ChunkGeometryPass,
    composition_pass: CompositionPass,
    selection_pass: SelectionPass,
    bloom_pass: BloomPass,
    visible: Vec<Arc<ChunkMesh>>,
    drawn_chunks: usize,
}

impl WorldRenderer {
    /// Features the device must be created with.
    pub const REQUIRED_FEATURES: wgpu::Features = wgpu::Features::PUSH_CONSTANTS;

    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        size: Resolution,
        shaders: &WorldShaders,
        texture_array: &wgpu::TextureView,
        texture_sampler: &wgpu::Sampler,
    ) -> Self {
        let buffers = WorldBuffers::new(device, queue);
        let targets = RenderTargets::new(device, size);
        let geometry_pass = ChunkGeometryPass::new(
            device,
            queue,
            &buffers,
            &shaders.opaque,
            &shaders.voxel_model,
            &shaders.transparent,
            texture_array,
            texture_sampler,
        );
        let composition_pass = CompositionPass::new(device, &shaders.composition, &targets);
        let selection_pass = SelectionPass::new(
            device,
            &shaders.selection,
            &geometry_pass.frame_uniforms,
            RenderTargets::SCENE_FORMAT,
        );
        let bloom_pass = BloomPass::new(
            device,
            &shaders.bloom_downsample,
            &shaders.bloom_first_blur,
            &shaders.bloom_second_blur,
            &shaders.bloom_composite,
            &targets,
        );

        WorldRenderer {
            device: device.clone(),
            queue: queue.clone(),
            buffers,
            targets,
            geometry_pass,
            composition_pass,
            selection_pass,
            bloom_pass,
            visible: Vec::new(),
            drawn_chunks: 0,
        }
    }

    /// The composed output of the last `render` call; the embedding
    /// application layers sky, UI and item renderers around it.
    pub fn scene_view(&self) -> &wgpu::TextureView {
        &self.targets.scene
    }

    pub fn resize(&mut self, size: Resolution) {
        self.targets.resize(&self.device, size);
        self.composition_pass.rebind(&self.device, &self.targets);
        self.bloom_pass.rebind(&self.device, &self.targets);
    }

    #[profiling::function]
    pub fn render(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        manager: &LodManager,
        frame: &FrameInput,
        settings: &GraphicsSettings,
    ) -> Option<BlockHit> {
        // Apply queued block updates and amortized mesh uploads first so
        // this frame draws the freshest finished state.
        manager.update_meshes(Instant::now() + frame.mesh_update_budget, &mut self.buffers);

        if self.buffers.begin_render() {
            self.geometry_pass.rebind_world(&self.device, &self.buffers);
        }

        let z_far = ((settings.render_distance * CHUNK_SIZE) << settings.highest_lod) as f64
            * settings.lod_factor.max(1.0);
        let frustum = Frustum::new(
            Vec3::ZERO,
            frame.view_direction,
            frame.up,
            settings.fov.to_radians(),
            self.targets.size.aspect(),
            z_far as f32,
        );

        self.visible.clear();
        manager.update_and_get_render_chunks(
            frame.player,
            settings.render_distance,
            settings.lod_factor,
            &frustum,
            &mut self.visible,
        );

        // Near chunks first. Insertion sort: the visible set barely changes
        // order between frames, so this is close to a single pass.
        let mut keyed: Vec<(f64, Arc<ChunkMesh>)> = self
            .visible
            .drain(..)
            .map(|mesh| (mesh.pos().center_distance_squared(frame.player), mesh))
            .collect();
        for i in 1..keyed.len() {
            let mut j = i;
            while j > 0 && keyed[j - 1].0 > keyed[j].0 {
                keyed.swap(j - 1, j);
                j -= 1;
            }
        }
        self.drawn_chunks = keyed.len();

        let mut opaque_draws = Vec::with_capacity(keyed.len());
        let mut voxel_draws = Vec::new();
        let mut max_faces = 0u32;
        for (_, mesh) in &keyed {
            let push = Self::push_constants(mesh, frame.player);
            let (start, count) = mesh.draw_data(MeshKind::Opaque);
            if count > 0 {
                max_faces = max_faces.max(count);
                opaque_draws.push(ChunkDraw { push, start, count });
            }
            let (start, count) = mesh.draw_data(MeshKind::VoxelModel);
            if count > 0 {
                max_faces = max_faces.max(count);
                voxel_draws.push(ChunkDraw { push, start, count });
            }
        }

        // Transparent sorting happens while building the draw list so the
        // uploads land before the pass runs.
        let mut transparent_draws = Vec::new();
        for (_, mesh) in &keyed {
            if let Some(mut inner) = mesh.try_lock() {
                let cell = transparent::player_cell(
                    frame.player,
                    mesh.pos().world(),
                    mesh.pos().voxel_size,
                );
                let primitive = &mut inner.primitives[MeshKind::Transparent as usize];
                if transparent::needs_sort(primitive, cell) {
                    let drawn = transparent::sort_primitive(primitive, cell);
                    let words: Vec<u64> = primitive.complete()[..drawn as usize]
                        .iter()
                        .map(|face| face.into_bits())
                        .collect();
                    self.buffers.faces.write_prefix(&primitive.allocation, &words);
                    mesh.set_draw_data(
                        MeshKind::Transparent,
                        primitive.allocation.start,
                        drawn,
                    );
                }
            }
            // A locked mesh draws its previous sorted prefix.
            let (start, count) = mesh.draw_data(MeshKind::Transparent);
            if count > 0 {
                max_faces = max_faces.max(count);
                transparent_draws.push(ChunkDraw {
                    push: Self::push_constants(mesh, frame.player),
                    start,
                    count,
                });
            }
        }

        self.geometry_pass
            .ensure_index_capacity(&self.device, &self.queue, max_faces);
        self.geometry_pass.write_frame_uniforms(
            &self.queue,
            &FrameUniforms {
                projection: Mat4::perspective_rh(
                    settings.fov.to_radians(),
                    self.targets.size.aspect(),
                    Z_NEAR,
                    z_far as f32,
                ),
                view: Mat4::look_to_rh(Vec3::ZERO, frame.view_direction, frame.up),
                ambient_light: frame.ambient_light.to_array(),
                fog_density: frame.fog_density,
                fog_color: frame.fog_color.to_array(),
                z_near: Z_NEAR,
                z_far: z_far as f32,
                _padding: [0.0; 3],
            },
        );

        self.geometry_pass
            .draw_geometry(encoder, &self.targets, &opaque_draws, &voxel_draws);
        self.composition_pass.render(encoder, &self.targets);
        self.geometry_pass
            .draw_transparent(encoder, &self.targets, &transparent_draws);

        let selected = pick_block(
            |cell| manager.get_block(cell),
            frame.player,
            frame.view_direction.as_dvec3(),
            SELECTION_RANGE,
        );
        if let Some(hit) = selected {
            let relative = (hit.cell.as_dvec3() - frame.player).as_vec3();
            self.selection_pass
                .render(encoder, &self.targets.scene, &self.targets.depth, relative);
        }

        if settings.bloom {
            self.bloom_pass.render(encoder, &self.targets);
        }

        self.buffers.end_render();
        selected
    }

    fn push_constants(mesh: &ChunkMesh, player: DVec3) -> ChunkPushConstants {
        let pos = mesh.pos();
        ChunkPushConstants {
            model_position: (pos.world().as_dvec3() - player).as_vec3().to_array(),
            visibility_mask: mesh.visibility_mask() as u32,
            voxel_size: pos.voxel_size,
            chunk_data_index: mesh.chunk_data_index(),
            _padding: [0; 2],
        }
    }

    pub fn get_statistics(&self) -> WorldRendererStatistics {
        WorldRendererStatistics {
            face_buffer_capacity: self.buffers.faces.capacity(),
            face_buffer_used: self.buffers.faces.used(),
            chunk_buffer_capacity: self.buffers.chunks.capacity(),
            chunk_buffer_used: self.buffers.chunks.used(),
            light_buffer_capacity: self.buffers.light.capacity(),
            light_buffer_used: self.buffers.light.used(),
            drawn_chunks: self.drawn_chunks,
        }
    }
}
