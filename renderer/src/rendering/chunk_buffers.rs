use bytemuck::{Pod, Zeroable};
use engine::mesh_generation::{
    chunk_mesh::{ChunkMesh, MeshInner, MeshUploader},
    light::{COARSE_VOLUME, CUBE_VOLUME},
    primitive_mesh::MeshKind,
};

use crate::rendering::{
    limits::{
        CHUNK_BUFFER_BINDING, CHUNK_BUFFER_CAPACITY, CHUNK_BUFFER_MAX_CAPACITY,
        FACE_BUFFER_BINDING, FACE_BUFFER_CAPACITY, FACE_BUFFER_MAX_CAPACITY,
        LIGHT_BUFFER_BINDING, LIGHT_BUFFER_CAPACITY, LIGHT_BUFFER_MAX_CAPACITY,
    },
    memory::gpu_slab::GpuSlab,
};

/// Per-chunk record in the descriptor slab: where the chunk sits and where
/// each coarse light region lives in the light slab.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct GpuChunkDescriptor {
    pub position: [i32; 3],
    pub voxel_size: u32,
    pub light_pointers: [u32; COARSE_VOLUME],
}

/// One uploaded light cube: 8³ packed samples.
pub type GpuLightCube = [u32; CUBE_VOLUME];

/// The three world slabs: packed face records, chunk descriptors and
/// compressed light cubes, bound at their contract indices.
pub struct WorldBuffers {
    pub faces: GpuSlab<u64>,
    pub chunks: GpuSlab<GpuChunkDescriptor>,
    pub light: GpuSlab<GpuLightCube>,
}

impl WorldBuffers {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let faces = GpuSlab::new(
            device,
            queue,
            FACE_BUFFER_BINDING,
            FACE_BUFFER_CAPACITY,
            FACE_BUFFER_MAX_CAPACITY,
            "World face buffer",
        );
        let chunks = GpuSlab::new(
            device,
            queue,
            CHUNK_BUFFER_BINDING,
            CHUNK_BUFFER_CAPACITY,
            CHUNK_BUFFER_MAX_CAPACITY,
            "World chunk buffer",
        );
        let mut light = GpuSlab::new(
            device,
            queue,
            LIGHT_BUFFER_BINDING,
            LIGHT_BUFFER_CAPACITY,
            LIGHT_BUFFER_MAX_CAPACITY,
            "World light buffer",
        );

        // Slot 0 is the shared all-zero cube; lightmap pointers of 0 mean
        // "no separate map" and must stay valid forever.
        let zero_slot = light
            .allocate_slot()
            .expect("fresh light slab cannot be exhausted");
        assert_eq!(zero_slot, 0);
        light.write_slot(0, &[0; CUBE_VOLUME]);

        WorldBuffers {
            faces,
            chunks,
            light,
        }
    }

    /// Opens the per-frame bracket. Returns true when any slab's buffer was
    /// replaced since the previous frame, in which case bind groups built
    /// over the slabs must be recreated before drawing.
    pub fn begin_render(&mut self) -> bool {
        let faces = self.faces.take_buffer_replaced();
        let chunks = self.chunks.take_buffer_replaced();
        let light = self.light.take_buffer_replaced();
        faces || chunks || light
    }

    /// Closes the per-frame bracket. Growth that happens between the
    /// brackets is picked up by the next `begin_render`.
    pub fn end_render(&mut self) {}
}

impl MeshUploader for WorldBuffers {
    /// Moves a finished mesh into the slabs: faces per primitive, pending
    /// light cubes, then the descriptor referencing both.
    fn upload(&mut self, mesh: &ChunkMesh, inner: &mut MeshInner) {
        for kind in MeshKind::ALL {
            let primitive = &mut inner.primitives[kind as usize];
            let words: Vec<u64> = primitive
                .complete()
                .iter()
                .map(|face| face.into_bits())
                .collect();
            match self.faces.upload(&words, &mut primitive.allocation) {
                Ok(()) => {
                    mesh.set_draw_data(kind, primitive.allocation.start, words.len() as u32);
                }
                Err(err) => {
                    // The mesh keeps whatever it had on the GPU before.
                    log::error!("Skipping face upload for {:?}: {}", mesh.pos(), err);
                }
            }
        }

        for update in std::mem::take(&mut inner.light.pending) {
            match update.cube {
                Some(cube) => {
                    if inner.light.pointers[update.index] == 0 {
                        match self.light.allocate_slot() {
                            Ok(slot) => inner.light.pointers[update.index] = slot,
                            Err(err) => {
                                log::error!(
                                    "Skipping light cube upload for {:?}: {}",
                                    mesh.pos(),
                                    err
                                );
                                continue;
                            }
                        }
                    }
                    self.light
                        .write_slot(inner.light.pointers[update.index], &cube);
                }
                None => {
                    let slot = inner.light.pointers[update.index];
                    if slot != 0 {
                        self.light.free_slot(slot);
                        inner.light.pointers[update.index] = 0;
                    }
                }
            }
        }

        let slot = match inner.descriptor_slot {
            Some(slot) => slot,
            None => match self.chunks.allocate_slot() {
                Ok(slot) => {
                    inner.descriptor_slot = Some(slot);
                    slot
                }
                Err(err) => {
                    log::error!("Skipping descriptor upload for {:?}: {}", mesh.pos(), err);
                    return;
                }
            },
        };
        let pos = mesh.pos();
        self.chunks.write_slot(
            slot,
            &GpuChunkDescriptor {
                position: [pos.wx, pos.wy, pos.wz],
                voxel_size: pos.voxel_size,
                light_pointers: inner.light.pointers,
            },
        );
        mesh.set_chunk_data_index(slot);
        inner.chunk.was_cleaned = false;
    }

    fn release(&mut self, mesh: &ChunkMesh, inner: &mut MeshInner) {
        for kind in MeshKind::ALL {
            self.faces.free(&mut inner.primitives[kind as usize].allocation);
            mesh.set_draw_data(kind, 0, 0);
        }
        for pointer in inner.light.pointers.iter_mut() {
            if *pointer != 0 {
                self.light.free_slot(*pointer);
                *pointer = 0;
            }
        }
        inner.light.pending.clear();
        if let Some(slot) = inner.descriptor_slot.take() {
            self.chunks.free_slot(slot);
        }
    }
}
