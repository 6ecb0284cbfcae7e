use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use glam::IVec3;

use crate::{
    mesh_generation::chunk_mesh::ChunkMesh,
    voxels::coord::ChunkPos,
};

/// One slot of the LOD window: the mesh plus the bookkeeping the sweep
/// reads without locking.
pub struct ChunkMeshNode {
    pub mesh: Arc<ChunkMesh>,
    /// Set on creation, cleared every frame the node is still wanted; the
    /// sweep evicts whatever is left flagged.
    pub should_be_removed: AtomicBool,
    /// How many of the eight higher-detail children currently occlude an
    /// octant of this mesh.
    pub drawable_children: AtomicU32,
}

impl ChunkMeshNode {
    pub fn new(pos: ChunkPos) -> Arc<Self> {
        Arc::new(ChunkMeshNode {
            mesh: Arc::new(ChunkMesh::new(pos)),
            should_be_removed: AtomicBool::new(true),
            drawable_children: AtomicU32::new(0),
        })
    }

    pub fn mark_kept(&self) {
        self.should_be_removed.store(false, Ordering::Relaxed);
    }

    pub fn mark_for_removal(&self) {
        self.should_be_removed.store(true, Ordering::Relaxed);
    }

    pub fn should_be_removed(&self) -> bool {
        self.should_be_removed.load(Ordering::Relaxed)
    }
}

/// The per-LOD node array, indexed by chunk-grid cell relative to a
/// rolling origin. The render thread replaces the whole array as the
/// player moves; workers look nodes up through the owning mutex.
pub struct MeshStorage {
    voxel_size: u32,
    first_cell: IVec3,
    dims: IVec3,
    nodes: Vec<Option<Arc<ChunkMeshNode>>>,
}

impl MeshStorage {
    pub fn empty(voxel_size: u32) -> Self {
        MeshStorage {
            voxel_size,
            first_cell: IVec3::ZERO,
            dims: IVec3::ZERO,
            nodes: Vec::new(),
        }
    }

    pub fn with_bounds(voxel_size: u32, first_cell: IVec3, dims: IVec3) -> Self {
        let len = (dims.x * dims.y * dims.z).max(0) as usize;
        MeshStorage {
            voxel_size,
            first_cell,
            dims,
            nodes: vec![None; len],
        }
    }

    #[inline(always)]
    pub fn voxel_size(&self) -> u32 {
        self.voxel_size
    }

    /// Chunk-grid cell of a position at this storage's LOD.
    #[inline(always)]
    pub fn cell_of(&self, pos: ChunkPos) -> IVec3 {
        let width = pos.width();
        IVec3::new(
            pos.wx.div_euclid(width),
            pos.wy.div_euclid(width),
            pos.wz.div_euclid(width),
        )
    }

    #[inline(always)]
    fn index_of(&self, cell: IVec3) -> Option<usize> {
        let rel = cell - self.first_cell;
        if rel.cmplt(IVec3::ZERO).any() || rel.cmpge(self.dims).any() {
            return None;
        }
        Some((rel.x * self.dims.y * self.dims.z + rel.y * self.dims.z + rel.z) as usize)
    }

    pub fn get(&self, pos: ChunkPos) -> Option<&Arc<ChunkMeshNode>> {
        debug_assert_eq!(pos.voxel_size, self.voxel_size);
        self.get_cell(self.cell_of(pos))
    }

    pub fn get_cell(&self, cell: IVec3) -> Option<&Arc<ChunkMeshNode>> {
        self.index_of(cell)
            .and_then(|index| self.nodes[index].as_ref())
    }

    pub fn set_cell(&mut self, cell: IVec3, node: Arc<ChunkMeshNode>) {
        let index = self
            .index_of(cell)
            .expect("cell outside the storage bounds");
        self.nodes[index] = Some(node);
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<ChunkMeshNode>> {
        self.nodes.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_origin_indexing() {
        let mut storage = MeshStorage::with_bounds(1, IVec3::new(-2, 0, 1), IVec3::splat(4));
        let pos = ChunkPos::new(-64, 32, 64, 1);
        let cell = storage.cell_of(pos);
        assert_eq!(cell, IVec3::new(-2, 1, 2));

        assert!(storage.get(pos).is_none());
        let node = ChunkMeshNode::new(pos);
        storage.set_cell(cell, node.clone());
        assert!(Arc::ptr_eq(storage.get(pos).unwrap(), &node));

        // Outside the window.
        assert!(storage.get_cell(IVec3::new(2, 0, 1)).is_none());
        assert_eq!(storage.nodes().count(), 1);
    }

    #[test]
    fn test_negative_coordinates_floor() {
        let storage = MeshStorage::empty(2);
        // Width at voxel size 2 is 64; -64 is exactly one cell below zero.
        assert_eq!(
            storage.cell_of(ChunkPos::new(-64, -128, 64, 2)),
            IVec3::new(-1, -2, 1)
        );
    }
}
