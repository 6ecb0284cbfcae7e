use glam::IVec3;

use crate::{
    mesh_generation::face_data::FaceData,
    voxels::{block::Block, face::Face},
};

/// A sub-range of a GPU slab, in elements. `len == 0` means never
/// allocated and leaves `start` undefined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Allocation {
    pub start: u32,
    pub len: u32,
}

impl Allocation {
    #[inline(always)]
    pub const fn is_allocated(&self) -> bool {
        self.len != 0
    }
}

/// Which of the three per-chunk face lists a block renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum MeshKind {
    Opaque = 0,
    VoxelModel = 1,
    Transparent = 2,
}

impl MeshKind {
    pub const ALL: [MeshKind; 3] = [MeshKind::Opaque, MeshKind::VoxelModel, MeshKind::Transparent];

    /// Transparent blocks sort and blend, non-cube models go through the
    /// model shader, everything else is a plain opaque cube.
    #[inline(always)]
    pub fn of(block: Block) -> MeshKind {
        if block.transparent() {
            MeshKind::Transparent
        } else if !block.model().is_full_cube() {
            MeshKind::VoxelModel
        } else {
            MeshKind::Opaque
        }
    }
}

/// One face list of a chunk mesh: faces interior to the chunk plus six
/// per-direction lists of seam faces, concatenated into `complete` for
/// upload.
#[derive(Default)]
pub struct PrimitiveMesh {
    pub core: Vec<FaceData>,
    pub neighbor: [Vec<FaceData>; 6],
    complete: Vec<FaceData>,
    pub allocation: Allocation,
    pub was_changed: bool,
    /// Prefix of `complete` that survived the last transparent sort; faces
    /// behind it stay allocated but are not drawn.
    pub drawn_face_count: u32,
    /// Player cell of the last transparent sort.
    pub last_sort_cell: Option<IVec3>,
}

impl PrimitiveMesh {
    pub fn clear_core(&mut self) {
        if !self.core.is_empty() {
            self.was_changed = true;
        }
        self.core.clear();
    }

    pub fn clear_neighbor(&mut self, face: Face) {
        let list = &mut self.neighbor[face as usize];
        if !list.is_empty() {
            self.was_changed = true;
        }
        list.clear();
    }

    pub fn add_core(&mut self, face: FaceData) {
        self.core.push(face);
        self.was_changed = true;
    }

    pub fn add_neighbor(&mut self, direction: Face, face: FaceData) {
        self.neighbor[direction as usize].push(face);
        self.was_changed = true;
    }

    /// Removes the face occupying the given slot, if present.
    pub fn remove_core(&mut self, cell: IVec3, normal: Face, back: bool) {
        if let Some(index) = self
            .core
            .iter()
            .position(|f| f.same_slot(cell, normal, back))
        {
            self.core.swap_remove(index);
            self.was_changed = true;
        }
    }

    pub fn remove_neighbor(&mut self, direction: Face, cell: IVec3, normal: Face, back: bool) {
        let list = &mut self.neighbor[direction as usize];
        if let Some(index) = list.iter().position(|f| f.same_slot(cell, normal, back)) {
            list.swap_remove(index);
            self.was_changed = true;
        }
    }

    /// Rebuilds the contiguous upload buffer from the core and seam lists
    /// and resets the transparent sort state.
    pub fn pack_complete(&mut self) {
        self.complete.clear();
        self.complete.extend_from_slice(&self.core);
        for list in &self.neighbor {
            self.complete.extend_from_slice(list);
        }
        self.drawn_face_count = self.complete.len() as u32;
        self.last_sort_cell = None;
        self.was_changed = false;
    }

    #[inline(always)]
    pub fn complete(&self) -> &[FaceData] {
        &self.complete
    }

    #[inline(always)]
    pub fn complete_mut(&mut self) -> &mut [FaceData] {
        &mut self.complete
    }

    #[inline(always)]
    pub fn face_count(&self) -> usize {
        self.complete.len()
    }
}
