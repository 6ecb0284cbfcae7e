use std::sync::{
    Mutex, MutexGuard,
    atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering},
};

use glam::IVec3;
use rayon::prelude::*;
use thiserror::Error;

use crate::{
    lod::{LodManager, NeighborLookup},
    mesh_generation::{
        face_data::FaceData,
        light::{
            COARSE_VOLUME, CUBE_DIM, CompressedLightCube, coarse_cell_of, coarse_cell_of_index,
            coarse_index, compress_channels, cube_sample_index,
        },
        primitive_mesh::{MeshKind, PrimitiveMesh},
    },
    voxels::{
        block::{Block, BlockRegistry, ModelRef},
        chunk::{CHUNK_MASK, CHUNK_SIZE, Chunk},
        coord::ChunkPos,
        face::Face,
    },
};

#[derive(Debug, Error)]
pub enum MeshingError {
    /// A neighbor this mesh must stitch against has not arrived yet.
    /// Transient: re-queue the mesh and retry next frame.
    #[error("no mesh available for the neighbor at {pos:?}")]
    LodMissing { pos: ChunkPos },
    /// A worker currently holds the neighbor's mutex. Transient as well.
    #[error("the neighbor mesh at {pos:?} is locked by a worker")]
    MeshLocked { pos: ChunkPos },
}

/// The seam between two chunks, walked as a rectangle of (u, v) cells on
/// the tangential axes of the boundary plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryRect {
    pub min_u: i32,
    pub min_v: i32,
    pub max_u: i32,
    pub max_v: i32,
}

impl BoundaryRect {
    fn include(rect: &mut Option<BoundaryRect>, u: i32, v: i32) {
        match rect {
            Some(rect) => {
                rect.min_u = rect.min_u.min(u);
                rect.min_v = rect.min_v.min(v);
                rect.max_u = rect.max_u.max(u);
                rect.max_v = rect.max_v.max(v);
            }
            None => {
                *rect = Some(BoundaryRect {
                    min_u: u,
                    min_v: v,
                    max_u: u,
                    max_v: v,
                })
            }
        }
    }

    fn union(a: Option<BoundaryRect>, b: Option<BoundaryRect>) -> Option<BoundaryRect> {
        match (a, b) {
            (Some(mut a), Some(b)) => {
                a.min_u = a.min_u.min(b.min_u);
                a.min_v = a.min_v.min(b.min_v);
                a.max_u = a.max_u.max(b.max_u);
                a.max_v = a.max_v.max(b.max_v);
                Some(a)
            }
            (a, None) => a,
            (None, b) => b,
        }
    }
}

/// A queued change to one coarse light cell. `cube == None` releases the
/// cell back to the shared all-zero cube.
pub struct LightCubeUpdate {
    pub index: usize,
    pub cube: Option<Box<CompressedLightCube>>,
}

/// Light state of one mesh: the 6×6×6 pointer grid into the light slab and
/// the cube updates waiting for the next upload.
pub struct MeshLight {
    /// Slot indices into the light slab; 0 is the shared all-zero cube.
    pub pointers: [u32; COARSE_VOLUME],
    pub pending: Vec<LightCubeUpdate>,
}

impl Default for MeshLight {
    fn default() -> Self {
        MeshLight {
            pointers: [0; COARSE_VOLUME],
            pending: Vec::new(),
        }
    }
}

/// Mutex-guarded per-mesh state. Workers hold the guard for the whole
/// meshing pass; the render thread takes it briefly to stitch and upload.
pub struct MeshInner {
    pub chunk: Chunk,
    pub primitives: [PrimitiveMesh; 3],
    /// Snapshot of the neighbor each seam was last stitched against.
    pub last_neighbor: [Option<(ChunkPos, u64)>; 6],
    /// Bounding rectangle per face of the boundary cells a seam face could
    /// touch; lets the stitcher skip fully-occluded borders.
    pub open_rects: [Option<BoundaryRect>; 6],
    pub light: MeshLight,
    /// Slot in the chunk-descriptor slab, assigned at first upload.
    pub descriptor_slot: Option<u32>,
}

/// Pushes finished mesh state into GPU buffers. Implemented by the
/// renderer over the slab allocators; only ever called on the render
/// thread.
pub trait MeshUploader {
    fn upload(&mut self, mesh: &ChunkMesh, inner: &mut MeshInner);
    /// Releases every slab allocation the mesh holds.
    fn release(&mut self, mesh: &ChunkMesh, inner: &mut MeshInner);
}

static NEXT_GRID_VERSION: AtomicU64 = AtomicU64::new(1);

fn next_grid_version() -> u64 {
    NEXT_GRID_VERSION.fetch_add(1, Ordering::Relaxed)
}

/// One chunk's render state: the voxel grid and the three face lists built
/// from it, plus the flags the render thread reads without taking the lock.
pub struct ChunkMesh {
    pos: ChunkPos,
    inner: Mutex<MeshInner>,
    generated: std::sync::atomic::AtomicBool,
    /// One bit per octant; cleared while a higher-detail child covers it.
    visibility_mask: AtomicU8,
    /// Per primitive: face-slab start in the high half, face count in the
    /// low half, packed so the render thread reads a consistent pair
    /// without the mesh lock. Written at upload time, checked at draw
    /// time; a mesh is never drawn before its first upload completes.
    draw_data: [AtomicU64; 3],
    /// Slot in the chunk-descriptor slab, mirrored from `MeshInner` at
    /// upload time for lock-free draws.
    chunk_data_index: AtomicU32,
    /// Changes whenever the grid content changes; seam snapshots compare
    /// against it to skip redundant stitches.
    grid_version: AtomicU64,
}

impl ChunkMesh {
    pub fn new(pos: ChunkPos) -> Self {
        ChunkMesh {
            pos,
            inner: Mutex::new(MeshInner {
                chunk: Chunk::new(pos),
                primitives: Default::default(),
                last_neighbor: [None; 6],
                open_rects: [None; 6],
                light: MeshLight::default(),
                descriptor_slot: None,
            }),
            generated: std::sync::atomic::AtomicBool::new(false),
            visibility_mask: AtomicU8::new(0xFF),
            draw_data: Default::default(),
            chunk_data_index: AtomicU32::new(0),
            grid_version: AtomicU64::new(next_grid_version()),
        }
    }

    #[inline(always)]
    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    pub fn lock(&self) -> MutexGuard<'_, MeshInner> {
        self.inner.lock().unwrap()
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, MeshInner>> {
        self.inner.try_lock().ok()
    }

    #[inline(always)]
    pub fn generated(&self) -> bool {
        self.generated.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn grid_version(&self) -> u64 {
        self.grid_version.load(Ordering::Acquire)
    }

    pub(crate) fn bump_grid_version(&self) {
        self.grid_version
            .store(next_grid_version(), Ordering::Release);
    }

    #[inline(always)]
    pub fn visibility_mask(&self) -> u8 {
        self.visibility_mask.load(Ordering::Relaxed)
    }

    /// Clears the octant bit; true when this call changed it.
    pub fn clear_octant(&self, octant: u8) -> bool {
        let previous = self
            .visibility_mask
            .fetch_and(!(1 << octant), Ordering::Relaxed);
        previous & (1 << octant) != 0
    }

    /// Restores the octant bit; true when this call changed it.
    pub fn set_octant(&self, octant: u8) -> bool {
        let previous = self.visibility_mask.fetch_or(1 << octant, Ordering::Relaxed);
        previous & (1 << octant) == 0
    }

    /// The uploaded (slab start, face count) pair of one primitive.
    #[inline(always)]
    pub fn draw_data(&self, kind: MeshKind) -> (u32, u32) {
        let packed = self.draw_data[kind as usize].load(Ordering::Acquire);
        ((packed >> 32) as u32, packed as u32)
    }

    #[inline(always)]
    pub fn face_count(&self, kind: MeshKind) -> u32 {
        self.draw_data(kind).1
    }

    /// Called by the uploader once face records are resident on the GPU.
    pub fn set_draw_data(&self, kind: MeshKind, start: u32, count: u32) {
        self.draw_data[kind as usize].store((start as u64) << 32 | count as u64, Ordering::Release);
    }

    #[inline(always)]
    pub fn chunk_data_index(&self) -> u32 {
        self.chunk_data_index.load(Ordering::Acquire)
    }

    pub fn set_chunk_data_index(&self, index: u32) {
        self.chunk_data_index.store(index, Ordering::Release);
    }

    /// A mesh is drawable once something is uploaded and no set of
    /// higher-detail children fully covers it.
    pub fn drawable(&self) -> bool {
        self.visibility_mask() != 0
            && MeshKind::ALL.iter().any(|&kind| self.face_count(kind) != 0)
    }

    /// Installs a chunk payload and rebuilds the core face lists. Runs on a
    /// worker thread with the guard held.
    pub fn populate(&self, inner: &mut MeshInner, blocks: Box<[Block]>, light: Box<[[u8; 6]]>) {
        inner.chunk.populate(blocks, light);
        self.bump_grid_version();
        self.regenerate_main_mesh(inner);
        self.generated.store(true, Ordering::Release);
    }

    /// Enumerates every exposed face whose both cells lie inside this
    /// chunk. Faces across chunk borders are produced by the stitching
    /// pass instead.
    #[profiling::function]
    pub fn regenerate_main_mesh(&self, inner: &mut MeshInner) {
        let MeshInner {
            chunk,
            primitives,
            last_neighbor,
            open_rects,
            ..
        } = inner;

        for primitive in primitives.iter_mut() {
            primitive.clear_core();
            for face in Face::all() {
                primitive.clear_neighbor(face);
            }
        }

        for x in 0..CHUNK_SIZE {
            for y in 0..CHUNK_SIZE {
                for z in 0..CHUNK_SIZE {
                    let block = chunk.get_block(x, y, z);
                    if block.is_air() {
                        continue;
                    }
                    let cell = IVec3::new(x, y, z);
                    let model = block.model();
                    let kind = MeshKind::of(block);
                    let back = block.transparent() && block.has_back_face();

                    for face in Face::all() {
                        let exposed = cell + face.to_ivec3();
                        if !Chunk::lies_in_chunk(exposed.x, exposed.y, exposed.z) {
                            continue;
                        }
                        let other = chunk.get_block(exposed.x, exposed.y, exposed.z);
                        if !can_be_seen_through_other_block(block, model, other, face) {
                            continue;
                        }
                        primitives[kind as usize]
                            .add_core(FaceData::construct(block, model, exposed, face, false));
                        if back {
                            primitives[MeshKind::Transparent as usize].add_core(
                                FaceData::construct(block, model, cell, face.opposite(), true),
                            );
                        }
                    }
                }
            }
        }

        // Record, per border, the rectangle of cells a seam face could pass
        // through; chunk pairs whose union is empty skip the boundary walk.
        for face in Face::all() {
            let (u_axis, v_axis) = face.tangents();
            let axis = face.axis();
            let boundary = face.boundary_coord();
            let mut rect = None;
            for u in 0..CHUNK_SIZE {
                for v in 0..CHUNK_SIZE {
                    let mut cell = IVec3::ZERO;
                    cell[axis] = boundary;
                    cell[u_axis] = u;
                    cell[v_axis] = v;
                    let block = chunk.get_block(cell.x, cell.y, cell.z);
                    if block.view_through() || !block.model().is_full_cube() {
                        BoundaryRect::include(&mut rect, u, v);
                    }
                }
            }
            open_rects[face as usize] = rect;
        }

        // Every seam is stale now.
        *last_neighbor = [None; 6];
        chunk.clear_changed();
    }

    /// Rebuilds the seam faces toward all six neighbors, writing both sides
    /// of each same-LOD seam. Neighbors whose lists changed are pushed back
    /// onto the update queue so their own `finish` runs.
    #[profiling::function]
    pub fn finish_neighbors(
        &self,
        inner: &mut MeshInner,
        world: &LodManager,
    ) -> Result<(), MeshingError> {
        for face in Face::all() {
            let same = world.get_neighbor(self.pos, face);
            let same_pending = matches!(same, NeighborLookup::Pending);
            if let NeighborLookup::Generated(other) = same {
                if inner.last_neighbor[face as usize] == Some((other.pos(), other.grid_version()))
                {
                    continue;
                }
                let Some(mut other_inner) = other.try_lock() else {
                    return Err(MeshingError::MeshLocked { pos: other.pos() });
                };
                stitch_same_lod(self, inner, &other, &mut other_inner, face);
                let changed = other_inner.primitives.iter().any(|p| p.was_changed);
                drop(other_inner);
                if changed {
                    world.push_updatable(other);
                }
                continue;
            }

            match world.get_neighbor_coarse(self.pos, face) {
                NeighborLookup::Generated(coarse) => {
                    if inner.last_neighbor[face as usize]
                        == Some((coarse.pos(), coarse.grid_version()))
                    {
                        continue;
                    }
                    let Some(coarse_inner) = coarse.try_lock() else {
                        return Err(MeshingError::MeshLocked { pos: coarse.pos() });
                    };
                    stitch_coarse_lod(self, inner, &coarse, &coarse_inner, face);
                }
                NeighborLookup::Pending => {
                    return Err(MeshingError::LodMissing {
                        pos: self.pos.neighbor(face),
                    });
                }
                NeighborLookup::Absent => {
                    if same_pending {
                        return Err(MeshingError::LodMissing {
                            pos: self.pos.neighbor(face),
                        });
                    }
                    // The outer border of the render volume faces nothing.
                    for primitive in inner.primitives.iter_mut() {
                        primitive.clear_neighbor(face);
                    }
                    inner.last_neighbor[face as usize] = None;
                }
            }
        }
        Ok(())
    }

    /// Concatenates the face lists into the upload buffer and refreshes the
    /// light cubes the new faces will sample. Returns whether anything
    /// changed; the caller hands changed meshes to the uploader.
    #[profiling::function]
    pub fn finish(&self, inner: &mut MeshInner, world: &LodManager) -> bool {
        let mut any_changed = false;
        for primitive in inner.primitives.iter_mut() {
            if primitive.was_changed {
                primitive.pack_complete();
                any_changed = true;
            }
        }
        if !any_changed {
            return false;
        }

        // Every face flags the 3×3×3 footprint of coarse light cells around
        // itself; the fragment shader samples within that halo.
        let mut flagged = [false; COARSE_VOLUME];
        for primitive in &inner.primitives {
            for face in primitive.complete() {
                let cell = face.cell();
                let base = IVec3::new(
                    coarse_cell_of(cell.x),
                    coarse_cell_of(cell.y),
                    coarse_cell_of(cell.z),
                );
                for dx in -1..=1 {
                    for dy in -1..=1 {
                        for dz in -1..=1 {
                            let coarse = (base + IVec3::new(dx, dy, dz))
                                .clamp(IVec3::ZERO, IVec3::splat(5));
                            flagged[coarse_index(coarse.x, coarse.y, coarse.z)] = true;
                        }
                    }
                }
            }
        }

        let chunk = &inner.chunk;
        let jobs: Vec<usize> = (0..COARSE_VOLUME).filter(|&i| flagged[i]).collect();
        let cubes: Vec<(usize, Option<Box<CompressedLightCube>>)> = jobs
            .par_iter()
            .map(|&index| (index, synthesize_light_cube(self.pos, chunk, world, index)))
            .collect();

        for (index, cube) in cubes {
            if cube.is_none() && inner.light.pointers[index] == 0 {
                continue;
            }
            inner.light.pending.push(LightCubeUpdate { index, cube });
        }
        true
    }
}

/// The visibility predicate: can `block`'s face toward `face` be seen
/// through the neighboring `other` cell?
///
/// Any non-cube model exposes all of its faces; an air neighbor always
/// exposes; a view-through neighbor of a different type exposes (water
/// against glass), while equal types hide each other's touching faces.
pub fn can_be_seen_through_other_block(
    block: Block,
    model: ModelRef,
    other: Block,
    face: Face,
) -> bool {
    if block.is_air() {
        return false;
    }
    let registry = BlockRegistry::global();
    let freestanding = !model.is_full_cube()
        && !registry
            .model_shape(model.index)
            .fills_face(model.permutation.apply(face));
    freestanding
        || other.is_air()
        || (block != other && other.view_through())
        || !registry.model(other).is_full_cube()
}

/// Walks one 32×32 boundary between same-LOD chunks and rebuilds the seam
/// faces on both sides.
fn stitch_same_lod(
    mesh: &ChunkMesh,
    inner: &mut MeshInner,
    other: &ChunkMesh,
    other_inner: &mut MeshInner,
    face: Face,
) {
    let opposite = face.opposite();
    for kind in MeshKind::ALL {
        inner.primitives[kind as usize].clear_neighbor(face);
        other_inner.primitives[kind as usize].clear_neighbor(opposite);
    }

    let rect = BoundaryRect::union(
        inner.open_rects[face as usize],
        other_inner.open_rects[opposite as usize],
    );
    if let Some(rect) = rect {
        let axis = face.axis();
        let (u_axis, v_axis) = face.tangents();
        for u in rect.min_u..=rect.max_u {
            for v in rect.min_v..=rect.max_v {
                let mut self_cell = IVec3::ZERO;
                self_cell[axis] = face.boundary_coord();
                self_cell[u_axis] = u;
                self_cell[v_axis] = v;
                let mut other_cell = self_cell;
                other_cell[axis] = opposite.boundary_coord();

                let a = inner.chunk.get_block(self_cell.x, self_cell.y, self_cell.z);
                let b = other_inner
                    .chunk
                    .get_block(other_cell.x, other_cell.y, other_cell.z);

                if !a.is_air() {
                    let model = a.model();
                    if can_be_seen_through_other_block(a, model, b, face) {
                        // The exposed cell lies in the other chunk; its
                        // wrapped coordinate is the opposite boundary.
                        inner.primitives[MeshKind::of(a) as usize].add_neighbor(
                            face,
                            FaceData::construct(a, model, other_cell, face, false),
                        );
                        if a.transparent() && a.has_back_face() {
                            inner.primitives[MeshKind::Transparent as usize].add_neighbor(
                                face,
                                FaceData::construct(a, model, self_cell, opposite, true),
                            );
                        }
                    }
                }
                if !b.is_air() {
                    let model = b.model();
                    if can_be_seen_through_other_block(b, model, a, opposite) {
                        other_inner.primitives[MeshKind::of(b) as usize].add_neighbor(
                            opposite,
                            FaceData::construct(b, model, self_cell, opposite, false),
                        );
                        if b.transparent() && b.has_back_face() {
                            other_inner.primitives[MeshKind::Transparent as usize].add_neighbor(
                                opposite,
                                FaceData::construct(b, model, other_cell, face, true),
                            );
                        }
                    }
                }
            }
        }
    }

    inner.last_neighbor[face as usize] = Some((other.pos(), other.grid_version()));
    other_inner.last_neighbor[opposite as usize] = Some((mesh.pos(), mesh.grid_version()));
}

/// Stitches against a neighbor one LOD coarser. Faces are only written
/// into this mesh, so the transition degrades gracefully: the coarser mesh
/// never learns about its finer neighbors.
fn stitch_coarse_lod(
    mesh: &ChunkMesh,
    inner: &mut MeshInner,
    coarse: &ChunkMesh,
    coarse_inner: &MeshInner,
    face: Face,
) {
    let opposite = face.opposite();
    for kind in MeshKind::ALL {
        inner.primitives[kind as usize].clear_neighbor(face);
    }

    let axis = face.axis();
    let (u_axis, v_axis) = face.tangents();
    let shift = IVec3::splat(mesh.pos().voxel_size_shift() as i32);
    // Which half of the coarse chunk this mesh occupies, in fine cells.
    let offset = (mesh.pos().world() - coarse.pos().world()) >> shift;

    for u in 0..CHUNK_SIZE {
        for v in 0..CHUNK_SIZE {
            let mut self_cell = IVec3::ZERO;
            self_cell[axis] = face.boundary_coord();
            self_cell[u_axis] = u;
            self_cell[v_axis] = v;
            let outside = self_cell + face.to_ivec3();
            let coarse_cell = ((outside + offset) >> IVec3::splat(1)) & IVec3::splat(CHUNK_MASK);

            let a = inner.chunk.get_block(self_cell.x, self_cell.y, self_cell.z);
            let b = coarse_inner
                .chunk
                .get_block(coarse_cell.x, coarse_cell.y, coarse_cell.z);

            if !a.is_air() {
                let model = a.model();
                if can_be_seen_through_other_block(a, model, b, face) {
                    let mut exposed = self_cell;
                    exposed[axis] = opposite.boundary_coord();
                    inner.primitives[MeshKind::of(a) as usize]
                        .add_neighbor(face, FaceData::construct(a, model, exposed, face, false));
                    if a.transparent() && a.has_back_face() {
                        inner.primitives[MeshKind::Transparent as usize].add_neighbor(
                            face,
                            FaceData::construct(a, model, self_cell, opposite, true),
                        );
                    }
                }
            }
            if !b.is_air() {
                let model = b.model();
                if can_be_seen_through_other_block(b, model, a, opposite) {
                    // The coarse block's face into this mesh; the exposed
                    // cell is ours and addresses at our resolution.
                    inner.primitives[MeshKind::of(b) as usize].add_neighbor(
                        face,
                        FaceData::construct(b, model, self_cell, opposite, false),
                    );
                    if b.transparent() && b.has_back_face() {
                        let mut solid = self_cell;
                        solid[axis] = opposite.boundary_coord();
                        inner.primitives[MeshKind::Transparent as usize]
                            .add_neighbor(face, FaceData::construct(b, model, solid, face, true));
                    }
                }
            }
        }
    }

    inner.last_neighbor[face as usize] = Some((coarse.pos(), coarse.grid_version()));
}

fn synthesize_light_cube(
    pos: ChunkPos,
    chunk: &Chunk,
    world: &LodManager,
    index: usize,
) -> Option<Box<CompressedLightCube>> {
    let (cx, cy, cz) = coarse_cell_of_index(index);
    let base = IVec3::new(cx, cy, cz) * CUBE_DIM - CUBE_DIM;

    let mut cube: Box<CompressedLightCube> = Box::new([0; 512]);
    let mut any = false;
    for x in 0..CUBE_DIM {
        for y in 0..CUBE_DIM {
            for z in 0..CUBE_DIM {
                let rel = base + IVec3::new(x, y, z);
                let channels = get_light_at(pos, chunk, world, rel);
                let packed = compress_channels(channels);
                if packed != 0 {
                    any = true;
                }
                cube[cube_sample_index(x, y, z)] = packed;
            }
        }
    }
    any.then_some(cube)
}

/// Resolves the six light channels at one voxel, crossing into a neighbor
/// mesh at any LOD when the coordinate leaves this chunk. Absent (or
/// momentarily locked) neighbors read as dark; the next finish pass
/// refreshes the cube.
fn get_light_at(pos: ChunkPos, chunk: &Chunk, world: &LodManager, rel: IVec3) -> [u8; 6] {
    if Chunk::lies_in_chunk(rel.x, rel.y, rel.z) {
        return chunk.light_at_cell(rel.x, rel.y, rel.z);
    }
    let world_pos = pos.world() + (rel << IVec3::splat(pos.voxel_size_shift() as i32));
    world.sample_light(world_pos, pos.voxel_size)
}

/// The per-direction neighbor context of a block update: the locked
/// neighbor mesh when the adjacent cell leaves the chunk.
pub type UpdateNeighbors<'a, 'b> = [Option<(&'a ChunkMesh, &'b mut MeshInner)>; 6];

impl ChunkMesh {
    /// Applies one block edit by rewriting only the face records around the
    /// cell, on both sides of any affected chunk boundary. The caller locks
    /// the relevant neighbor meshes up front and finishes every mesh whose
    /// primitives report a change. Returns false for a redundant write.
    pub fn update_block(
        &self,
        inner: &mut MeshInner,
        cell: IVec3,
        new_block: Block,
        neighbors: &mut UpdateNeighbors,
    ) -> bool {
        let old_block = inner.chunk.get_block(cell.x, cell.y, cell.z);
        if old_block == new_block {
            return false;
        }
        let old_model = old_block.model();
        let new_model = new_block.model();

        for face in Face::all() {
            let exposed = cell + face.to_ivec3();
            let in_chunk = Chunk::lies_in_chunk(exposed.x, exposed.y, exposed.z);
            let wrapped = exposed & IVec3::splat(CHUNK_MASK);

            let neighbor_block = if in_chunk {
                inner.chunk.get_block(exposed.x, exposed.y, exposed.z)
            } else {
                match &neighbors[face as usize] {
                    Some((_, neighbor_inner)) => {
                        neighbor_inner.chunk.get_block(wrapped.x, wrapped.y, wrapped.z)
                    }
                    None => Block::AIR,
                }
            };

            // This block's face toward the neighbor cell.
            let was = can_be_seen_through_other_block(old_block, old_model, neighbor_block, face);
            let will = can_be_seen_through_other_block(new_block, new_model, neighbor_block, face);
            {
                let self_lists = &mut inner.primitives;
                if was {
                    let kind = MeshKind::of(old_block) as usize;
                    if in_chunk {
                        self_lists[kind].remove_core(wrapped, face, false);
                    } else {
                        self_lists[kind].remove_neighbor(face, wrapped, face, false);
                    }
                    if old_block.transparent() && old_block.has_back_face() {
                        let transparent = &mut self_lists[MeshKind::Transparent as usize];
                        if in_chunk {
                            transparent.remove_core(cell, face.opposite(), true);
                        } else {
                            transparent.remove_neighbor(face, cell, face.opposite(), true);
                        }
                    }
                }
                if will {
                    let kind = MeshKind::of(new_block) as usize;
                    let record = FaceData::construct(new_block, new_model, wrapped, face, false);
                    if in_chunk {
                        self_lists[kind].add_core(record);
                    } else {
                        self_lists[kind].add_neighbor(face, record);
                    }
                    if new_block.transparent() && new_block.has_back_face() {
                        let back =
                            FaceData::construct(new_block, new_model, cell, face.opposite(), true);
                        let transparent = &mut self_lists[MeshKind::Transparent as usize];
                        if in_chunk {
                            transparent.add_core(back);
                        } else {
                            transparent.add_neighbor(face, back);
                        }
                    }
                }
            }

            // The neighbor block's face toward this cell.
            if !neighbor_block.is_air() {
                let neighbor_model = neighbor_block.model();
                let opposite = face.opposite();
                let neighbor_was = can_be_seen_through_other_block(
                    neighbor_block,
                    neighbor_model,
                    old_block,
                    opposite,
                );
                let neighbor_will = can_be_seen_through_other_block(
                    neighbor_block,
                    neighbor_model,
                    new_block,
                    opposite,
                );
                if neighbor_was == neighbor_will {
                    continue;
                }

                let kind = MeshKind::of(neighbor_block) as usize;
                let has_back =
                    neighbor_block.transparent() && neighbor_block.has_back_face();
                if in_chunk {
                    // Both cells are ours; the neighbor face lives in the core.
                    let lists = &mut inner.primitives;
                    if neighbor_was {
                        lists[kind].remove_core(cell, opposite, false);
                        if has_back {
                            lists[MeshKind::Transparent as usize].remove_core(exposed, face, true);
                        }
                    } else {
                        lists[kind].add_core(FaceData::construct(
                            neighbor_block,
                            neighbor_model,
                            cell,
                            opposite,
                            false,
                        ));
                        if has_back {
                            lists[MeshKind::Transparent as usize].add_core(FaceData::construct(
                                neighbor_block,
                                neighbor_model,
                                exposed,
                                face,
                                true,
                            ));
                        }
                    }
                } else if let Some((_, neighbor_inner)) = &mut neighbors[face as usize] {
                    // The face goes in the neighbor mesh's seam list that
                    // points back toward this chunk.
                    let lists = &mut neighbor_inner.primitives;
                    if neighbor_was {
                        lists[kind].remove_neighbor(opposite, cell, opposite, false);
                        if has_back {
                            lists[MeshKind::Transparent as usize]
                                .remove_neighbor(opposite, wrapped, face, true);
                        }
                    } else {
                        lists[kind].add_neighbor(
                            opposite,
                            FaceData::construct(neighbor_block, neighbor_model, cell, opposite, false),
                        );
                        if has_back {
                            lists[MeshKind::Transparent as usize].add_neighbor(
                                opposite,
                                FaceData::construct(
                                    neighbor_block,
                                    neighbor_model,
                                    wrapped,
                                    face,
                                    true,
                                ),
                            );
                        }
                    }
                }
            }
        }

        inner.chunk.update_block(cell.x, cell.y, cell.z, new_block);
        self.bump_grid_version();
        true
    }
}
