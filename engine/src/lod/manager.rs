use std::{
    collections::BinaryHeap,
    sync::{Arc, Mutex, MutexGuard},
    time::Instant,
};

use glam::{DVec3, IVec3};
use ordered_float::OrderedFloat;

use crate::{
    chunk_source::{ChunkPayload, ChunkSource},
    lod::node::{ChunkMeshNode, MeshStorage},
    math::frustum::Frustum,
    mesh_generation::chunk_mesh::{
        ChunkMesh, MeshInner, MeshUploader, MeshingError, UpdateNeighbors,
    },
    meshing_pool::{MeshJob, MeshingPool},
    voxels::{
        block::{Block, BlockRegistry},
        chunk::{CHUNK_MASK, CHUNK_SIZE, CHUNK_VOLUME, Chunk},
        coord::ChunkPos,
        face::Face,
    },
};

/// Highest permitted LOD exponent; voxel sizes range over 1..=32.
pub const MAX_HIGHEST_LOD: u32 = 5;

/// Result of a neighbor-mesh lookup.
pub enum NeighborLookup {
    Generated(Arc<ChunkMesh>),
    /// A node exists at the position but its chunk has not arrived yet.
    Pending,
    Absent,
}

struct UpdatableEntry {
    priority: OrderedFloat<f64>,
    mesh: Arc<ChunkMesh>,
}

impl PartialEq for UpdatableEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
    }
}

impl Eq for UpdatableEntry {}

impl PartialOrd for UpdatableEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for UpdatableEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority.cmp(&other.priority)
    }
}

struct QueuedBlockUpdate {
    pos: IVec3,
    block: Block,
}

/// Keeps a sphere of chunk meshes resident per LOD level around the
/// player, requests what is missing, evicts what fell out of range, and
/// drives the stitch/finish/upload pipeline within a frame-time budget.
pub struct LodManager {
    highest_lod: u32,
    /// One rolling-origin node array per LOD, each behind its own mutex so
    /// the render thread can swap an array while lookups run concurrently.
    storages: Vec<Mutex<MeshStorage>>,
    chunk_source: Arc<dyn ChunkSource>,
    pool: MeshingPool,
    /// Meshes waiting for their finalize-and-stitch, best priority first.
    updatable: Mutex<BinaryHeap<UpdatableEntry>>,
    block_updates: Mutex<Vec<QueuedBlockUpdate>>,
    /// Evicted nodes whose GPU state could not be released yet because a
    /// worker held the mesh mutex; retried every frame.
    clear_list: Mutex<Vec<Arc<ChunkMeshNode>>>,
    last_player: Mutex<DVec3>,
}

impl LodManager {
    pub fn new(
        chunk_source: Arc<dyn ChunkSource>,
        highest_lod: u32,
        worker_threads: usize,
    ) -> Arc<Self> {
        let highest_lod = highest_lod.min(MAX_HIGHEST_LOD);
        Arc::new_cyclic(|weak| LodManager {
            highest_lod,
            storages: (0..=highest_lod)
                .map(|lod| Mutex::new(MeshStorage::empty(1 << lod)))
                .collect(),
            chunk_source,
            pool: MeshingPool::start(weak.clone(), worker_threads),
            updatable: Mutex::new(BinaryHeap::new()),
            block_updates: Mutex::new(Vec::new()),
            clear_list: Mutex::new(Vec::new()),
            last_player: Mutex::new(DVec3::ZERO),
        })
    }

    pub fn highest_lod(&self) -> u32 {
        self.highest_lod
    }

    fn level_of(&self, voxel_size: u32) -> Option<usize> {
        let level = voxel_size.trailing_zeros() as usize;
        (level < self.storages.len()).then_some(level)
    }

    fn player(&self) -> DVec3 {
        *self.last_player.lock().unwrap()
    }

    /// Rebuilds each LOD window around the player, collects the meshes to
    /// draw this frame, sweeps out-of-range nodes, and issues one batched
    /// request for every newly materialized position.
    #[profiling::function]
    pub fn update_and_get_render_chunks(
        &self,
        player: DVec3,
        render_distance: i32,
        lod_factor: f64,
        frustum: &Frustum,
        out_meshes: &mut Vec<Arc<ChunkMesh>>,
    ) {
        *self.last_player.lock().unwrap() = player;

        let mut requests: Vec<ChunkPos> = Vec::new();
        let mut swept: Vec<(u32, MeshStorage)> = Vec::new();

        // Coarsest level first so children can clear freshly built parents'
        // octant bits.
        for lod in (0..=self.highest_lod).rev() {
            let voxel_size = 1u32 << lod;
            let width = CHUNK_SIZE << lod;
            let mut radius = (render_distance * CHUNK_SIZE * voxel_size as i32) as f64;
            if lod > 0 {
                radius *= lod_factor;
            }

            let min_cell = ((player - radius) / width as f64).floor().as_ivec3();
            let max_cell = ((player + radius) / width as f64).floor().as_ivec3();
            let mut fresh =
                MeshStorage::with_bounds(voxel_size, min_cell, max_cell - min_cell + 1);

            let mut storage = self.storages[lod as usize].lock().unwrap();

            // Every surviving node must be re-claimed below; whatever stays
            // flagged exits in the sweep.
            for node in storage.nodes() {
                node.mark_for_removal();
            }

            let radius_sq = radius * radius;
            let axis_distance_sq = |cell: i32, player_axis: f64| -> f64 {
                let min = (cell * width) as f64;
                let max = min + width as f64;
                let d = (min - player_axis).max(player_axis - max).max(0.0);
                d * d
            };

            for x in min_cell.x..=max_cell.x {
                let dx_sq = axis_distance_sq(x, player.x);
                if dx_sq > radius_sq {
                    continue;
                }
                for y in min_cell.y..=max_cell.y {
                    let dy_sq = axis_distance_sq(y, player.y);
                    if dx_sq + dy_sq > radius_sq {
                        continue;
                    }
                    for z in min_cell.z..=max_cell.z {
                        if dx_sq + dy_sq + axis_distance_sq(z, player.z) > radius_sq {
                            continue;
                        }

                        let cell = IVec3::new(x, y, z);
                        let pos = ChunkPos::new(x * width, y * width, z * width, voxel_size);
                        let node = match storage.get_cell(cell) {
                            Some(node) => {
                                node.mark_kept();
                                node.clone()
                            }
                            None => {
                                requests.push(pos);
                                ChunkMeshNode::new(pos)
                            }
                        };
                        fresh.set_cell(cell, node.clone());

                        let rel = (pos.world().as_dvec3() - player).as_vec3();
                        if frustum.test_aab(rel, glam::Vec3::splat(width as f32))
                            && node.mesh.drawable()
                        {
                            out_meshes.push(node.mesh.clone());
                        }

                        if node.mesh.generated() && lod < self.highest_lod {
                            self.occlude_parent_octant(&node);
                        }
                    }
                }
            }

            let old = std::mem::replace(&mut *storage, fresh);
            drop(storage);
            swept.push((lod, old));
        }

        for (lod, old) in swept {
            self.sweep_storage(lod, &old);
        }

        if !requests.is_empty() {
            requests.sort_unstable_by_key(|pos| {
                std::cmp::Reverse(OrderedFloat(pos.priority(player)))
            });
            self.chunk_source.request_chunks(&requests);
        }
    }

    /// Octant of the parent chunk this position covers.
    fn parent_octant(pos: ChunkPos) -> u8 {
        let shift = CHUNK_SIZE.trailing_zeros() + pos.voxel_size_shift();
        ((pos.wx >> shift & 1) | (pos.wy >> shift & 1) << 1 | (pos.wz >> shift & 1) << 2) as u8
    }

    fn parent_pos(pos: ChunkPos) -> ChunkPos {
        let parent_width = pos.width() * 2;
        ChunkPos::new(
            pos.wx & !(parent_width - 1),
            pos.wy & !(parent_width - 1),
            pos.wz & !(parent_width - 1),
            pos.voxel_size * 2,
        )
    }

    fn parent_node(&self, pos: ChunkPos) -> Option<Arc<ChunkMeshNode>> {
        let level = self.level_of(pos.voxel_size * 2)?;
        let parent = Self::parent_pos(pos);
        self.storages[level].lock().unwrap().get(parent).cloned()
    }

    fn occlude_parent_octant(&self, node: &ChunkMeshNode) {
        let pos = node.mesh.pos();
        if let Some(parent) = self.parent_node(pos)
            && parent.mesh.clear_octant(Self::parent_octant(pos))
        {
            parent
                .drawable_children
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    /// Destroys every node still flagged for removal. The parent octant
    /// reappears in the mesh's place and its same-LOD neighbors re-stitch
    /// their seams. Actual GPU release is deferred to the clear list.
    fn sweep_storage(&self, _lod: u32, old: &MeshStorage) {
        for node in old.nodes() {
            if !node.should_be_removed() {
                continue;
            }
            let pos = node.mesh.pos();

            if node.mesh.generated()
                && let Some(parent) = self.parent_node(pos)
                && parent.mesh.set_octant(Self::parent_octant(pos))
            {
                parent
                    .drawable_children
                    .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
            }

            for face in Face::all() {
                if let NeighborLookup::Generated(neighbor) = self.get_neighbor(pos, face) {
                    self.push_updatable(neighbor);
                }
            }

            self.clear_list.lock().unwrap().push(node.clone());
        }
    }

    /// Applies queued block updates, releases evicted meshes, then runs
    /// finalize-and-stitch on the best-priority meshes until the deadline.
    /// Transient failures re-queue for the next frame.
    #[profiling::function]
    pub fn update_meshes(&self, deadline: Instant, uploader: &mut dyn MeshUploader) {
        let pending_updates = std::mem::take(&mut *self.block_updates.lock().unwrap());
        for update in pending_updates {
            if !self.apply_block_update(&update) {
                self.block_updates.lock().unwrap().push(update);
            }
        }

        self.drain_clear_list(uploader);

        let mut deferred: Vec<Arc<ChunkMesh>> = Vec::new();
        while Instant::now() < deadline {
            let entry = self.updatable.lock().unwrap().pop();
            let Some(entry) = entry else {
                break;
            };
            let mesh = entry.mesh;

            // The mesh may have been evicted (and possibly replaced) since
            // it was queued.
            let still_current = match self.get_node(mesh.pos()) {
                Some(node) => Arc::ptr_eq(&node.mesh, &mesh),
                None => false,
            };
            if !still_current {
                continue;
            }

            let Some(mut inner) = mesh.try_lock() else {
                deferred.push(mesh);
                continue;
            };
            match mesh.finish_neighbors(&mut inner, self) {
                Ok(()) => {
                    let changed = mesh.finish(&mut inner, self);
                    if changed || inner.descriptor_slot.is_none() {
                        uploader.upload(&mesh, &mut inner);
                    }
                }
                Err(MeshingError::LodMissing { .. }) | Err(MeshingError::MeshLocked { .. }) => {
                    drop(inner);
                    deferred.push(mesh);
                }
            }
        }
        for mesh in deferred {
            self.push_updatable(mesh);
        }
    }

    fn drain_clear_list(&self, uploader: &mut dyn MeshUploader) {
        let nodes = std::mem::take(&mut *self.clear_list.lock().unwrap());
        for node in nodes {
            let mesh_arc = node.mesh.clone();
            match mesh_arc.try_lock() {
                Some(mut inner) => {
                    if !inner.chunk.was_cleaned {
                        uploader.release(&node.mesh, &mut inner);
                        inner.chunk.was_cleaned = true;
                    }
                }
                None => {
                    // A worker still holds the mesh; retry next frame.
                    self.clear_list.lock().unwrap().push(node);
                }
            }
        }
    }

    /// Queues a block write; applied synchronously at the start of the next
    /// `update_meshes` call.
    pub fn queue_block_update(&self, pos: IVec3, block: Block) {
        self.block_updates
            .lock()
            .unwrap()
            .push(QueuedBlockUpdate { pos, block });
    }

    /// Applies one queued update. Returns false when a required mutex is
    /// currently held and the update must be retried.
    fn apply_block_update(&self, update: &QueuedBlockUpdate) -> bool {
        let base = ChunkPos::new(
            update.pos.x & !CHUNK_MASK,
            update.pos.y & !CHUNK_MASK,
            update.pos.z & !CHUNK_MASK,
            1,
        );
        let Some(node) = self.get_node(base) else {
            // The chunk left the window while the update was queued.
            return true;
        };
        let mesh = node.mesh.clone();
        if !mesh.generated() {
            log::debug!("Dropping block update for ungenerated chunk at {:?}", base);
            return true;
        }
        let Some(mut inner) = mesh.try_lock() else {
            return false;
        };
        let cell = update.pos - base.world();

        let mut neighbor_arcs: [Option<Arc<ChunkMesh>>; 6] = Default::default();
        for face in Face::all() {
            let exposed = cell + face.to_ivec3();
            if !Chunk::lies_in_chunk(exposed.x, exposed.y, exposed.z)
                && let NeighborLookup::Generated(neighbor) = self.get_neighbor(base, face)
            {
                neighbor_arcs[face as usize] = Some(neighbor);
            }
        }
        let mut guards: [Option<MutexGuard<'_, MeshInner>>; 6] = Default::default();
        for index in 0..6 {
            if let Some(neighbor) = &neighbor_arcs[index] {
                match neighbor.try_lock() {
                    Some(guard) => guards[index] = Some(guard),
                    None => return false,
                }
            }
        }

        fn entry<'a, 'b>(
            arc: &'a Option<Arc<ChunkMesh>>,
            guard: &'b mut Option<MutexGuard<'a, MeshInner>>,
        ) -> Option<(&'a ChunkMesh, &'b mut MeshInner)> {
            match (arc, guard) {
                (Some(arc), Some(guard)) => Some((arc.as_ref(), &mut **guard)),
                _ => None,
            }
        }
        let [g0, g1, g2, g3, g4, g5] = &mut guards;
        let mut neighbors: UpdateNeighbors = [
            entry(&neighbor_arcs[0], g0),
            entry(&neighbor_arcs[1], g1),
            entry(&neighbor_arcs[2], g2),
            entry(&neighbor_arcs[3], g3),
            entry(&neighbor_arcs[4], g4),
            entry(&neighbor_arcs[5], g5),
        ];

        if !mesh.update_block(&mut inner, cell, update.block, &mut neighbors) {
            return true;
        }

        // The diff already rewrote the seams; refresh the snapshots so the
        // queued finish pass does not walk the boundaries again.
        let mut changed_neighbors: Vec<Arc<ChunkMesh>> = Vec::new();
        for face in Face::all() {
            if let Some((neighbor, neighbor_inner)) = &mut neighbors[face as usize] {
                inner.last_neighbor[face as usize] =
                    Some((neighbor.pos(), neighbor.grid_version()));
                neighbor_inner.last_neighbor[face.opposite() as usize] =
                    Some((mesh.pos(), mesh.grid_version()));
                if neighbor_inner.primitives.iter().any(|p| p.was_changed) {
                    changed_neighbors.push(neighbor_arcs[face as usize].clone().unwrap());
                }
            }
        }
        drop(neighbors);
        drop(guards);

        // Coarser LODs absorb the changed octant and remesh off-thread.
        let player = self.player();
        let mut child_guard = inner;
        let mut child_pos = base;
        for lod in 1..=self.highest_lod {
            let parent_pos = Self::parent_pos(child_pos);
            let Some(parent) = self.get_node(parent_pos) else {
                break;
            };
            if !parent.mesh.generated() {
                break;
            }
            let Some(mut parent_inner) = parent.mesh.try_lock() else {
                // The finer updates already landed; the parent refreshes
                // whenever its chunk next remeshes.
                log::debug!("Skipping LOD {} absorb at {:?}: mesh busy", lod, parent_pos);
                break;
            };
            parent_inner
                .chunk
                .update_from_lower_resolution(&child_guard.chunk);
            parent.mesh.bump_grid_version();
            self.pool
                .submit(MeshJob::Remesh(parent_pos), parent_pos.priority(player));
            child_guard = parent_inner;
            child_pos = parent_pos;
        }
        drop(child_guard);

        self.push_updatable(mesh);
        for neighbor in changed_neighbors {
            self.push_updatable(neighbor);
        }
        true
    }

    /// Hands a chunk payload to the worker pool.
    pub fn submit_chunk(&self, payload: ChunkPayload) {
        let priority = payload.pos.priority(self.player());
        self.pool.submit(MeshJob::Ingest(payload), priority);
    }

    /// Ingests a payload on the calling thread; used by single-threaded
    /// embedders and tests.
    pub fn submit_chunk_sync(&self, payload: ChunkPayload) {
        self.ingest_payload(payload);
    }

    pub(crate) fn run_mesh_job(&self, job: MeshJob) {
        match job {
            MeshJob::Ingest(payload) => self.ingest_payload(payload),
            MeshJob::Remesh(pos) => {
                let Some(node) = self.get_node(pos) else {
                    return;
                };
                if !node.mesh.generated() {
                    return;
                }
                let mut inner = node.mesh.lock();
                node.mesh.regenerate_main_mesh(&mut inner);
                drop(inner);
                self.push_updatable(node.mesh.clone());
            }
        }
    }

    fn ingest_payload(&self, payload: ChunkPayload) {
        let ChunkPayload {
            pos,
            mut blocks,
            light,
        } = payload;
        if blocks.len() != CHUNK_VOLUME {
            log::error!(
                "Discarding malformed chunk payload for {:?}: {} blocks",
                pos,
                blocks.len()
            );
            return;
        }
        let light = if light.len() == CHUNK_VOLUME || light.is_empty() {
            light
        } else {
            log::error!("Discarding malformed light data for {:?}", pos);
            Vec::new().into_boxed_slice()
        };

        let registry = BlockRegistry::global();
        let mut unknown = 0usize;
        for block in blocks.iter_mut() {
            if !registry.is_known_typ(block.typ()) {
                *block = Block::AIR;
                unknown += 1;
            }
        }
        if unknown > 0 {
            log::warn!(
                "Chunk payload for {:?} contained {} unknown block ids, substituted air",
                pos,
                unknown
            );
        }

        let Some(node) = self.get_node(pos) else {
            // Evicted while the payload was in flight; free it quietly.
            return;
        };
        let mesh = node.mesh.clone();
        let mut inner = mesh.lock();
        mesh.populate(&mut inner, blocks, light);
        drop(inner);
        self.push_updatable(mesh);
    }

    pub(crate) fn push_updatable(&self, mesh: Arc<ChunkMesh>) {
        let priority = mesh.pos().priority(self.player());
        self.updatable.lock().unwrap().push(UpdatableEntry {
            priority: OrderedFloat(priority),
            mesh,
        });
    }

    /// Whether the chunk position is still part of the current window; the
    /// worker pool checks this before running a queued job.
    pub fn is_still_needed(&self, pos: ChunkPos) -> bool {
        self.get_node(pos).is_some()
    }

    pub fn get_node(&self, pos: ChunkPos) -> Option<Arc<ChunkMeshNode>> {
        let level = self.level_of(pos.voxel_size)?;
        self.storages[level].lock().unwrap().get(pos).cloned()
    }

    /// The same-LOD neighbor mesh across `face`.
    pub fn get_neighbor(&self, pos: ChunkPos, face: Face) -> NeighborLookup {
        self.lookup(pos.neighbor(face))
    }

    /// The one-LOD-coarser mesh covering the region across `face`.
    pub fn get_neighbor_coarse(&self, pos: ChunkPos, face: Face) -> NeighborLookup {
        if self.level_of(pos.voxel_size * 2).is_none() {
            return NeighborLookup::Absent;
        }
        self.lookup(Self::parent_pos(pos.neighbor(face)))
    }

    fn lookup(&self, pos: ChunkPos) -> NeighborLookup {
        let Some(level) = self.level_of(pos.voxel_size) else {
            return NeighborLookup::Absent;
        };
        match self.storages[level].lock().unwrap().get(pos) {
            Some(node) if node.mesh.generated() => NeighborLookup::Generated(node.mesh.clone()),
            Some(_) => NeighborLookup::Pending,
            None => NeighborLookup::Absent,
        }
    }

    /// The block at a world position, read from the finest available LOD.
    /// Returns `None` when no populated chunk covers the position or its
    /// mesh is momentarily locked.
    pub fn get_block(&self, pos: IVec3) -> Option<Block> {
        for level in 0..self.storages.len() {
            let voxel_size = 1u32 << level;
            let width = CHUNK_SIZE << level;
            let aligned = ChunkPos::new(
                pos.x & !(width - 1),
                pos.y & !(width - 1),
                pos.z & !(width - 1),
                voxel_size,
            );
            let Some(node) = self.get_node(aligned) else {
                continue;
            };
            if !node.mesh.generated() {
                continue;
            }
            let Some(inner) = node.mesh.try_lock() else {
                continue;
            };
            let cell = inner.chunk.world_to_cell(pos);
            return Some(inner.chunk.get_block(cell.x, cell.y, cell.z));
        }
        None
    }

    /// The six light channels at a world position, starting the search at
    /// the given LOD and falling back to coarser meshes, then darkness.
    pub fn sample_light(&self, pos: IVec3, voxel_size: u32) -> [u8; 6] {
        let mut voxel_size = voxel_size;
        while let Some(level) = self.level_of(voxel_size) {
            let width = CHUNK_SIZE << level;
            let aligned = ChunkPos::new(
                pos.x & !(width - 1),
                pos.y & !(width - 1),
                pos.z & !(width - 1),
                voxel_size,
            );
            if let Some(node) = self.get_node(aligned)
                && node.mesh.generated()
                && let Some(inner) = node.mesh.try_lock()
            {
                let cell = inner.chunk.world_to_cell(pos);
                return inner.chunk.light_at_cell(cell.x, cell.y, cell.z);
            }
            voxel_size <<= 1;
        }
        [0; 6]
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeSet,
        time::{Duration, Instant},
    };

    use glam::Vec3;

    use super::*;
    use crate::{
        mesh_generation::{
            light::{COARSE_VOLUME, coarse_index},
            primitive_mesh::MeshKind,
        },
        voxels::block::test_fixture::{self, STONE},
    };

    struct RecordingChunkSource {
        batches: Mutex<Vec<Vec<ChunkPos>>>,
    }

    impl RecordingChunkSource {
        fn new() -> Arc<Self> {
            Arc::new(RecordingChunkSource {
                batches: Mutex::new(Vec::new()),
            })
        }

        fn take_batches(&self) -> Vec<Vec<ChunkPos>> {
            std::mem::take(&mut self.batches.lock().unwrap())
        }
    }

    impl ChunkSource for RecordingChunkSource {
        fn request_chunks(&self, requests: &[ChunkPos]) {
            self.batches.lock().unwrap().push(requests.to_vec());
        }
    }

    struct CountingUploader {
        uploads: Vec<ChunkPos>,
        releases: Vec<ChunkPos>,
        next_light_slot: u32,
        next_descriptor_slot: u32,
    }

    impl CountingUploader {
        fn new() -> Self {
            CountingUploader {
                uploads: Vec::new(),
                releases: Vec::new(),
                // Light slot 0 is the reserved all-zero cube.
                next_light_slot: 1,
                next_descriptor_slot: 0,
            }
        }
    }

    impl MeshUploader for CountingUploader {
        fn upload(&mut self, mesh: &ChunkMesh, inner: &mut MeshInner) {
            for kind in MeshKind::ALL {
                mesh.set_draw_data(kind, 0, inner.primitives[kind as usize].face_count() as u32);
            }
            if inner.descriptor_slot.is_none() {
                inner.descriptor_slot = Some(self.next_descriptor_slot);
                self.next_descriptor_slot += 1;
            }
            for update in std::mem::take(&mut inner.light.pending) {
                match update.cube {
                    Some(_) => {
                        if inner.light.pointers[update.index] == 0 {
                            inner.light.pointers[update.index] = self.next_light_slot;
                            self.next_light_slot += 1;
                        }
                    }
                    None => inner.light.pointers[update.index] = 0,
                }
            }
            self.uploads.push(mesh.pos());
        }

        fn release(&mut self, mesh: &ChunkMesh, inner: &mut MeshInner) {
            for kind in MeshKind::ALL {
                mesh.set_draw_data(kind, 0, 0);
            }
            inner.descriptor_slot = None;
            inner.light.pointers = [0; COARSE_VOLUME];
            self.releases.push(mesh.pos());
        }
    }

    fn make_world(highest_lod: u32) -> (Arc<LodManager>, Arc<RecordingChunkSource>) {
        test_fixture::install_test_registry();
        let source = RecordingChunkSource::new();
        let manager = LodManager::new(source.clone(), highest_lod, 0);
        (manager, source)
    }

    fn wide_frustum() -> Frustum {
        Frustum::new(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y, 3.0, 1.0, 100_000.0)
    }

    fn update_window(manager: &LodManager, player: DVec3, rd: i32) -> Vec<Arc<ChunkMesh>> {
        let mut out = Vec::new();
        manager.update_and_get_render_chunks(player, rd, 1.0, &wide_frustum(), &mut out);
        out
    }

    fn payload_with(pos: ChunkPos, fill: impl Fn(IVec3) -> Block) -> ChunkPayload {
        let mut blocks = vec![Block::AIR; CHUNK_VOLUME].into_boxed_slice();
        for x in 0..CHUNK_SIZE {
            for y in 0..CHUNK_SIZE {
                for z in 0..CHUNK_SIZE {
                    blocks[Chunk::index(x, y, z)] = fill(IVec3::new(x, y, z));
                }
            }
        }
        ChunkPayload::new(pos, blocks, Box::new([]))
    }

    fn air_payload(pos: ChunkPos) -> ChunkPayload {
        payload_with(pos, |_| Block::AIR)
    }

    fn solid_payload(pos: ChunkPos) -> ChunkPayload {
        payload_with(pos, |_| Block::from_typ(STONE))
    }

    /// Answers every outstanding request through `gen`; `None` leaves the
    /// node pending.
    fn populate_requested(
        manager: &LodManager,
        source: &RecordingChunkSource,
        generate: impl Fn(ChunkPos) -> Option<ChunkPayload>,
    ) {
        for batch in source.take_batches() {
            for pos in batch {
                if let Some(payload) = generate(pos) {
                    manager.submit_chunk_sync(payload);
                }
            }
        }
    }

    fn settle(manager: &LodManager, uploader: &mut CountingUploader) {
        for _ in 0..3 {
            manager.update_meshes(Instant::now() + Duration::from_secs(5), uploader);
        }
    }

    fn mesh_at(manager: &LodManager, pos: ChunkPos) -> Arc<ChunkMesh> {
        manager.get_node(pos).expect("node should exist").mesh.clone()
    }

    #[test]
    fn test_requests_are_batched_and_prioritized() {
        let (manager, source) = make_world(0);
        update_window(&manager, DVec3::splat(16.0), 2);

        let batches = source.take_batches();
        assert_eq!(batches.len(), 1, "one RPC per frame");
        let batch = &batches[0];
        assert!(!batch.is_empty());
        // The chunk containing the player comes first.
        assert_eq!(batch[0], ChunkPos::new(0, 0, 0, 1));
        // Re-running the window issues no new requests.
        update_window(&manager, DVec3::splat(16.0), 2);
        assert!(source.take_batches().is_empty());
    }

    #[test]
    fn test_single_cube_scenario() {
        let (manager, source) = make_world(0);
        let player = DVec3::splat(16.0);
        update_window(&manager, player, 2);

        let center = ChunkPos::new(0, 0, 0, 1);
        populate_requested(&manager, &source, |pos| {
            if pos == center {
                Some(payload_with(pos, |cell| {
                    if cell == IVec3::splat(16) {
                        Block::from_typ(STONE)
                    } else {
                        Block::AIR
                    }
                }))
            } else {
                Some(air_payload(pos))
            }
        });

        let mut uploader = CountingUploader::new();
        settle(&manager, &mut uploader);

        let mesh = mesh_at(&manager, center);
        assert_eq!(mesh.visibility_mask(), 0xFF);
        assert_eq!(mesh.face_count(MeshKind::Opaque), 6);
        assert_eq!(mesh.face_count(MeshKind::VoxelModel), 0);
        assert_eq!(mesh.face_count(MeshKind::Transparent), 0);
        assert!(mesh.drawable());

        let inner = mesh.lock();
        assert!(inner.descriptor_slot.is_some());
        let opaque = &inner.primitives[MeshKind::Opaque as usize];
        assert_eq!(opaque.face_count(), 6);
        assert!(opaque.neighbor.iter().all(|list| list.is_empty()));
        for face in opaque.complete() {
            assert!(!face.is_back_face());
            assert_eq!(face.typ(), STONE);
        }
        assert!(
            opaque
                .complete()
                .iter()
                .any(|f| f.cell() == IVec3::new(17, 16, 16) && f.normal() == Face::Right)
        );
        drop(inner);

        // The finished mesh is part of the visible set.
        let visible = update_window(&manager, player, 2);
        assert!(visible.iter().any(|m| m.pos() == center));
    }

    #[test]
    fn test_face_culling_across_chunks() {
        let (manager, source) = make_world(0);
        let player = DVec3::new(32.0, 16.0, 16.0);
        update_window(&manager, player, 3);

        let a_pos = ChunkPos::new(0, 0, 0, 1);
        let b_pos = ChunkPos::new(32, 0, 0, 1);
        populate_requested(&manager, &source, |pos| {
            if pos == a_pos {
                Some(payload_with(pos, |cell| {
                    if cell.x == 31 { Block::from_typ(STONE) } else { Block::AIR }
                }))
            } else if pos == b_pos {
                Some(payload_with(pos, |cell| {
                    if cell.x == 0 { Block::from_typ(STONE) } else { Block::AIR }
                }))
            } else {
                Some(air_payload(pos))
            }
        });

        let mut uploader = CountingUploader::new();
        settle(&manager, &mut uploader);

        let a = mesh_at(&manager, a_pos);
        let b = mesh_at(&manager, b_pos);
        let a_inner = a.lock();
        let b_inner = b.lock();
        for kind in MeshKind::ALL {
            assert!(
                a_inner.primitives[kind as usize].neighbor[Face::Right as usize].is_empty(),
                "solid-against-solid boundary emits nothing"
            );
            assert!(
                b_inner.primitives[kind as usize].neighbor[Face::Left as usize].is_empty()
            );
        }
        // The interior sides of both walls are fully exposed.
        assert_eq!(a_inner.primitives[MeshKind::Opaque as usize].core.len(), 1024);
        assert_eq!(b_inner.primitives[MeshKind::Opaque as usize].core.len(), 1024);
    }

    #[test]
    fn test_lod_seam_scenario() {
        let (manager, source) = make_world(1);
        let player = DVec3::splat(16.0);
        update_window(&manager, player, 2);

        let center = ChunkPos::new(0, 0, 0, 1);
        populate_requested(&manager, &source, |pos| {
            if pos == center {
                Some(solid_payload(pos))
            } else if pos.voxel_size == 2 {
                Some(air_payload(pos))
            } else {
                // LOD-0 neighbors never arrive; stitching falls back to the
                // coarser meshes.
                None
            }
        });

        let mut uploader = CountingUploader::new();
        settle(&manager, &mut uploader);

        let mesh = mesh_at(&manager, center);
        let inner = mesh.lock();
        let seam = &inner.primitives[MeshKind::Opaque as usize].neighbor[Face::Right as usize];
        assert_eq!(seam.len(), 1024, "one face per boundary cell, no holes");
        let mut cells: BTreeSet<(i32, i32)> = BTreeSet::new();
        for face in seam {
            assert_eq!(face.normal(), Face::Right);
            assert_eq!(face.typ(), STONE);
            assert_eq!(face.cell().x, 0, "exposed cell wraps into [0, 31]");
            cells.insert((face.cell().y, face.cell().z));
        }
        assert_eq!(cells.len(), 1024);
        drop(inner);

        // Nothing was pushed into the coarse mesh.
        let coarse = mesh_at(&manager, ChunkPos::new(0, 0, 0, 2));
        let coarse_inner = coarse.lock();
        for kind in MeshKind::ALL {
            assert!(coarse_inner.primitives[kind as usize].core.is_empty());
            assert!(
                coarse_inner.primitives[kind as usize]
                    .neighbor
                    .iter()
                    .all(|list| list.is_empty())
            );
        }
        drop(coarse_inner);

        // The generated child claims its octant of the parent.
        update_window(&manager, player, 2);
        assert_eq!(coarse.visibility_mask(), 0xFE);
    }

    #[test]
    fn test_block_update_near_chunk_boundary() {
        let (manager, source) = make_world(0);
        let player = DVec3::splat(16.0);
        update_window(&manager, player, 2);

        let a_pos = ChunkPos::new(0, 0, 0, 1);
        let n_pos = ChunkPos::new(-32, 0, 0, 1);
        populate_requested(&manager, &source, |pos| {
            if pos == a_pos || pos == n_pos {
                Some(solid_payload(pos))
            } else {
                Some(air_payload(pos))
            }
        });

        let mut uploader = CountingUploader::new();
        settle(&manager, &mut uploader);
        uploader.uploads.clear();

        manager.queue_block_update(IVec3::new(0, 15, 15), Block::AIR);
        manager.update_meshes(Instant::now() + Duration::from_secs(5), &mut uploader);

        let a = mesh_at(&manager, a_pos);
        let n = mesh_at(&manager, n_pos);
        {
            let a_inner = a.lock();
            let core = &a_inner.primitives[MeshKind::Opaque as usize].core;
            assert_eq!(core.len(), 5, "five interior neighbors expose a face");
            for face in core {
                assert_eq!(face.cell(), IVec3::new(0, 15, 15));
            }

            let n_inner = n.lock();
            let seam = &n_inner.primitives[MeshKind::Opaque as usize].neighbor[Face::Right as usize];
            assert_eq!(seam.len(), 1, "one seam face into the removed cell");
            assert_eq!(seam[0].cell(), IVec3::new(0, 15, 15));
            assert_eq!(seam[0].normal(), Face::Right);
        }

        // Exactly the two affected meshes were re-uploaded.
        let uploaded: BTreeSet<[i32; 3]> =
            uploader.uploads.iter().map(|p| [p.wx, p.wy, p.wz]).collect();
        let expected: BTreeSet<[i32; 3]> = [[0, 0, 0], [-32, 0, 0]].into_iter().collect();
        assert_eq!(uploaded, expected);

        // A redundant update is invisible.
        uploader.uploads.clear();
        manager.queue_block_update(IVec3::new(0, 15, 15), Block::AIR);
        manager.update_meshes(Instant::now() + Duration::from_secs(5), &mut uploader);
        assert!(uploader.uploads.is_empty());
    }

    #[test]
    fn test_insert_and_remove_chunk_restores_neighbors() {
        let (manager, source) = make_world(0);
        let near = DVec3::splat(16.0);
        let far = DVec3::new(48.0, 16.0, 16.0);
        let b_pos = ChunkPos::new(64, 0, 0, 1);
        let a_pos = ChunkPos::new(96, 0, 0, 1);

        let generate = |pos: ChunkPos| {
            if pos == b_pos {
                Some(solid_payload(pos))
            } else {
                Some(air_payload(pos))
            }
        };

        update_window(&manager, near, 2);
        assert!(manager.get_node(a_pos).is_none(), "A starts outside the window");
        populate_requested(&manager, &source, generate);
        let mut uploader = CountingUploader::new();
        settle(&manager, &mut uploader);

        let b = mesh_at(&manager, b_pos);
        let snapshot = |mesh: &ChunkMesh| -> Vec<Vec<u64>> {
            let inner = mesh.lock();
            inner
                .primitives
                .iter()
                .map(|p| p.complete().iter().map(|f| f.into_bits()).collect())
                .collect()
        };
        let before = snapshot(&b);
        assert!(b.lock().primitives[MeshKind::Opaque as usize].neighbor[Face::Right as usize]
            .is_empty());

        // The player moves toward +X; A materializes and stitches.
        update_window(&manager, far, 2);
        populate_requested(&manager, &source, generate);
        settle(&manager, &mut uploader);
        assert_eq!(
            b.lock().primitives[MeshKind::Opaque as usize].neighbor[Face::Right as usize].len(),
            1024
        );

        // Moving back evicts A; B returns to its exact previous state.
        update_window(&manager, near, 2);
        assert!(manager.get_node(a_pos).is_none());
        settle(&manager, &mut uploader);
        let after = snapshot(&b);
        assert_eq!(before, after);
    }

    #[test]
    fn test_eviction_under_load_defers_to_clear_list() {
        let (manager, source) = make_world(1);
        let near = DVec3::splat(16.0);
        update_window(&manager, near, 2);

        let m_pos = ChunkPos::new(0, 0, 0, 1);
        populate_requested(&manager, &source, |pos| {
            if pos == m_pos {
                Some(solid_payload(pos))
            } else {
                Some(air_payload(pos))
            }
        });
        let mut uploader = CountingUploader::new();
        settle(&manager, &mut uploader);
        update_window(&manager, near, 2);

        let parent = mesh_at(&manager, ChunkPos::new(0, 0, 0, 2));
        assert_eq!(parent.visibility_mask() & 1, 0, "child occludes octant 0");

        let m = mesh_at(&manager, m_pos);
        let guard = m.lock();

        // The player leaves LOD-0 range of M while its parent stays.
        let away = DVec3::new(116.0, 16.0, 16.0);
        update_window(&manager, away, 2);
        assert!(manager.get_node(m_pos).is_none());
        assert_eq!(parent.visibility_mask() & 1, 1, "octant bit restored on exit");

        // The worker still holds the mesh; release is deferred.
        manager.update_meshes(Instant::now() + Duration::from_secs(1), &mut uploader);
        assert!(!uploader.releases.contains(&m_pos));

        drop(guard);
        manager.update_meshes(Instant::now() + Duration::from_secs(1), &mut uploader);
        assert!(uploader.releases.contains(&m_pos));
        assert_eq!(m.face_count(MeshKind::Opaque), 0);
        assert!(m.lock().chunk.was_cleaned);
    }

    #[test]
    fn test_visibility_mask_coherence() {
        let (manager, source) = make_world(1);
        let player = DVec3::splat(16.0);
        update_window(&manager, player, 2);

        let children = [ChunkPos::new(0, 0, 0, 1), ChunkPos::new(32, 32, 32, 1)];
        populate_requested(&manager, &source, |pos| {
            if children.contains(&pos) {
                Some(solid_payload(pos))
            } else if pos.voxel_size == 2 {
                Some(air_payload(pos))
            } else {
                None
            }
        });
        update_window(&manager, player, 2);

        // Octants 0 and 7 of the shared parent are covered.
        let parent = mesh_at(&manager, ChunkPos::new(0, 0, 0, 2));
        assert_eq!(parent.visibility_mask(), 0x7E);

        // A parent with no generated children keeps the full mask.
        let lonely = mesh_at(&manager, ChunkPos::new(64, 0, 0, 2));
        assert_eq!(lonely.visibility_mask(), 0xFF);

        assert_eq!(
            manager
                .get_node(ChunkPos::new(0, 0, 0, 2))
                .unwrap()
                .drawable_children
                .load(std::sync::atomic::Ordering::Relaxed),
            2
        );
    }

    #[test]
    fn test_light_cubes_and_pointer_discipline() {
        let (manager, source) = make_world(0);
        let player = DVec3::splat(16.0);
        update_window(&manager, player, 2);

        let center = ChunkPos::new(0, 0, 0, 1);
        populate_requested(&manager, &source, |pos| {
            if pos == center {
                let mut payload = payload_with(pos, |cell| {
                    if cell == IVec3::splat(16) {
                        Block::from_typ(STONE)
                    } else {
                        Block::AIR
                    }
                });
                payload.light = vec![[64, 32, 16, 8, 96, 128]; CHUNK_VOLUME].into_boxed_slice();
                Some(payload)
            } else {
                Some(air_payload(pos))
            }
        });

        let mut uploader = CountingUploader::new();
        settle(&manager, &mut uploader);

        let mesh = mesh_at(&manager, center);
        let inner = mesh.lock();
        // Cells in the 3×3×3 footprint around the cube are lit and own a
        // slab slot; slot 0 stays reserved for the unlit remainder.
        assert_ne!(inner.light.pointers[coarse_index(2, 2, 2)], 0);
        assert_ne!(inner.light.pointers[coarse_index(3, 3, 3)], 0);
        assert_eq!(inner.light.pointers[coarse_index(0, 0, 0)], 0);
        assert_eq!(inner.light.pointers[coarse_index(5, 5, 5)], 0);

        // Lookups resolve through the window.
        drop(inner);
        assert_eq!(
            manager.get_block(IVec3::new(16, 16, 16)),
            Some(Block::from_typ(STONE))
        );
        assert_eq!(manager.get_block(IVec3::new(0, 0, 0)), Some(Block::AIR));
        assert_eq!(
            manager.sample_light(IVec3::new(10, 10, 10), 1),
            [64, 32, 16, 8, 96, 128]
        );
        assert_eq!(manager.sample_light(IVec3::new(4000, 0, 0), 1), [0; 6]);
    }
}
