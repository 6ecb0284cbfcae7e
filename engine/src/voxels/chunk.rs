use glam::IVec3;

use crate::voxels::{block::Block, coord::ChunkPos, face::Face};

pub const CHUNK_SHIFT: i32 = 5;
pub const CHUNK_SIZE: i32 = 1 << CHUNK_SHIFT;
pub const CHUNK_MASK: i32 = CHUNK_SIZE - 1;
pub const CHUNK_VOLUME: usize = (CHUNK_SIZE as usize).pow(3);

/// Dense 32³ block storage for one chunk. A chunk with `voxel_size > 1`
/// stores one block per cell of that size.
pub struct Chunk {
    pub pos: ChunkPos,
    blocks: Box<[Block]>,
    /// Six light channels per voxel (RGB sun, RGB block), provided with the
    /// chunk payload. Empty until the chunk is populated.
    light: Box<[[u8; 6]]>,
    was_changed: bool,
    pub was_cleaned: bool,
    pub generated: bool,
}

impl Chunk {
    pub fn new(pos: ChunkPos) -> Self {
        Chunk {
            pos,
            blocks: vec![Block::AIR; CHUNK_VOLUME].into_boxed_slice(),
            light: Box::new([]),
            was_changed: false,
            was_cleaned: false,
            generated: false,
        }
    }

    /// Storage index for cell coordinates; z varies fastest, then x, then y.
    #[inline(always)]
    pub fn index(x: i32, y: i32, z: i32) -> usize {
        debug_assert!(Self::lies_in_chunk(x, y, z));
        (x << CHUNK_SHIFT | y << 2 * CHUNK_SHIFT | z) as usize
    }

    #[inline(always)]
    pub fn cell_of_index(index: usize) -> IVec3 {
        let index = index as i32;
        IVec3::new(
            index >> CHUNK_SHIFT & CHUNK_MASK,
            index >> 2 * CHUNK_SHIFT,
            index & CHUNK_MASK,
        )
    }

    #[inline(always)]
    pub fn lies_in_chunk(x: i32, y: i32, z: i32) -> bool {
        x & !CHUNK_MASK == 0 && y & !CHUNK_MASK == 0 && z & !CHUNK_MASK == 0
    }

    /// Converts a world coordinate to a cell coordinate; the result is only
    /// meaningful when the position lies in this chunk.
    #[inline(always)]
    pub fn world_to_cell(&self, world: IVec3) -> IVec3 {
        (world - self.pos.world()) >> IVec3::splat(self.pos.voxel_size_shift() as i32)
    }

    #[inline(always)]
    pub fn get_block(&self, x: i32, y: i32, z: i32) -> Block {
        self.blocks[Self::index(x, y, z)]
    }

    /// Unconditional write; records the change for remeshing.
    pub fn update_block(&mut self, x: i32, y: i32, z: i32, block: Block) {
        self.blocks[Self::index(x, y, z)] = block;
        self.set_changed();
    }

    /// Only overwrites air or degradable blocks; worldgen structures use
    /// this so they never cut into player-placed terrain.
    pub fn update_block_if_degradable(&mut self, x: i32, y: i32, z: i32, block: Block) {
        let index = Self::index(x, y, z);
        let current = self.blocks[index];
        if current.is_air() || current.degradable() {
            self.blocks[index] = block;
            self.set_changed();
        }
    }

    /// Unconditional write that does not mark the chunk changed; used while
    /// a generation pipeline is still filling the grid.
    pub fn update_block_in_generation(&mut self, x: i32, y: i32, z: i32, block: Block) {
        self.blocks[Self::index(x, y, z)] = block;
    }

    /// Replaces the whole grid from a chunk payload.
    pub fn populate(&mut self, blocks: Box<[Block]>, light: Box<[[u8; 6]]>) {
        assert_eq!(blocks.len(), CHUNK_VOLUME);
        self.blocks = blocks;
        self.light = light;
        self.generated = true;
        self.was_cleaned = false;
        self.set_changed();
    }

    #[inline(always)]
    pub fn light_at_cell(&self, x: i32, y: i32, z: i32) -> [u8; 6] {
        if self.light.is_empty() {
            return [0; 6];
        }
        self.light[Self::index(x, y, z)]
    }

    #[inline(always)]
    pub fn set_changed(&mut self) {
        self.was_changed = true;
    }

    #[inline(always)]
    pub fn was_changed(&self) -> bool {
        self.was_changed
    }

    #[inline(always)]
    pub fn clear_changed(&mut self) {
        self.was_changed = false;
    }

    /// Absorbs one octant of a twice-as-detailed child chunk.
    ///
    /// Each 2×2×2 group of child cells collapses to one cell here. A
    /// sub-cell scores the count of openings around it (out-of-chunk
    /// neighbor 1, transparent interior neighbor 5, opaque interior 0) and
    /// the winner is the first sub-cell within one point of the maximum,
    /// probed in the order `((x&1)*4 + (z&1)*2 + (y&1)) ^ i` of the target
    /// cell so that high-frequency patterns survive across the transition.
    pub fn update_from_lower_resolution(&mut self, child: &Chunk) {
        debug_assert_eq!(child.pos.voxel_size * 2, self.pos.voxel_size);

        // Cell offset of the child's octant within this chunk.
        let shift = self.pos.voxel_size_shift() as i32;
        let origin = (child.pos.world() - self.pos.world()) >> IVec3::splat(shift);
        debug_assert!(origin.min_element() >= 0 && origin.max_element() <= CHUNK_SIZE / 2);

        for x in 0..CHUNK_SIZE / 2 {
            for y in 0..CHUNK_SIZE / 2 {
                for z in 0..CHUNK_SIZE / 2 {
                    let mut scores = [None; 8];
                    let mut candidates = [Block::AIR; 8];
                    let mut max_score = 0u32;

                    for dx in 0..2 {
                        for dy in 0..2 {
                            for dz in 0..2 {
                                let octant = (dx * 4 + dz * 2 + dy) as usize;
                                let cell = IVec3::new(2 * x + dx, 2 * y + dy, 2 * z + dz);
                                let block = child.get_block(cell.x, cell.y, cell.z);
                                if block.is_air() {
                                    continue;
                                }

                                let mut score = 0;
                                for face in Face::all() {
                                    let neighbor = cell + face.to_ivec3();
                                    if !Self::lies_in_chunk(neighbor.x, neighbor.y, neighbor.z) {
                                        score += 1;
                                    } else if child
                                        .get_block(neighbor.x, neighbor.y, neighbor.z)
                                        .transparent()
                                    {
                                        score += 5;
                                    }
                                }

                                scores[octant] = Some(score);
                                candidates[octant] = block;
                                max_score = max_score.max(score);
                            }
                        }
                    }

                    let target = IVec3::new(origin.x + x, origin.y + y, origin.z + z);
                    let permutation_start =
                        (target.x & 1) * 4 + (target.z & 1) * 2 + (target.y & 1);
                    let mut chosen = Block::AIR;
                    for i in 0..8 {
                        let octant = (permutation_start ^ i) as usize;
                        if let Some(score) = scores[octant]
                            && score + 1 >= max_score
                        {
                            chosen = candidates[octant];
                            break;
                        }
                    }
                    self.blocks[Self::index(target.x, target.y, target.z)] = chosen;
                }
            }
        }

        self.set_changed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxels::block::test_fixture::{self, GLASS, STONE, WATER};

    fn chunk(pos: ChunkPos) -> Chunk {
        test_fixture::install_test_registry();
        Chunk::new(pos)
    }

    #[test]
    fn test_index_layout() {
        assert_eq!(Chunk::index(0, 0, 0), 0);
        assert_eq!(Chunk::index(0, 0, 1), 1);
        assert_eq!(Chunk::index(1, 0, 0), 32);
        assert_eq!(Chunk::index(0, 1, 0), 1024);
        assert_eq!(Chunk::index(31, 31, 31), CHUNK_VOLUME - 1);

        for index in [0usize, 1, 32, 1024, 4097, CHUNK_VOLUME - 1] {
            let cell = Chunk::cell_of_index(index);
            assert_eq!(Chunk::index(cell.x, cell.y, cell.z), index);
        }
    }

    #[test]
    fn test_write_policies() {
        let mut chunk = chunk(ChunkPos::new(0, 0, 0, 1));
        let stone = Block::from_typ(STONE);
        let water = Block::from_typ(WATER);
        let glass = Block::from_typ(GLASS);

        chunk.update_block_in_generation(1, 2, 3, stone);
        assert_eq!(chunk.get_block(1, 2, 3), stone);
        assert!(!chunk.was_changed());

        // Stone is not degradable, so the conditional write is a no-op.
        chunk.update_block_if_degradable(1, 2, 3, glass);
        assert_eq!(chunk.get_block(1, 2, 3), stone);
        assert!(!chunk.was_changed());

        // Water is degradable and air is always writable.
        chunk.update_block(1, 2, 3, water);
        assert!(chunk.was_changed());
        chunk.clear_changed();
        chunk.update_block_if_degradable(1, 2, 3, glass);
        assert_eq!(chunk.get_block(1, 2, 3), glass);
        assert!(chunk.was_changed());
    }

    #[test]
    fn test_world_to_cell_uses_voxel_size_shift() {
        let chunk = chunk(ChunkPos::new(64, 0, -128, 2));
        assert_eq!(chunk.world_to_cell(IVec3::new(64, 0, -128)), IVec3::ZERO);
        assert_eq!(
            chunk.world_to_cell(IVec3::new(70, 62, -66)),
            IVec3::new(3, 31, 31)
        );
    }

    #[test]
    fn test_downsample_prefers_exposed_blocks() {
        let mut child = chunk(ChunkPos::new(0, 0, 0, 1));
        let mut parent = Chunk::new(ChunkPos::new(0, 0, 0, 2));

        // A solid floor with a single glass block sitting on it. The glass
        // has five open neighbors, easily beating the floor's score, so the
        // downsampled cell keeps the glass.
        for x in 0..CHUNK_SIZE {
            for z in 0..CHUNK_SIZE {
                child.update_block(x, 0, z, Block::from_typ(STONE));
            }
        }
        child.update_block(4, 1, 4, Block::from_typ(GLASS));

        parent.update_from_lower_resolution(&child);
        assert!(parent.was_changed());
        assert_eq!(parent.get_block(2, 0, 2).typ(), GLASS);
        assert_eq!(parent.get_block(0, 0, 0).typ(), STONE);
        // Above the floor the child is all air.
        assert!(parent.get_block(0, 1, 0).is_air());
    }

    #[test]
    fn test_downsample_octant_origin() {
        let mut child = chunk(ChunkPos::new(32, 0, 0, 1));
        let mut parent = Chunk::new(ChunkPos::new(0, 0, 0, 2));

        child.update_block(0, 0, 0, Block::from_typ(STONE));
        parent.update_from_lower_resolution(&child);

        // The child covers the +X octant of the parent.
        assert_eq!(parent.get_block(16, 0, 0).typ(), STONE);
    }
}
