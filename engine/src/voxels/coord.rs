use std::hash::{Hash, Hasher};

use glam::{DVec3, IVec3};

use crate::voxels::{
    chunk::{CHUNK_SHIFT, CHUNK_SIZE},
    face::Face,
};

/// Identity of a chunk: the world position of its minimum corner and the
/// edge length of one voxel cell. `voxel_size` is a power of two and every
/// world coordinate is a multiple of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPos {
    pub wx: i32,
    pub wy: i32,
    pub wz: i32,
    pub voxel_size: u32,
}

impl ChunkPos {
    #[inline(always)]
    pub const fn new(wx: i32, wy: i32, wz: i32, voxel_size: u32) -> Self {
        debug_assert!(voxel_size.is_power_of_two());
        ChunkPos {
            wx,
            wy,
            wz,
            voxel_size,
        }
    }

    #[inline(always)]
    pub const fn world(&self) -> IVec3 {
        IVec3::new(self.wx, self.wy, self.wz)
    }

    /// log2 of `voxel_size`; converts voxel coordinates to cell coordinates.
    #[inline(always)]
    pub const fn voxel_size_shift(&self) -> u32 {
        self.voxel_size.trailing_zeros()
    }

    /// Edge length of the whole chunk in world units.
    #[inline(always)]
    pub const fn width(&self) -> i32 {
        CHUNK_SIZE << self.voxel_size_shift()
    }

    /// The same-size chunk across the given direction.
    #[inline(always)]
    pub fn neighbor(&self, face: Face) -> ChunkPos {
        let offset = face.to_ivec3() * self.width();
        ChunkPos::new(
            self.wx + offset.x,
            self.wy + offset.y,
            self.wz + offset.z,
            self.voxel_size,
        )
    }

    /// Spreads the coordinate bits with shift-and-multiply mixing.
    pub fn hash_code(&self) -> u32 {
        let mut h = (self.wx as u32 >> CHUNK_SHIFT).wrapping_mul(0x9E37_79B9);
        h = (h ^ (self.wy as u32 >> CHUNK_SHIFT)).wrapping_mul(0x85EB_CA6B);
        h = (h ^ (self.wz as u32 >> CHUNK_SHIFT)).wrapping_mul(0xC2B2_AE35);
        h ^= self.voxel_size_shift() << 5;
        h ^ h >> 16
    }

    /// Squared distance from `point` to the closest point of the chunk AABB;
    /// zero inside.
    pub fn min_distance_squared(&self, point: DVec3) -> f64 {
        let min = self.world().as_dvec3();
        let max = min + DVec3::splat(self.width() as f64);
        let clamped = point.clamp(min, max);
        (point - clamped).length_squared()
    }

    /// Squared distance from `point` to the farthest corner of the chunk AABB.
    pub fn max_distance_squared(&self, point: DVec3) -> f64 {
        let min = self.world().as_dvec3();
        let max = min + DVec3::splat(self.width() as f64);
        let farthest = DVec3::select((point - min).abs().cmpgt((point - max).abs()), min, max);
        (point - farthest).length_squared()
    }

    /// Squared distance from `point` to the chunk center.
    pub fn center_distance_squared(&self, point: DVec3) -> f64 {
        let center = self.world().as_dvec3() + DVec3::splat(self.width() as f64 * 0.5);
        (point - center).length_squared()
    }

    /// Rendering priority: near chunks first, with distance measured in
    /// voxel cells so each LOD level is ranked on the area it covers.
    pub fn priority(&self, player: DVec3) -> f64 {
        let voxel_size = self.voxel_size as f64;
        -self.min_distance_squared(player) / (voxel_size * voxel_size)
            + 2.0 * voxel_size.log2() * (CHUNK_SIZE * CHUNK_SIZE) as f64
    }
}

impl Hash for ChunkPos {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.hash_code());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neighbor_offsets_scale_with_voxel_size() {
        let pos = ChunkPos::new(0, 0, 0, 2);
        assert_eq!(pos.width(), 64);
        assert_eq!(pos.neighbor(Face::Right), ChunkPos::new(64, 0, 0, 2));
        assert_eq!(pos.neighbor(Face::Bottom), ChunkPos::new(0, -64, 0, 2));
    }

    #[test]
    fn test_hash_distinguishes_lod() {
        let fine = ChunkPos::new(0, 0, 0, 1);
        let coarse = ChunkPos::new(0, 0, 0, 2);
        assert_ne!(fine.hash_code(), coarse.hash_code());
        assert_eq!(fine.hash_code(), ChunkPos::new(0, 0, 0, 1).hash_code());
    }

    #[test]
    fn test_distances_clamp_inside() {
        let pos = ChunkPos::new(0, 0, 0, 1);
        let inside = DVec3::new(5.0, 20.0, 31.0);
        assert_eq!(pos.min_distance_squared(inside), 0.0);
        assert!(pos.max_distance_squared(inside) > 0.0);

        let outside = DVec3::new(-3.0, 0.0, 0.0);
        assert_eq!(pos.min_distance_squared(outside), 9.0);
        // Farthest corner is (32, 32, 32).
        assert_eq!(
            pos.max_distance_squared(outside),
            35.0 * 35.0 + 32.0 * 32.0 + 32.0 * 32.0
        );
    }

    #[test]
    fn test_priority_prefers_near() {
        let player = DVec3::splat(16.0);
        let near = ChunkPos::new(0, 0, 0, 1);
        let far = ChunkPos::new(256, 0, 0, 1);
        assert!(near.priority(player) > far.priority(player));
        assert_eq!(near.priority(player), 0.0);

        // A containing coarser chunk ranks by its covered area.
        let coarse = ChunkPos::new(0, 0, 0, 2);
        assert_eq!(coarse.priority(player), 2.0 * 1024.0);
    }
}
