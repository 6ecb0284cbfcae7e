use bitfield_struct::bitfield;
use glam::IVec3;

use crate::voxels::{
    block::{Block, ModelRef},
    chunk::CHUNK_MASK,
    face::Face,
};

/// One quad emitted by the mesher, packed to 64 bits for the face buffer.
///
/// The position is the cell the face is exposed to, not the solid cell;
/// light interpolation around the face reads the same address for every
/// face on that cell. Seam faces wrap the exposed cell of the adjacent
/// chunk back into `[0, 31]` along the seam axis; the direction of the
/// neighbor list they live in recovers the true plane.
#[bitfield(u64)]
pub struct FaceData {
    #[bits(5)]
    pub x: u8,
    #[bits(5)]
    pub y: u8,
    #[bits(5)]
    pub z: u8,
    pub is_back_face: bool,
    #[bits(3)]
    pub normal_index: u8,
    #[bits(6)]
    pub permutation: u8,
    #[bits(7)]
    __: u8,
    pub typ: u16,
    pub model_index: u16,
}

impl FaceData {
    /// Builds a face record for `block` exposed at `cell` toward `normal`.
    /// The cell is masked into chunk range, wrapping out-of-chunk seam
    /// coordinates.
    pub fn construct(block: Block, model: ModelRef, cell: IVec3, normal: Face, back: bool) -> Self {
        FaceData::new()
            .with_x((cell.x & CHUNK_MASK) as u8)
            .with_y((cell.y & CHUNK_MASK) as u8)
            .with_z((cell.z & CHUNK_MASK) as u8)
            .with_is_back_face(back)
            .with_normal_index(normal as u8)
            .with_permutation(model.permutation.into_bits())
            .with_typ(block.typ())
            .with_model_index(model.index)
    }

    #[inline(always)]
    pub fn cell(&self) -> IVec3 {
        IVec3::new(self.x() as i32, self.y() as i32, self.z() as i32)
    }

    #[inline(always)]
    pub fn normal(&self) -> Face {
        Face::from_index(self.normal_index())
    }

    /// Whether two records describe the same face slot, ignoring content.
    #[inline(always)]
    pub fn same_slot(&self, cell: IVec3, normal: Face, back: bool) -> bool {
        self.cell() == cell && self.normal_index() == normal as u8 && self.is_back_face() == back
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxels::block::Permutation;

    fn model(index: u16, permutation: u8) -> ModelRef {
        ModelRef {
            index,
            permutation: Permutation::from_bits(permutation),
        }
    }

    #[test]
    fn test_round_trip() {
        let block = Block::new().with_typ(42).with_data(7);
        let face = FaceData::construct(
            block,
            model(3, 0b101_010),
            IVec3::new(17, 16, 31),
            Face::Right,
            false,
        );

        assert_eq!(face.cell(), IVec3::new(17, 16, 31));
        assert_eq!(face.normal(), Face::Right);
        assert!(!face.is_back_face());
        assert_eq!(face.permutation(), 0b101_010);
        assert_eq!(face.typ(), 42);
        assert_eq!(face.model_index(), 3);
    }

    #[test]
    fn test_seam_coordinates_wrap() {
        let block = Block::from_typ(1);
        // The exposed cell of a +X seam face lies at x = 32 of this chunk,
        // which is cell 0 of the neighbor.
        let face = FaceData::construct(
            block,
            model(0, 0),
            IVec3::new(32, 5, 9),
            Face::Right,
            false,
        );
        assert_eq!(face.cell(), IVec3::new(0, 5, 9));

        let face = FaceData::construct(
            block,
            model(0, 0),
            IVec3::new(-1, 5, 9),
            Face::Left,
            false,
        );
        assert_eq!(face.cell(), IVec3::new(31, 5, 9));
    }

    #[test]
    fn test_slot_matching_ignores_content() {
        let a = FaceData::construct(
            Block::from_typ(1),
            model(0, 0),
            IVec3::new(1, 2, 3),
            Face::Top,
            false,
        );
        assert!(a.same_slot(IVec3::new(1, 2, 3), Face::Top, false));
        assert!(!a.same_slot(IVec3::new(1, 2, 3), Face::Top, true));
        assert!(!a.same_slot(IVec3::new(1, 2, 4), Face::Top, false));
    }
}
