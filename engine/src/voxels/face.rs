use glam::IVec3;

use crate::voxels::chunk::CHUNK_MASK;

/// One of the six axis-aligned directions a block face can point in.
///
/// The discriminants are the wire values stored in packed face records.
/// Opposite directions differ only in the lowest bit, so `opposite` is an
/// XOR and seam passes can pair neighbor lists via `dir ^ 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Face {
    /// Y+
    Top = 0,
    /// Y-
    Bottom = 1,
    /// X-
    Left = 2,
    /// X+
    Right = 3,
    /// Z+
    Front = 4,
    /// Z-
    Back = 5,
}

impl Default for Face {
    fn default() -> Self {
        Face::Top
    }
}

impl Face {
    pub const fn to_ivec3(self) -> IVec3 {
        match self {
            Face::Top => IVec3::Y,
            Face::Bottom => IVec3::NEG_Y,
            Face::Left => IVec3::NEG_X,
            Face::Right => IVec3::X,
            Face::Front => IVec3::Z,
            Face::Back => IVec3::NEG_Z,
        }
    }

    pub const fn all() -> [Face; 6] {
        [
            Face::Top,
            Face::Bottom,
            Face::Left,
            Face::Right,
            Face::Front,
            Face::Back,
        ]
    }

    #[inline(always)]
    pub const fn opposite(self) -> Face {
        match self {
            Face::Top => Face::Bottom,
            Face::Bottom => Face::Top,
            Face::Left => Face::Right,
            Face::Right => Face::Left,
            Face::Front => Face::Back,
            Face::Back => Face::Front,
        }
    }

    /// 0 = X, 1 = Y, 2 = Z.
    #[inline(always)]
    pub const fn axis(self) -> usize {
        match self {
            Face::Left | Face::Right => 0,
            Face::Top | Face::Bottom => 1,
            Face::Front | Face::Back => 2,
        }
    }

    #[inline(always)]
    pub const fn is_positive(self) -> bool {
        matches!(self, Face::Top | Face::Right | Face::Front)
    }

    /// Cell coordinate of this chunk's boundary layer toward the direction.
    #[inline(always)]
    pub const fn boundary_coord(self) -> i32 {
        if self.is_positive() { CHUNK_MASK } else { 0 }
    }

    /// The two tangential axes of the boundary plane, in (u, v) order.
    #[inline(always)]
    pub const fn tangents(self) -> (usize, usize) {
        match self.axis() {
            0 => (1, 2),
            1 => (0, 2),
            _ => (0, 1),
        }
    }

    #[inline(always)]
    pub const fn from_index(index: u8) -> Face {
        match index {
            0 => Face::Top,
            1 => Face::Bottom,
            2 => Face::Left,
            3 => Face::Right,
            4 => Face::Front,
            _ => Face::Back,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opposites_pair_by_low_bit() {
        for face in Face::all() {
            assert_eq!(face.opposite() as u8, face as u8 ^ 1);
            assert_eq!(face.opposite().opposite(), face);
            assert_eq!(face.to_ivec3() + face.opposite().to_ivec3(), IVec3::ZERO);
        }
    }

    #[test]
    fn test_axis_and_sign_match_offsets() {
        for face in Face::all() {
            let offset = face.to_ivec3();
            assert_eq!(offset[face.axis()], if face.is_positive() { 1 } else { -1 });
            let (u, v) = face.tangents();
            assert_eq!(offset[u], 0);
            assert_eq!(offset[v], 0);
        }
    }
}
