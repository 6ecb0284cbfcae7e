use std::sync::OnceLock;

use bitfield_struct::bitfield;

use crate::voxels::face::Face;

/// A single voxel: material type in the low half, state data in the high half.
#[bitfield(u32, hash = true)]
pub struct Block {
    pub typ: u16,
    pub data: u16,
}

impl Block {
    pub const AIR: Block = Block::new();

    pub const fn from_typ(typ: u16) -> Self {
        Block::new().with_typ(typ)
    }

    #[inline(always)]
    pub const fn is_air(&self) -> bool {
        self.typ() == 0
    }

    #[inline(always)]
    pub fn attributes(&self) -> &'static BlockAttributes {
        BlockRegistry::global().attributes(self.typ())
    }

    #[inline(always)]
    pub fn transparent(&self) -> bool {
        self.attributes().transparent
    }

    #[inline(always)]
    pub fn view_through(&self) -> bool {
        self.attributes().view_through
    }

    #[inline(always)]
    pub fn solid(&self) -> bool {
        self.attributes().solid
    }

    #[inline(always)]
    pub fn degradable(&self) -> bool {
        self.attributes().degradable
    }

    #[inline(always)]
    pub fn has_back_face(&self) -> bool {
        self.attributes().has_back_face
    }

    /// The rotated model reference for this block.
    #[inline(always)]
    pub fn model(&self) -> ModelRef {
        BlockRegistry::global().model(*self)
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.into_bits() == other.into_bits()
    }
}

impl Eq for Block {}

/// A model rotation: the low 3 bits select one of the six axis permutations,
/// the high 3 bits flip the sign of the resulting axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permutation(u8);

// The six permutations of (x, y, z), indexed by the low permutation bits.
const AXIS_PERMUTATIONS: [[usize; 3]; 6] = [
    [0, 1, 2],
    [0, 2, 1],
    [1, 0, 2],
    [1, 2, 0],
    [2, 0, 1],
    [2, 1, 0],
];

impl Permutation {
    pub const IDENTITY: Permutation = Permutation(0);

    pub const fn from_bits(bits: u8) -> Self {
        Permutation(bits & 0x3F)
    }

    pub const fn into_bits(self) -> u8 {
        self.0
    }

    /// Applies the rotation to a model box given in 16-unit cells.
    pub fn apply_to_box(&self, min: [u8; 3], max: [u8; 3]) -> ([u8; 3], [u8; 3]) {
        let table_index = (self.0 & 0x7) as usize;
        let table = AXIS_PERMUTATIONS[if table_index < 6 { table_index } else { 0 }];
        let mut out_min = [0u8; 3];
        let mut out_max = [0u8; 3];
        for axis in 0..3 {
            let target = table[axis];
            if self.0 >> 3 & (1 << target) != 0 {
                out_min[target] = 16 - max[axis];
                out_max[target] = 16 - min[axis];
            } else {
                out_min[target] = min[axis];
                out_max[target] = max[axis];
            }
        }
        (out_min, out_max)
    }

    /// Applies the rotation to a face direction.
    pub fn apply(&self, face: Face) -> Face {
        let table_index = (self.0 & 0x7) as usize;
        // Values 6 and 7 are not valid permutation indices; treat as identity.
        let table = AXIS_PERMUTATIONS[if table_index < 6 { table_index } else { 0 }];
        let axis = table[face.axis()];
        let flipped = self.0 >> 3 & (1 << axis) != 0;
        let positive = face.is_positive() ^ flipped;
        match (axis, positive) {
            (0, true) => Face::Right,
            (0, false) => Face::Left,
            (1, true) => Face::Top,
            (1, false) => Face::Bottom,
            (2, true) => Face::Front,
            (2, false) => Face::Back,
            _ => unreachable!(),
        }
    }
}

/// The geometry of one voxel model, in 16-unit cells of the voxel cube.
#[derive(Debug, Clone, Copy)]
pub struct VoxelModel {
    pub min: [u8; 3],
    pub max: [u8; 3],
    /// Bit per `Face` discriminant: the model completely fills that face
    /// of the 16-unit cube.
    pub full_faces: u8,
}

impl VoxelModel {
    pub const FULL_CUBE: VoxelModel = VoxelModel {
        min: [0; 3],
        max: [16; 3],
        full_faces: 0x3F,
    };

    #[inline(always)]
    pub const fn fills_face(&self, face: Face) -> bool {
        self.full_faces & (1 << face as u8) != 0
    }
}

/// A resolved `model(block)` lookup.
#[derive(Debug, Clone, Copy)]
pub struct ModelRef {
    pub index: u16,
    pub permutation: Permutation,
}

impl ModelRef {
    #[inline(always)]
    pub const fn is_full_cube(&self) -> bool {
        self.index == 0
    }
}

/// Per-type block attributes, supplied by the block registry collaborator.
#[derive(Debug, Clone)]
pub struct BlockAttributes {
    pub transparent: bool,
    pub view_through: bool,
    pub solid: bool,
    pub degradable: bool,
    pub has_back_face: bool,
    /// Emitted light, RGB.
    pub light: [u8; 3],
    /// Light absorption, RGB.
    pub absorption: [u8; 3],
    /// Index into the model table. 0 is the full cube.
    pub model_index: u16,
}

impl BlockAttributes {
    pub const AIR: BlockAttributes = BlockAttributes {
        transparent: true,
        view_through: true,
        solid: false,
        degradable: false,
        has_back_face: false,
        light: [0; 3],
        absorption: [0; 3],
        model_index: 0,
    };
}

/// Read-only attribute and model tables, installed once at startup and
/// shared by every thread.
pub struct BlockRegistry {
    attributes: Vec<BlockAttributes>,
    models: Vec<VoxelModel>,
}

static REGISTRY: OnceLock<BlockRegistry> = OnceLock::new();

impl BlockRegistry {
    pub fn new(mut attributes: Vec<BlockAttributes>, mut models: Vec<VoxelModel>) -> Self {
        if models.is_empty() {
            models.push(VoxelModel::FULL_CUBE);
        }
        if attributes.is_empty() {
            attributes.push(BlockAttributes::AIR);
        }
        // Unknown model indices degrade to the full cube here so the hot
        // lookups stay branch-free.
        for (typ, attribute) in attributes.iter_mut().enumerate() {
            if attribute.model_index as usize >= models.len() {
                log::warn!(
                    "Block type {} references unknown model {}, substituting the full cube",
                    typ,
                    attribute.model_index
                );
                attribute.model_index = 0;
            }
        }
        BlockRegistry { attributes, models }
    }

    /// Installs the process-wide registry. Later calls are ignored.
    pub fn install(self) {
        if REGISTRY.set(self).is_err() {
            log::warn!("Block registry was already installed, ignoring reinstall");
        }
    }

    #[inline(always)]
    pub fn global() -> &'static BlockRegistry {
        REGISTRY
            .get()
            .expect("block registry is not installed")
    }

    #[inline(always)]
    pub fn attributes(&self, typ: u16) -> &BlockAttributes {
        self.attributes.get(typ as usize).unwrap_or(&self.attributes[0])
    }

    #[inline(always)]
    pub fn model(&self, block: Block) -> ModelRef {
        ModelRef {
            index: self.attributes(block.typ()).model_index,
            permutation: Permutation::from_bits((block.data() & 0x3F) as u8),
        }
    }

    #[inline(always)]
    pub fn model_shape(&self, index: u16) -> &VoxelModel {
        self.models.get(index as usize).unwrap_or(&self.models[0])
    }

    #[inline(always)]
    pub fn is_known_typ(&self, typ: u16) -> bool {
        (typ as usize) < self.attributes.len()
    }
}

#[cfg(any(test, feature = "test-fixtures"))]
pub mod test_fixture {
    //! A small block palette shared by unit tests across the workspace.

    use super::*;

    pub const AIR: u16 = 0;
    pub const STONE: u16 = 1;
    pub const GLASS: u16 = 2;
    pub const WATER: u16 = 3;
    pub const POST: u16 = 4;
    pub const GRAVEL: u16 = 5;
    pub const SLAB: u16 = 6;

    fn cube(transparent: bool, view_through: bool, has_back_face: bool) -> BlockAttributes {
        BlockAttributes {
            transparent,
            view_through,
            solid: !transparent,
            degradable: false,
            has_back_face,
            light: [0; 3],
            absorption: if transparent { [1; 3] } else { [31; 3] },
            model_index: 0,
        }
    }

    /// Installs the test registry; safe to call from any number of tests.
    pub fn install_test_registry() {
        let attributes = vec![
            BlockAttributes::AIR,
            // Stone: plain opaque cube.
            cube(false, false, false),
            // Glass: transparent pane-of-a-cube with a back face.
            cube(true, true, true),
            // Water: like glass but degradable, so placements can overwrite it.
            BlockAttributes {
                degradable: true,
                ..cube(true, true, true)
            },
            // Post: opaque but freestanding, rendered through the voxel-model path.
            BlockAttributes {
                model_index: 1,
                ..cube(false, false, false)
            },
            // Gravel: opaque cube that worldgen may overwrite.
            BlockAttributes {
                degradable: true,
                ..cube(false, false, false)
            },
            // Slab: bottom half cube, fills only its bottom face.
            BlockAttributes {
                model_index: 2,
                ..cube(false, false, false)
            },
        ];

        let models = vec![
            VoxelModel::FULL_CUBE,
            VoxelModel {
                min: [6, 0, 6],
                max: [10, 10, 10],
                full_faces: 0,
            },
            VoxelModel {
                min: [0, 0, 0],
                max: [16, 8, 16],
                full_faces: 1 << Face::Bottom as u8,
            },
        ];

        BlockRegistry::new(attributes, models).install();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_packing() {
        let block = Block::new().with_typ(17).with_data(3);
        assert_eq!(block.typ(), 17);
        assert_eq!(block.data(), 3);
        assert_eq!(block.into_bits(), 17 | 3 << 16);
        assert!(Block::AIR.is_air());
        assert!(!block.is_air());
    }

    #[test]
    fn test_permutation_identity() {
        for face in Face::all() {
            assert_eq!(Permutation::IDENTITY.apply(face), face);
        }
    }

    #[test]
    fn test_permutation_swap_and_flip() {
        // Permutation 2 swaps X and Y.
        let swap_xy = Permutation::from_bits(2);
        assert_eq!(swap_xy.apply(Face::Right), Face::Top);
        assert_eq!(swap_xy.apply(Face::Top), Face::Right);
        assert_eq!(swap_xy.apply(Face::Front), Face::Front);

        // Flip bit for the Y axis negates Top/Bottom.
        let flip_y = Permutation::from_bits(0b010 << 3);
        assert_eq!(flip_y.apply(Face::Top), Face::Bottom);
        assert_eq!(flip_y.apply(Face::Bottom), Face::Top);
        assert_eq!(flip_y.apply(Face::Left), Face::Left);
    }

    #[test]
    fn test_permutation_rotates_model_box() {
        // A bottom slab flipped on Y becomes a top slab.
        let flip_y = Permutation::from_bits(0b010 << 3);
        let (min, max) = flip_y.apply_to_box([0, 0, 0], [16, 8, 16]);
        assert_eq!(min, [0, 8, 0]);
        assert_eq!(max, [16, 16, 16]);

        // Swapping X and Y turns it into a wall slab.
        let swap_xy = Permutation::from_bits(2);
        let (min, max) = swap_xy.apply_to_box([0, 0, 0], [16, 8, 16]);
        assert_eq!(min, [0, 0, 0]);
        assert_eq!(max, [8, 16, 16]);
    }

    #[test]
    fn test_registry_fallbacks() {
        test_fixture::install_test_registry();
        let registry = BlockRegistry::global();

        // Unknown type reads as air.
        let unknown = registry.attributes(999);
        assert!(!unknown.solid);
        assert!(unknown.transparent);
        assert_eq!(unknown.model_index, 0);

        assert!(registry.model_shape(0).fills_face(Face::Top));
        assert!(!registry.model_shape(1).fills_face(Face::Top));
    }
}
