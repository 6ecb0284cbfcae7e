//! Transparent-face ordering.
//!
//! The transparent primitive of a chunk is re-sorted whenever its face
//! list changed or the player crossed a cell boundary relative to the
//! chunk; sub-cell motion never triggers a sort. Faces pointing away from
//! the viewer are culled to a suffix that stays allocated but is not
//! drawn; the remainder is bucket-sorted by Manhattan distance, farthest
//! first, with back faces ahead of front faces so they render first.

use engine::{
    mesh_generation::{face_data::FaceData, primitive_mesh::PrimitiveMesh},
    voxels::chunk::{CHUNK_MASK, CHUNK_SIZE},
};
use glam::IVec3;

const BUCKET_COUNT: usize = (3 * CHUNK_MASK + 1) as usize;

/// Whether the primitive must be re-sorted for the given player cell.
pub fn needs_sort(primitive: &PrimitiveMesh, player_cell: IVec3) -> bool {
    primitive.face_count() != 0 && primitive.last_sort_cell != Some(player_cell)
}

/// Sorts the primitive's upload buffer in place and records the sort cell.
/// Returns the number of leading faces to draw.
pub fn sort_primitive(primitive: &mut PrimitiveMesh, player_cell: IVec3) -> u32 {
    let drawn = sort_faces(primitive.complete_mut(), player_cell);
    primitive.drawn_face_count = drawn;
    primitive.last_sort_cell = Some(player_cell);
    drawn
}

/// A face is culled when it sits on the side of the chunk opposite the
/// viewer along its normal; faces on the zero boundary plane are kept
/// because their quad belongs to the neighboring chunk's volume.
fn should_be_culled(face: FaceData, player_cell: IVec3) -> bool {
    let normal = face.normal();
    let axis = normal.axis();
    let coord = face.cell()[axis];
    if coord == 0 {
        return false;
    }
    if normal.is_positive() {
        player_cell[axis] < coord
    } else {
        player_cell[axis] > coord
    }
}

fn sort_faces(faces: &mut [FaceData], player_cell: IVec3) -> u32 {
    // Clamping preserves the distance ordering for viewers outside the
    // chunk and bounds the bucket count.
    let clamped = player_cell.clamp(IVec3::ZERO, IVec3::splat(CHUNK_MASK));

    let mut back_buckets: Vec<Vec<FaceData>> = vec![Vec::new(); BUCKET_COUNT];
    let mut front_buckets: Vec<Vec<FaceData>> = vec![Vec::new(); BUCKET_COUNT];
    let mut culled: Vec<FaceData> = Vec::new();

    for &face in faces.iter() {
        if should_be_culled(face, player_cell) {
            culled.push(face);
            continue;
        }
        let distance = (face.cell() - clamped).abs().element_sum() as usize;
        if face.is_back_face() {
            back_buckets[distance].push(face);
        } else {
            front_buckets[distance].push(face);
        }
    }

    let mut write = 0;
    for distance in (0..BUCKET_COUNT).rev() {
        for face in back_buckets[distance].drain(..) {
            faces[write] = face;
            write += 1;
        }
        for face in front_buckets[distance].drain(..) {
            faces[write] = face;
            write += 1;
        }
    }
    let drawn = write as u32;
    for face in culled {
        faces[write] = face;
        write += 1;
    }
    debug_assert_eq!(write, faces.len());
    drawn
}

/// The player's position in cells relative to a chunk at `chunk_world`,
/// scaled by the chunk's voxel size.
pub fn player_cell(player: glam::DVec3, chunk_world: IVec3, voxel_size: u32) -> IVec3 {
    ((player - chunk_world.as_dvec3()) / voxel_size as f64)
        .floor()
        .as_ivec3()
        .clamp(IVec3::splat(-1), IVec3::splat(CHUNK_SIZE))
}

#[cfg(test)]
mod tests {
    use engine::voxels::{
        block::{Block, ModelRef, Permutation, test_fixture},
        face::Face,
    };
    use glam::DVec3;

    use super::*;

    fn face(cell: IVec3, normal: Face, back: bool) -> FaceData {
        FaceData::construct(
            Block::from_typ(test_fixture::WATER),
            ModelRef {
                index: 0,
                permutation: Permutation::IDENTITY,
            },
            cell,
            normal,
            back,
        )
    }

    fn primitive_with(faces: Vec<FaceData>) -> PrimitiveMesh {
        test_fixture::install_test_registry();
        let mut primitive = PrimitiveMesh::default();
        for face in faces {
            primitive.add_core(face);
        }
        primitive.pack_complete();
        primitive
    }

    #[test]
    fn test_sort_runs_only_on_cell_crossing() {
        let mut primitive = primitive_with(vec![face(IVec3::new(5, 5, 5), Face::Top, false)]);

        // Chunk-relative positions (3.4, 5.6, 7.8) and (3.4, 5.6, 8.2)
        // straddle the z = 8 cell boundary.
        let before = player_cell(DVec3::new(3.4, 5.6, 7.8), IVec3::ZERO, 1);
        let after = player_cell(DVec3::new(3.4, 5.6, 8.2), IVec3::ZERO, 1);
        assert_ne!(before, after);

        assert!(needs_sort(&primitive, before));
        sort_primitive(&mut primitive, before);
        assert!(!needs_sort(&primitive, before));
        // Sub-cell motion keeps the old ordering.
        let sub_cell = player_cell(DVec3::new(3.9, 5.1, 7.2), IVec3::ZERO, 1);
        assert_eq!(sub_cell, before);
        assert!(!needs_sort(&primitive, sub_cell));

        assert!(needs_sort(&primitive, after));
    }

    #[test]
    fn test_farthest_faces_come_first() {
        let cells = [
            IVec3::new(2, 5, 9),
            IVec3::new(12, 5, 9),
            IVec3::new(2, 29, 9),
            IVec3::new(30, 5, 30),
            IVec3::new(3, 6, 8),
        ];
        let mut primitive =
            primitive_with(cells.iter().map(|&c| face(c, Face::Top, false)).collect());

        let player = player_cell(DVec3::new(3.4, 5.6, 7.8), IVec3::ZERO, 1);
        let drawn = sort_primitive(&mut primitive, player);

        // Top faces above the player cull when the viewer is below them.
        let sorted = primitive.complete();
        let distances: Vec<i32> = sorted[..drawn as usize]
            .iter()
            .map(|f| (f.cell() - player).abs().element_sum())
            .collect();
        for pair in distances.windows(2) {
            assert!(pair[0] >= pair[1], "descending distance: {:?}", distances);
        }
    }

    #[test]
    fn test_back_faces_precede_front_faces() {
        let cell = IVec3::new(10, 3, 10);
        let mut primitive = primitive_with(vec![
            face(cell, Face::Top, false),
            face(cell, Face::Top, true),
        ]);
        let player = IVec3::new(10, 20, 10);
        let drawn = sort_primitive(&mut primitive, player);
        assert_eq!(drawn, 2);
        assert!(primitive.complete()[0].is_back_face());
        assert!(!primitive.complete()[1].is_back_face());
    }

    #[test]
    fn test_away_facing_faces_are_culled_to_suffix() {
        let toward = face(IVec3::new(8, 20, 8), Face::Bottom, false);
        let away = face(IVec3::new(8, 4, 8), Face::Top, false);
        let boundary = face(IVec3::new(8, 0, 8), Face::Top, false);
        let mut primitive = primitive_with(vec![away, toward, boundary]);

        // The viewer at y = 2 is under the upward face at y = 4, so that
        // face culls; the downward face above stays, and the face on the
        // zero plane is never culled.
        let player = IVec3::new(8, 2, 8);
        let drawn = sort_primitive(&mut primitive, player);
        assert_eq!(drawn, 2);
        let drawn_cells: Vec<IVec3> = primitive.complete()[..2].iter().map(|f| f.cell()).collect();
        assert!(drawn_cells.contains(&IVec3::new(8, 0, 8)));
        assert!(drawn_cells.contains(&IVec3::new(8, 20, 8)));
        assert_eq!(primitive.complete()[2].cell(), IVec3::new(8, 4, 8));
    }

    #[test]
    fn test_sort_is_idempotent() {
        let mut faces = Vec::new();
        for i in 0..100 {
            let cell = IVec3::new(i % 32, (i * 7) % 32, (i * 13) % 32);
            faces.push(face(
                cell,
                Face::from_index((i % 6) as u8),
                i % 3 == 0,
            ));
        }
        let mut primitive = primitive_with(faces);
        let player = IVec3::new(3, 5, 7);

        sort_primitive(&mut primitive, player);
        let first: Vec<u64> = primitive.complete().iter().map(|f| f.into_bits()).collect();
        sort_primitive(&mut primitive, player);
        let second: Vec<u64> = primitive.complete().iter().map(|f| f.into_bits()).collect();
        assert_eq!(first, second);
    }
}
