use glam::Vec3;

use crate::math::plane::Plane;

/// Distance a box may poke past a plane before it is culled. Seam faces and
/// voxel models can overhang their chunk, so the test errs on drawing.
const CULL_MARGIN: f32 = 128.0;

/// A view frustum of five inward-facing planes: far, right, left, top,
/// bottom. The near plane is intentionally omitted; geometry between the
/// camera and the near plane is cheap and clipping it would pop chunks the
/// player is standing in.
#[derive(Debug, Clone, Copy)]
pub struct Frustum {
    planes: [Plane; 5],
}

impl Frustum {
    /// Builds the frustum from a camera basis. `pos` is the camera position
    /// in whatever space the boxes are tested in (the renderer uses
    /// player-relative space, so it passes zero).
    pub fn new(pos: Vec3, dir: Vec3, up: Vec3, fov_y: f32, aspect: f32, z_far: f32) -> Frustum {
        let forward = dir.normalize();
        let right = forward.cross(up).normalize();
        let up = right.cross(forward);

        let tan_y = (fov_y * 0.5).tan();
        let tan_x = tan_y * aspect;

        let planes = [
            // Far
            Plane::new(pos + forward * z_far, -forward),
            // Right
            Plane::new(pos, forward * tan_x - right),
            // Left
            Plane::new(pos, forward * tan_x + right),
            // Top
            Plane::new(pos, forward * tan_y - up),
            // Bottom
            Plane::new(pos, forward * tan_y + up),
        ];

        Frustum { planes }
    }

    /// Tests an axis-aligned box given by its minimum corner and dimensions.
    /// The box survives if its most-positive corner relative to each plane
    /// normal stays within the cull margin.
    pub fn test_aab(&self, pos: Vec3, dims: Vec3) -> bool {
        for plane in &self.planes {
            let corner = pos + Vec3::select(plane.normal.cmpgt(Vec3::ZERO), dims, Vec3::ZERO);
            if plane.distance_to_point(corner) < -CULL_MARGIN {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frustum() -> Frustum {
        Frustum::new(
            Vec3::ZERO,
            Vec3::NEG_Z,
            Vec3::Y,
            90.0_f32.to_radians(),
            1.0,
            1000.0,
        )
    }

    #[test]
    fn test_box_in_front_is_visible() {
        let frustum = frustum();
        assert!(frustum.test_aab(Vec3::new(-16.0, -16.0, -48.0), Vec3::splat(32.0)));
        // Chunks hugging the camera survive because the near plane is omitted.
        assert!(frustum.test_aab(Vec3::new(-16.0, -16.0, -16.0), Vec3::splat(32.0)));
    }

    #[test]
    fn test_box_far_behind_is_culled() {
        let frustum = frustum();
        assert!(!frustum.test_aab(Vec3::new(-16.0, -16.0, 400.0), Vec3::splat(32.0)));
    }

    #[test]
    fn test_box_beyond_far_plane_is_culled() {
        let frustum = frustum();
        assert!(!frustum.test_aab(Vec3::new(-16.0, -16.0, -1300.0), Vec3::splat(32.0)));
    }

    #[test]
    fn test_box_far_to_the_side_is_culled() {
        let frustum = frustum();
        // At z = -100 the frustum half-width is 100; margin adds ~181 along x.
        assert!(!frustum.test_aab(Vec3::new(400.0, -16.0, -116.0), Vec3::splat(32.0)));
        assert!(frustum.test_aab(Vec3::new(80.0, -16.0, -116.0), Vec3::splat(32.0)));
    }
}
