use glam::Vec3;

/// A plane in point-and-normal form.
#[derive(Copy, Clone, Debug, Default)]
pub struct Plane {
    pub pos: Vec3,
    pub normal: Vec3,
}

impl Plane {
    pub fn new(pos: Vec3, normal: Vec3) -> Plane {
        Plane {
            pos,
            normal: normal.normalize(),
        }
    }

    /// Signed distance; positive on the side the normal points to.
    #[inline(always)]
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(point - self.pos)
    }
}
