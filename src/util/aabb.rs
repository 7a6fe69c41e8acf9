use crate::util::vec3::Vec3;

/// Axis-aligned bounding box used as scratch space in per-tick range queries.
///
/// Pooled instances carry stale bounds; call [`Aabb::set`] before reading.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box centered on `center` extending `half` in every direction.
    pub fn around(center: Vec3, half: f64) -> Self {
        let h = Vec3::new(half, half, half);
        Self {
            min: center - h,
            max: center + h,
        }
    }

    /// Overwrite both corners in place.
    #[inline]
    pub fn set(&mut self, min: Vec3, max: Vec3) -> &mut Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Grow the box by `amount` on every axis.
    pub fn inflate(&self, amount: f64) -> Self {
        let d = Vec3::new(amount, amount, amount);
        Self {
            min: self.min - d,
            max: self.max + d,
        }
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }
}
