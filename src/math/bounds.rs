use glam::{Mat4, Vec3};

#[derive(Debug, Clone, Copy)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    pub fn from_points(points: impl Iterator<Item = Vec3> + Clone) -> Option<BoundingSphere> {
        let aabb = Aabb::from_points(points.clone())?;
        let center = aabb.center();
        let radius_squared = points
            .map(|p| (p - center).length_squared())
            .fold(0.0f32, f32::max);

        Some(BoundingSphere {
            center,
            radius: radius_squared.sqrt(),
        })
    }

    pub fn transform(&self, matrix: &Mat4) -> BoundingSphere {
        let center = matrix.transform_point3(self.center);
        let scale = matrix.to_scale_rotation_translation().0;
        let radius = self.radius * scale.max_element();
        BoundingSphere { center, radius }
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        (point - self.center).length_squared() <= self.radius * self.radius
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(point1: Vec3, point2: Vec3) -> Aabb {
        let min = point1.min(point2);
        let max = point1.max(point2);
        Aabb { min, max }
    }

    pub fn from_points(points: impl Iterator<Item = Vec3>) -> Option<Aabb> {
        let mut points = points;
        let first = points.next()?;
        let mut aabb = Aabb {
            min: first,
            max: first,
        };

        for point in points {
            aabb.min = aabb.min.min(point);
            aabb.max = aabb.max.max(point);
        }

        Some(aabb)
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_from_points_covers_all_inputs() {
        let points = [
            Vec3::new(-1.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 2.0, 0.0),
        ];
        let sphere = BoundingSphere::from_points(points.iter().copied()).unwrap();

        for point in points {
            assert!(sphere.contains_point(point));
        }
    }

    #[test]
    fn sphere_from_no_points_is_none() {
        assert!(BoundingSphere::from_points(std::iter::empty()).is_none());
    }

    #[test]
    fn transform_scales_radius_by_largest_axis() {
        let sphere = BoundingSphere {
            center: Vec3::ZERO,
            radius: 1.0,
        };
        let matrix = Mat4::from_scale(Vec3::new(1.0, 3.0, 2.0));
        let transformed = sphere.transform(&matrix);
        assert_eq!(transformed.radius, 3.0);
    }
}
