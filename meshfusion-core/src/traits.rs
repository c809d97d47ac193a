//! Core traits for meshfusion

use crate::{mesh::*, point::*, transform::Transform3D};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Point3f,
    pub max: Point3f,
}

impl BoundingBox {
    /// Create a bounding box from its corners
    pub fn new(min: Point3f, max: Point3f) -> Self {
        Self { min, max }
    }

    /// Smallest box containing all points, `None` for an empty iterator
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Point3f>,
    {
        let mut points = points.into_iter();
        let first = *points.next()?;
        let mut min = first;
        let mut max = first;

        for p in points {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            min.z = min.z.min(p.z);

            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
            max.z = max.z.max(p.z);
        }

        Some(Self { min, max })
    }

    /// Side lengths
    pub fn extent(&self) -> Vector3f {
        self.max - self.min
    }

    /// Longest side length
    pub fn max_extent(&self) -> f32 {
        self.extent().max()
    }

    /// Center point
    pub fn center(&self) -> Point3f {
        nalgebra::center(&self.min, &self.max)
    }

    /// Length of the diagonal
    pub fn diagonal(&self) -> f32 {
        self.extent().norm()
    }

    /// True when the box has no volume along its longest axis
    pub fn is_degenerate(&self) -> bool {
        let extent = self.max_extent();
        !(extent.is_finite() && extent > f32::EPSILON)
    }

    /// Grow the box by `margin` on every side
    pub fn padded(&self, margin: f32) -> Self {
        let m = Vector3f::repeat(margin);
        Self {
            min: self.min - m,
            max: self.max + m,
        }
    }

    /// Whether a point lies inside (inclusive)
    pub fn contains(&self, p: &Point3f) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }
}

/// Trait for objects with a spatial extent
pub trait Bounded {
    /// Get the bounding box of the object, `None` when it has no vertices
    fn bounding_box(&self) -> Option<BoundingBox>;

    /// Get the center point of the object
    fn center(&self) -> Option<Point3f> {
        self.bounding_box().map(|b| b.center())
    }
}

/// Trait for objects that can be transformed
pub trait Transformable {
    /// Apply a transformation to the object
    fn transform(&mut self, transform: &Transform3D);
}

impl Bounded for TriangleMesh {
    fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(&self.vertices)
    }
}

impl Transformable for TriangleMesh {
    fn transform(&mut self, transform: &Transform3D) {
        self.map_vertices(|v| transform.transform_point(v));
    }
}
