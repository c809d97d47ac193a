//! 3D transformation utilities

use crate::error::{Error, Result};
use crate::traits::BoundingBox;
use nalgebra::{Isometry3, Matrix4, Point3, Vector3};
use serde::{Deserialize, Serialize};

/// A 3D transformation that can be applied to points and meshes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform3D {
    pub matrix: Matrix4<f32>,
}

impl Transform3D {
    /// Create an identity transformation
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    /// Create a translation transformation
    pub fn translation(translation: Vector3<f32>) -> Self {
        Self {
            matrix: Matrix4::new_translation(&translation),
        }
    }

    /// Create a uniform scaling transformation
    pub fn uniform_scaling(scale: f32) -> Self {
        Self {
            matrix: Matrix4::new_scaling(scale),
        }
    }

    /// Apply the transformation to a point
    pub fn transform_point(&self, point: &Point3<f32>) -> Point3<f32> {
        let homogeneous = self.matrix * point.to_homogeneous();
        Point3::from_homogeneous(homogeneous).unwrap_or(*point)
    }

    /// Compose this transformation with another (`self` applied last)
    pub fn compose(self, other: Self) -> Self {
        Self {
            matrix: self.matrix * other.matrix,
        }
    }

    /// Get the inverse transformation
    pub fn inverse(self) -> Option<Self> {
        self.matrix.try_inverse().map(|inv_matrix| Self {
            matrix: inv_matrix,
        })
    }

    /// Check if this is approximately the identity transformation
    pub fn is_identity(&self, epsilon: f32) -> bool {
        let identity = Matrix4::identity();
        (self.matrix - identity).norm() < epsilon
    }
}

impl Default for Transform3D {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::ops::Mul for Transform3D {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        self.compose(rhs)
    }
}

impl From<Matrix4<f32>> for Transform3D {
    fn from(matrix: Matrix4<f32>) -> Self {
        Self { matrix }
    }
}

impl From<Isometry3<f32>> for Transform3D {
    fn from(isometry: Isometry3<f32>) -> Self {
        Self {
            matrix: isometry.to_homogeneous(),
        }
    }
}

/// Normalization recorded when a mesh is rescaled into the unit cube.
///
/// `scaled = (original + translation) * scale`, so the original frame is
/// recovered with `original = scaled / scale - translation`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformParams {
    pub scale: f32,
    pub translation: Vector3<f32>,
}

impl TransformParams {
    /// Parameters that center `bbox` at the origin and scale its longest side
    /// to `1 - 2 * padding`
    pub fn normalizing(bbox: &BoundingBox, padding: f32) -> Result<Self> {
        if !(0.0..0.5).contains(&padding) {
            return Err(Error::Configuration(format!(
                "scale padding must lie in [0, 0.5), got {}",
                padding
            )));
        }
        if bbox.is_degenerate() {
            return Err(Error::InvalidMesh(
                "bounding box has zero extent".to_string(),
            ));
        }

        Ok(Self {
            scale: (1.0 - 2.0 * padding) / bbox.max_extent(),
            translation: -bbox.center().coords,
        })
    }

    /// Map a point from the original frame into the scaled frame
    pub fn apply(&self, p: &Point3<f32>) -> Point3<f32> {
        (p + self.translation) * self.scale
    }

    /// Map a point from the scaled frame back into the original frame
    pub fn invert(&self, p: &Point3<f32>) -> Point3<f32> {
        p / self.scale - self.translation
    }

    /// The forward mapping as a matrix transform
    pub fn to_transform(&self) -> Transform3D {
        Transform3D::uniform_scaling(self.scale) * Transform3D::translation(self.translation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_transform_compose_inverse() {
        let t = Transform3D::translation(Vector3::new(1.0, 2.0, 3.0));
        let s = Transform3D::uniform_scaling(2.0);
        let combined = s * t;

        let p = Point3::new(1.0, 1.0, 1.0);
        assert_relative_eq!(combined.transform_point(&p), Point3::new(4.0, 6.0, 8.0));

        let back = combined.inverse().unwrap().transform_point(&Point3::new(4.0, 6.0, 8.0));
        assert_relative_eq!(back, p, epsilon = 1e-5);
        assert!((combined * combined.inverse().unwrap()).is_identity(1e-5));
    }

    #[test]
    fn test_normalizing_params() {
        let bbox = BoundingBox::new(Point3::new(0.0, 0.0, 0.0), Point3::new(4.0, 2.0, 1.0));
        let params = TransformParams::normalizing(&bbox, 0.1).unwrap();

        assert_relative_eq!(params.scale, 0.2);
        let max = params.apply(&bbox.max);
        assert_relative_eq!(max, Point3::new(0.4, 0.2, 0.1), epsilon = 1e-6);

        let p = Point3::new(3.0, 0.5, 0.25);
        assert_relative_eq!(params.invert(&params.apply(&p)), p, epsilon = 1e-5);
        assert_relative_eq!(params.to_transform().transform_point(&p), params.apply(&p), epsilon = 1e-6);
    }

    #[test]
    fn test_normalizing_rejects_bad_input() {
        let flat = BoundingBox::new(Point3::new(1.0, 1.0, 1.0), Point3::new(1.0, 1.0, 1.0));
        assert!(matches!(
            TransformParams::normalizing(&flat, 0.1),
            Err(Error::InvalidMesh(_))
        ));

        let bbox = BoundingBox::new(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        assert!(matches!(
            TransformParams::normalizing(&bbox, 0.5),
            Err(Error::Configuration(_))
        ));
    }
}
