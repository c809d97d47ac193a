//! Pinhole cameras and view sampling
//!
//! Camera frames follow the computer-vision convention: +x right, +y down,
//! +z forward along the viewing axis. Pixel `(u, v)` has its center at the
//! integer coordinates `(u, v)`.

use meshfusion_core::{Bounded, BoundingBox, Error, Point3f, Result, TriangleMesh, Vector3f};
use nalgebra::{
    Isometry3, Matrix3, Point2, Quaternion, Rotation3, Translation3, UnitQuaternion,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Pinhole camera intrinsics in pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    pub width: u32,
    pub height: u32,
}

impl Intrinsics {
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32, width: u32, height: u32) -> Self {
        Self { fx, fy, cx, cy, width, height }
    }

    /// Check that the camera can see anything at all
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Configuration(format!(
                "image size must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if !(self.fx.is_finite() && self.fx > 0.0 && self.fy.is_finite() && self.fy > 0.0) {
            return Err(Error::Configuration(format!(
                "focal lengths must be positive, got fx={} fy={}",
                self.fx, self.fy
            )));
        }
        let inside_x = self.cx > 0.0 && self.cx < self.width as f32;
        let inside_y = self.cy > 0.0 && self.cy < self.height as f32;
        if !(inside_x && inside_y) {
            return Err(Error::Configuration(format!(
                "principal point ({}, {}) lies outside the {}x{} image",
                self.cx, self.cy, self.width, self.height
            )));
        }
        Ok(())
    }

    /// Project a camera-frame point (with `z > 0`) to pixel coordinates
    pub fn project(&self, p: &Point3f) -> Point2<f32> {
        Point2::new(self.fx * p.x / p.z + self.cx, self.fy * p.y / p.z + self.cy)
    }

    /// Smallest half field-of-view over both image axes, in radians
    pub fn min_half_fov(&self) -> f32 {
        let half_x = self.cx.min(self.width as f32 - self.cx);
        let half_y = self.cy.min(self.height as f32 - self.cy);
        (half_x / self.fx).atan().min((half_y / self.fy).atan())
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl Default for Intrinsics {
    fn default() -> Self {
        Self::new(640.0, 640.0, 320.0, 320.0, 640, 640)
    }
}

/// A posed pinhole camera
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    /// Maps camera-frame points into the mesh frame
    pub camera_to_world: Isometry3<f32>,
    pub intrinsics: Intrinsics,
    /// Near clip distance along the viewing axis
    pub near: f32,
}

impl CameraPose {
    /// Camera at `eye` looking at `target`
    pub fn look_at(eye: &Point3f, target: &Point3f, intrinsics: Intrinsics, near: f32) -> Result<Self> {
        let forward = target - eye;
        if !(forward.norm() > f32::EPSILON) {
            return Err(Error::Configuration(
                "camera eye and target coincide".to_string(),
            ));
        }
        let forward = forward.normalize();

        let up = if forward.y.abs() < 0.999 {
            Vector3f::y()
        } else {
            Vector3f::z()
        };
        let right = forward.cross(&up).normalize();
        let down = forward.cross(&right);

        let rotation = Rotation3::from_matrix_unchecked(Matrix3::from_columns(&[right, down, forward]));
        let camera_to_world = Isometry3::from_parts(
            Translation3::from(eye.coords),
            UnitQuaternion::from_rotation_matrix(&rotation),
        );

        Ok(Self {
            camera_to_world,
            intrinsics,
            near,
        })
    }

    /// Camera center in the mesh frame
    pub fn position(&self) -> Point3f {
        Point3f::from(self.camera_to_world.translation.vector)
    }

    /// Unit viewing direction in the mesh frame
    pub fn forward(&self) -> Vector3f {
        self.camera_to_world.rotation * Vector3f::z()
    }

    pub fn world_to_camera(&self) -> Isometry3<f32> {
        self.camera_to_world.inverse()
    }

    /// Same camera up to `epsilon` in every stored component
    pub fn approx_eq(&self, other: &CameraPose, epsilon: f32) -> bool {
        let close = |a: f32, b: f32| (a - b).abs() <= epsilon * (1.0 + a.abs().max(b.abs()));
        let qa = self.camera_to_world.rotation.quaternion().coords;
        let qb = other.camera_to_world.rotation.quaternion().coords;
        // q and -q are the same rotation
        let same_rotation = qa.iter().zip(qb.iter()).all(|(&a, &b)| close(a, b))
            || qa.iter().zip(qb.iter()).all(|(&a, &b)| close(a, -b));
        let ta = self.camera_to_world.translation.vector;
        let tb = other.camera_to_world.translation.vector;

        same_rotation
            && ta.iter().zip(tb.iter()).all(|(&a, &b)| close(a, b))
            && close(self.near, other.near)
            && self.intrinsics == other.intrinsics
    }
}

/// Generates camera poses spread over a sphere around a mesh
#[derive(Debug, Clone, PartialEq)]
pub struct CameraSampler {
    pub n_views: usize,
    pub intrinsics: Intrinsics,
    /// `None` keeps the canonical spiral, `Some` rotates it randomly
    pub seed: Option<u64>,
}

impl CameraSampler {
    pub fn new(n_views: usize, intrinsics: Intrinsics) -> Self {
        Self {
            n_views,
            intrinsics,
            seed: None,
        }
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Unit view directions on a golden-angle spiral, from the sphere towards
    /// its center
    pub fn directions(&self) -> Vec<Vector3f> {
        let n = self.n_views;
        let golden_angle = PI * (3.0 - 5.0_f32.sqrt());
        let rotation = self.seed.map(random_rotation).unwrap_or_else(UnitQuaternion::identity);

        (0..n)
            .map(|i| {
                let y = 1.0 - 2.0 * (i as f32 + 0.5) / n as f32;
                let radius = (1.0 - y * y).max(0.0).sqrt();
                let phi = golden_angle * i as f32;
                let on_sphere = Vector3f::new(phi.cos() * radius, y, phi.sin() * radius);
                -(rotation * on_sphere)
            })
            .collect()
    }

    /// Poses around a bounding box. Every camera looks at the box center from
    /// far enough away that the bounding sphere fits in the image.
    pub fn sample(&self, bbox: &BoundingBox) -> Result<Vec<CameraPose>> {
        if self.n_views == 0 {
            return Err(Error::Configuration("n_views must be positive".to_string()));
        }
        self.intrinsics.validate()?;
        if bbox.is_degenerate() {
            return Err(Error::InvalidMesh("bounding box has zero extent".to_string()));
        }

        let center = bbox.center();
        let radius = 0.5 * bbox.diagonal();
        let distance = 1.05 * radius / self.intrinsics.min_half_fov().sin();
        let near = 0.5 * (distance - radius);

        self.directions()
            .into_iter()
            .map(|dir| {
                let eye = center - dir * distance;
                CameraPose::look_at(&eye, &center, self.intrinsics, near)
            })
            .collect()
    }

    /// Poses around a mesh
    pub fn sample_for_mesh(&self, mesh: &TriangleMesh) -> Result<Vec<CameraPose>> {
        let bbox = mesh
            .bounding_box()
            .ok_or_else(|| Error::InvalidMesh("mesh has no vertices".to_string()))?;
        self.sample(&bbox)
    }
}

fn random_rotation(seed: u64) -> UnitQuaternion<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let u1: f32 = rng.gen();
    let u2: f32 = rng.gen();
    let u3: f32 = rng.gen();

    let a = (1.0 - u1).sqrt();
    let b = u1.sqrt();
    let q = Quaternion::new(
        b * (2.0 * PI * u3).cos(),
        a * (2.0 * PI * u2).sin(),
        a * (2.0 * PI * u2).cos(),
        b * (2.0 * PI * u3).sin(),
    );
    UnitQuaternion::from_quaternion(q)
}
