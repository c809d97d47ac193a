//! Depth maps

use crate::camera::CameraPose;
use meshfusion_core::{Error, Result};

/// Depth recorded for pixels that see no surface
pub const BACKGROUND: f32 = f32::INFINITY;

/// Whether a depth value is the background sentinel
#[inline]
pub fn is_background(depth: f32) -> bool {
    depth == BACKGROUND
}

/// A row-major grid of depths along the viewing axis, tagged with the camera
/// that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMap {
    pub view_index: usize,
    pub pose: CameraPose,
    pub data: Vec<f32>,
}

impl DepthMap {
    /// A map where every pixel is background
    pub fn background(view_index: usize, pose: CameraPose) -> Self {
        Self {
            view_index,
            pose,
            data: vec![BACKGROUND; pose.intrinsics.pixel_count()],
        }
    }

    /// Wrap existing depth values, checking the size against the intrinsics
    pub fn from_data(view_index: usize, pose: CameraPose, data: Vec<f32>) -> Result<Self> {
        let expected = pose.intrinsics.pixel_count();
        if data.len() != expected {
            return Err(Error::InvalidData(format!(
                "depth map has {} values, intrinsics require {}",
                data.len(),
                expected
            )));
        }
        Ok(Self { view_index, pose, data })
    }

    pub fn width(&self) -> usize {
        self.pose.intrinsics.width as usize
    }

    pub fn height(&self) -> usize {
        self.pose.intrinsics.height as usize
    }

    /// Depth at pixel `(u, v)`, `None` outside the image
    pub fn get(&self, u: i64, v: i64) -> Option<f32> {
        if u < 0 || v < 0 || u >= self.width() as i64 || v >= self.height() as i64 {
            return None;
        }
        Some(self.data[v as usize * self.width() + u as usize])
    }

    /// Number of pixels that see a surface
    pub fn hit_count(&self) -> usize {
        self.data.iter().filter(|d| !is_background(**d)).count()
    }

    /// Smallest and largest finite depth
    pub fn depth_range(&self) -> Option<(f32, f32)> {
        self.data
            .iter()
            .copied()
            .filter(|d| !is_background(*d))
            .fold(None, |acc, d| match acc {
                None => Some((d, d)),
                Some((lo, hi)) => Some((lo.min(d), hi.max(d))),
            })
    }

    /// Grey-scale erosion with a `(2r + 1)²` square window: every pixel takes
    /// the minimum depth of its neighborhood. Background counts as infinitely
    /// far, so surfaces grow by `radius` pixels and thin parts thicken.
    pub fn erode(&self, radius: usize) -> DepthMap {
        if radius == 0 {
            return self.clone();
        }
        let (w, h) = (self.width(), self.height());

        // the square minimum separates into a row pass and a column pass
        let mut rows = vec![BACKGROUND; w * h];
        for y in 0..h {
            let row = &self.data[y * w..(y + 1) * w];
            for x in 0..w {
                let lo = x.saturating_sub(radius);
                let hi = (x + radius).min(w - 1);
                rows[y * w + x] = row[lo..=hi].iter().copied().fold(BACKGROUND, f32::min);
            }
        }

        let mut data = vec![BACKGROUND; w * h];
        for y in 0..h {
            let lo = y.saturating_sub(radius);
            let hi = (y + radius).min(h - 1);
            for x in 0..w {
                data[y * w + x] = (lo..=hi).map(|yy| rows[yy * w + x]).fold(BACKGROUND, f32::min);
            }
        }

        DepthMap {
            view_index: self.view_index,
            pose: self.pose,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Intrinsics;
    use meshfusion_core::Point3f;

    fn pose(width: u32, height: u32) -> CameraPose {
        let intrinsics = Intrinsics::new(10.0, 10.0, width as f32 / 2.0, height as f32 / 2.0, width, height);
        CameraPose::look_at(&Point3f::new(0.0, 0.0, 3.0), &Point3f::origin(), intrinsics, 0.1).unwrap()
    }

    #[test]
    fn test_background_and_access() {
        let mut map = DepthMap::background(3, pose(4, 3));
        assert_eq!(map.data.len(), 12);
        assert_eq!(map.hit_count(), 0);
        assert_eq!(map.depth_range(), None);

        map.data[1 * 4 + 2] = 1.5;
        map.data[0] = 2.5;
        assert_eq!(map.get(2, 1), Some(1.5));
        assert!(is_background(map.get(3, 2).unwrap()));
        assert_eq!(map.get(4, 0), None);
        assert_eq!(map.get(-1, 0), None);
        assert_eq!(map.hit_count(), 2);
        assert_eq!(map.depth_range(), Some((1.5, 2.5)));
    }

    #[test]
    fn test_from_data_checks_size() {
        assert!(DepthMap::from_data(0, pose(2, 2), vec![1.0; 4]).is_ok());
        assert!(matches!(
            DepthMap::from_data(0, pose(2, 2), vec![1.0; 3]),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn test_erode_grows_and_takes_minimum() {
        let mut map = DepthMap::background(0, pose(5, 5));
        map.data[2 * 5 + 2] = 2.0;
        map.data[2 * 5 + 3] = 1.0;

        let eroded = map.erode(1);
        // 3x3 neighborhoods of both hits become surface
        assert_eq!(eroded.hit_count(), 12);
        assert_eq!(eroded.get(1, 1), Some(2.0));
        assert_eq!(eroded.get(2, 2), Some(1.0));
        assert_eq!(eroded.get(4, 3), Some(1.0));
        assert!(is_background(eroded.get(0, 0).unwrap()));

        assert_eq!(map.erode(0), map);
    }
}
