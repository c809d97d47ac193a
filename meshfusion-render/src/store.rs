//! Depth map persistence between the render and fuse phases
//!
//! Each depth map lives in `<root>/<mesh key>/view_<NNNN>.depth` using a small
//! little-endian binary layout:
//!
//! ```text
//! magic "MFDM" | version u32 | view index u32 | width u32 | height u32
//! rotation quaternion w i j k (f32) | translation x y z (f32)
//! fx fy cx cy (f32) | near (f32) | width * height depths (f32)
//! ```
//!
//! Depths are stored as raw `f32`, so the `+inf` background survives intact.

use crate::camera::{CameraPose, Intrinsics};
use crate::depth::DepthMap;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use meshfusion_core::{Error, Result};
use meshfusion_io::write_atomically;
use nalgebra::{Isometry3, Quaternion, Translation3, UnitQuaternion};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 4] = b"MFDM";
const VERSION: u32 = 1;
const EXTENSION: &str = "depth";
/// Bytes before the depth values: magic, four u32 and twelve f32
const HEADER_LEN: u64 = 4 + 4 * 4 + 12 * 4;

/// Storage for the depth maps of each mesh, keyed by mesh name and view index
pub trait DepthMapStore: Send + Sync {
    /// Persist one view
    fn save(&self, mesh_key: &str, map: &DepthMap) -> Result<()>;

    /// Load one view
    fn load(&self, mesh_key: &str, view_index: usize) -> Result<DepthMap>;

    /// Sorted view indices stored for a mesh
    fn list_views(&self, mesh_key: &str) -> Result<Vec<usize>>;

    /// Drop every stored view of a mesh
    fn clear(&self, mesh_key: &str) -> Result<()>;

    /// Load every stored view of a mesh in view order
    fn load_all(&self, mesh_key: &str) -> Result<Vec<DepthMap>> {
        self.list_views(mesh_key)?
            .into_iter()
            .map(|view| self.load(mesh_key, view))
            .collect()
    }
}

/// Depth maps stored as files under a root directory
#[derive(Debug, Clone)]
pub struct DirectoryDepthStore {
    root: PathBuf,
}

impl DirectoryDepthStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mesh_dir(&self, mesh_key: &str) -> PathBuf {
        self.root.join(mesh_key)
    }

    pub fn view_path(&self, mesh_key: &str, view_index: usize) -> PathBuf {
        self.mesh_dir(mesh_key)
            .join(format!("view_{:04}.{}", view_index, EXTENSION))
    }
}

fn parse_view_index(file_name: &str) -> Option<usize> {
    file_name
        .strip_prefix("view_")?
        .strip_suffix(".depth")?
        .parse()
        .ok()
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::InvalidData(format!("{} {} does not fit in u32", what, value)))
}

/// File size implied by the image dimensions in a header
fn expected_len(width: u32, height: u32) -> Option<u64> {
    u64::from(width)
        .checked_mul(u64::from(height))?
        .checked_mul(4)?
        .checked_add(HEADER_LEN)
}

fn truncated(err: std::io::Error, path: &Path) -> Error {
    if err.kind() == ErrorKind::UnexpectedEof {
        Error::InvalidData(format!("{} is truncated", path.display()))
    } else {
        Error::Io(err)
    }
}

impl DepthMapStore for DirectoryDepthStore {
    fn save(&self, mesh_key: &str, map: &DepthMap) -> Result<()> {
        let pose = &map.pose;
        let k = &pose.intrinsics;
        if map.data.len() != k.pixel_count() {
            return Err(Error::InvalidData(format!(
                "depth map has {} values for a {}x{} image",
                map.data.len(),
                k.width,
                k.height
            )));
        }

        let q = pose.camera_to_world.rotation.quaternion();
        let t = pose.camera_to_world.translation.vector;
        let view_index = to_u32(map.view_index, "view index")?;

        write_atomically(&self.view_path(mesh_key, map.view_index), |w| {
            w.write_all(MAGIC)?;
            w.write_u32::<LittleEndian>(VERSION)?;
            w.write_u32::<LittleEndian>(view_index)?;
            w.write_u32::<LittleEndian>(k.width)?;
            w.write_u32::<LittleEndian>(k.height)?;
            for value in [q.w, q.i, q.j, q.k, t.x, t.y, t.z, k.fx, k.fy, k.cx, k.cy, pose.near] {
                w.write_f32::<LittleEndian>(value)?;
            }
            for &depth in &map.data {
                w.write_f32::<LittleEndian>(depth)?;
            }
            Ok(())
        })
    }

    fn load(&self, mesh_key: &str, view_index: usize) -> Result<DepthMap> {
        let path = self.view_path(mesh_key, view_index);
        let file = File::open(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::MissingDepthMaps(format!(
                "view {} of '{}' not found at {}",
                view_index,
                mesh_key,
                path.display()
            )),
            _ => Error::Io(e),
        })?;
        let file_len = file.metadata()?.len();
        let mut r = BufReader::new(file);

        let mut magic = [0u8; 4];
        r.read_exact(&mut magic).map_err(|e| truncated(e, &path))?;
        if &magic != MAGIC {
            return Err(Error::InvalidData(format!("{} is not a depth map", path.display())));
        }
        let version = r.read_u32::<LittleEndian>().map_err(|e| truncated(e, &path))?;
        if version != VERSION {
            return Err(Error::InvalidData(format!(
                "{} has unsupported version {}",
                path.display(),
                version
            )));
        }

        let mut header = [0u32; 3];
        r.read_u32_into::<LittleEndian>(&mut header).map_err(|e| truncated(e, &path))?;
        let [stored_index, width, height] = header;
        if stored_index as usize != view_index {
            return Err(Error::InvalidData(format!(
                "{} holds view {} instead of {}",
                path.display(),
                stored_index,
                view_index
            )));
        }

        let mut values = [0f32; 12];
        r.read_f32_into::<LittleEndian>(&mut values).map_err(|e| truncated(e, &path))?;
        let [qw, qi, qj, qk, tx, ty, tz, fx, fy, cx, cy, near] = values;

        let intrinsics = Intrinsics::new(fx, fy, cx, cy, width, height);
        intrinsics
            .validate()
            .map_err(|e| Error::InvalidData(format!("{}: {}", path.display(), e)))?;

        // the header must agree with the file size before the image is allocated
        match expected_len(width, height) {
            Some(len) if len == file_len => {}
            Some(len) if len > file_len => {
                return Err(Error::InvalidData(format!(
                    "{} is truncated: {}x{} image needs {} bytes, found {}",
                    path.display(),
                    width,
                    height,
                    len,
                    file_len
                )))
            }
            Some(_) => {
                return Err(Error::InvalidData(format!(
                    "{} has trailing bytes",
                    path.display()
                )))
            }
            None => {
                return Err(Error::InvalidData(format!(
                    "{} declares an impossible {}x{} image",
                    path.display(),
                    width,
                    height
                )))
            }
        }

        let pose = CameraPose {
            camera_to_world: Isometry3::from_parts(
                Translation3::new(tx, ty, tz),
                UnitQuaternion::new_unchecked(Quaternion::new(qw, qi, qj, qk)),
            ),
            intrinsics,
            near,
        };

        let mut data = vec![0f32; intrinsics.pixel_count()];
        r.read_f32_into::<LittleEndian>(&mut data).map_err(|e| truncated(e, &path))?;

        DepthMap::from_data(view_index, pose, data)
    }

    fn list_views(&self, mesh_key: &str) -> Result<Vec<usize>> {
        let dir = self.mesh_dir(mesh_key);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::MissingDepthMaps(format!(
                    "no depth maps for '{}' in {}",
                    mesh_key,
                    self.root.display()
                )))
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let mut views = Vec::new();
        for entry in entries {
            let entry = entry?;
            if let Some(view) = entry.file_name().to_str().and_then(parse_view_index) {
                views.push(view);
            }
        }
        views.sort_unstable();
        Ok(views)
    }

    fn clear(&self, mesh_key: &str) -> Result<()> {
        match std::fs::remove_dir_all(self.mesh_dir(mesh_key)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(Error::Io(e)),
            _ => Ok(()),
        }
    }
}
