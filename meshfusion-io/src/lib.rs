//! I/O operations for meshes
//!
//! This crate reads and writes triangle meshes in PLY, OBJ and OFF format,
//! discovers mesh files in a directory and provides the atomic write helper
//! used for every file the pipeline produces.

pub mod ply;
pub mod obj;
pub mod off;
pub mod error;

pub use error::*;

use meshfusion_core::{Error, Result, TriangleMesh};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

/// Trait for reading meshes from files
pub trait MeshReader {
    fn read_mesh<P: AsRef<Path>>(path: P) -> Result<TriangleMesh>;
}

/// Trait for writing meshes to files
pub trait MeshWriter {
    /// Serialize a mesh into any writer
    fn write_to<W: Write>(mesh: &TriangleMesh, writer: &mut W) -> Result<()>;

    /// Write a mesh to a file, replacing it atomically
    fn write_mesh<P: AsRef<Path>>(mesh: &TriangleMesh, path: P) -> Result<()> {
        write_atomically(path.as_ref(), |writer| Self::write_to(mesh, writer))
    }
}

/// Supported mesh file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeshFormat {
    Ply,
    Obj,
    Off,
}

impl MeshFormat {
    /// Detect format from file extension (case-insensitive)
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_lowercase();
        Self::from_extension(&ext)
    }

    /// Parse a bare extension such as `"ply"`
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_lowercase().as_str() {
            "ply" => Some(Self::Ply),
            "obj" => Some(Self::Obj),
            "off" => Some(Self::Off),
            _ => None,
        }
    }

    /// Canonical file extension
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Ply => "ply",
            Self::Obj => "obj",
            Self::Off => "off",
        }
    }
}

fn format_of(path: &Path) -> Result<MeshFormat> {
    MeshFormat::from_path(path).ok_or_else(|| {
        IoError::UnknownFormat {
            extension: path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("(none)")
                .to_string(),
        }
        .into()
    })
}

/// Auto-detect format and read mesh
pub fn read_mesh<P: AsRef<Path>>(path: P) -> Result<TriangleMesh> {
    let path = path.as_ref();
    match format_of(path)? {
        MeshFormat::Ply => ply::PlyReader::read_mesh(path),
        MeshFormat::Obj => obj::ObjReader::read_mesh(path),
        MeshFormat::Off => off::OffReader::read_mesh(path),
    }
}

/// Auto-detect format and write mesh
pub fn write_mesh<P: AsRef<Path>>(mesh: &TriangleMesh, path: P) -> Result<()> {
    let path = path.as_ref();
    match format_of(path)? {
        MeshFormat::Ply => ply::PlyWriter::write_mesh(mesh, path),
        MeshFormat::Obj => obj::ObjWriter::write_mesh(mesh, path),
        MeshFormat::Off => off::OffWriter::write_mesh(mesh, path),
    }
}

/// Mesh files directly inside `dir`, sorted by file name
pub fn list_meshes<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", dir.display()),
        )));
    }

    let mut meshes = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        if entry.file_type().is_file() && MeshFormat::from_path(entry.path()).is_some() {
            meshes.push(entry.into_path());
        } else {
            tracing::trace!("skipping {}", entry.path().display());
        }
    }
    Ok(meshes)
}

/// File stem used to key per-mesh outputs
pub fn mesh_stem(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidMesh(format!("{} has no usable file name", path.display())))
}

/// Write a file through a temporary sibling that is renamed into place once
/// `write` succeeds, so readers never see a partial file
pub fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<&mut File>) -> Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        write(&mut writer)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Split a polygon into a triangle fan around its first corner
pub(crate) fn fan_triangulate(indices: &[usize], faces: &mut Vec<[usize; 3]>) {
    if indices.len() < 3 {
        return;
    }
    for i in 1..indices.len() - 1 {
        faces.push([indices[0], indices[i], indices[i + 1]]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshfusion_core::{shapes, ErrorKind};

    #[test]
    fn test_format_detection() {
        assert_eq!(MeshFormat::from_path("a/b/model.PLY"), Some(MeshFormat::Ply));
        assert_eq!(MeshFormat::from_path("model.obj"), Some(MeshFormat::Obj));
        assert_eq!(MeshFormat::from_path("model.off"), Some(MeshFormat::Off));
        assert_eq!(MeshFormat::from_path("model.stl"), None);
        assert_eq!(MeshFormat::from_extension(".ply"), Some(MeshFormat::Ply));
        assert_eq!(MeshFormat::Off.extension(), "off");
    }

    #[test]
    fn test_auto_roundtrip_all_formats() {
        let dir = tempfile::tempdir().unwrap();
        let mesh = shapes::cube(2.0);

        for ext in ["ply", "obj", "off"] {
            let path = dir.path().join(format!("cube.{}", ext));
            write_mesh(&mesh, &path).unwrap();
            let loaded = read_mesh(&path).unwrap();
            assert_eq!(loaded.faces, mesh.faces, "format {}", ext);
            assert_eq!(loaded.vertices, mesh.vertices, "format {}", ext);
        }
    }

    #[test]
    fn test_unsupported_format() {
        let err = read_mesh("model.stl").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn test_list_meshes_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.ply", "a.off", "notes.txt", "c.obj"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.ply")).unwrap();

        let names: Vec<String> = list_meshes(dir.path())
            .unwrap()
            .iter()
            .map(|p| mesh_stem(p).unwrap())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        assert!(list_meshes(dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_write_atomically_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("mesh.ply");

        let result = write_atomically(&path, |writer| {
            writer.write_all(b"partial")?;
            Err(Error::InvalidData("boom".to_string()))
        });
        assert!(result.is_err());
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 0);

        write_atomically(&path, |writer| Ok(writer.write_all(b"done")?)).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"done");
    }

    #[test]
    fn test_fan_triangulate() {
        let mut faces = Vec::new();
        fan_triangulate(&[4, 5], &mut faces);
        assert!(faces.is_empty());
        fan_triangulate(&[0, 1, 2, 3, 4], &mut faces);
        assert_eq!(faces, vec![[0, 1, 2], [0, 2, 3], [0, 3, 4]]);
    }
}
