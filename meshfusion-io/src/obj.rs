//! OBJ format support
//!
//! Only positions and faces are kept. Texture coordinates, normals, groups
//! and materials are ignored.

use crate::{fan_triangulate, MeshReader, MeshWriter};
use meshfusion_core::{Error, Point3f, Result, TriangleMesh};
use obj::ObjData;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

pub struct ObjReader;
pub struct ObjWriter;

impl MeshReader for ObjReader {
    fn read_mesh<P: AsRef<Path>>(path: P) -> Result<TriangleMesh> {
        let file = File::open(path)?;
        let data = ObjData::load_buf(BufReader::new(file))
            .map_err(|e| Error::InvalidData(format!("OBJ: {}", e)))?;

        let vertices = data
            .position
            .iter()
            .map(|&[x, y, z]| Point3f::new(x, y, z))
            .collect();

        let mut faces = Vec::new();
        for object in &data.objects {
            for group in &object.groups {
                for poly in &group.polys {
                    let indices: Vec<usize> = poly.0.iter().map(|tuple| tuple.0).collect();
                    fan_triangulate(&indices, &mut faces);
                }
            }
        }

        Ok(TriangleMesh::from_vertices_and_faces(vertices, faces))
    }
}

impl MeshWriter for ObjWriter {
    fn write_to<W: Write>(mesh: &TriangleMesh, writer: &mut W) -> Result<()> {
        for v in &mesh.vertices {
            writeln!(writer, "v {} {} {}", v.x, v.y, v.z)?;
        }
        for [a, b, c] in &mesh.faces {
            writeln!(writer, "f {} {} {}", a + 1, b + 1, c + 1)?;
        }
        Ok(())
    }
}
