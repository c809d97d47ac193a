//! OFF (Object File Format) support

use crate::{fan_triangulate, IoError, MeshReader, MeshWriter};
use meshfusion_core::{Point3f, Result, TriangleMesh};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

pub struct OffReader;
pub struct OffWriter;

/// Whitespace-separated tokens with `#` comments stripped, tagged with their
/// 1-based line number
struct Tokens<R: BufRead> {
    lines: std::io::Lines<R>,
    line: usize,
    pending: std::vec::IntoIter<String>,
}

impl<R: BufRead> Tokens<R> {
    fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
            pending: Vec::new().into_iter(),
        }
    }

    fn next_token(&mut self) -> std::result::Result<String, IoError> {
        loop {
            if let Some(token) = self.pending.next() {
                return Ok(token);
            }
            let line = self.lines.next().ok_or(IoError::ParseError {
                line: self.line,
                message: "unexpected end of file".to_string(),
            })??;
            self.line += 1;
            let content = line.split('#').next().unwrap_or("");
            self.pending = content
                .split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>()
                .into_iter();
        }
    }

    fn parse<T: std::str::FromStr>(&mut self, what: &str) -> std::result::Result<T, IoError> {
        let token = self.next_token()?;
        token.parse().map_err(|_| IoError::ParseError {
            line: self.line,
            message: format!("expected {}, found '{}'", what, token),
        })
    }
}

fn parse_off<R: BufRead>(reader: R) -> std::result::Result<TriangleMesh, IoError> {
    let mut tokens = Tokens::new(reader);

    let header = tokens.next_token()?;
    if header != "OFF" {
        return Err(IoError::Malformed {
            format: "OFF",
            message: format!("header must be 'OFF', found '{}'", header),
        });
    }

    let vertex_count: usize = tokens.parse("vertex count")?;
    let face_count: usize = tokens.parse("face count")?;
    let _edge_count: usize = tokens.parse("edge count")?;

    let mut vertices = Vec::with_capacity(vertex_count);
    for _ in 0..vertex_count {
        let x = tokens.parse("coordinate")?;
        let y = tokens.parse("coordinate")?;
        let z = tokens.parse("coordinate")?;
        vertices.push(Point3f::new(x, y, z));
    }

    let mut faces = Vec::with_capacity(face_count);
    for _ in 0..face_count {
        let n: usize = tokens.parse("face size")?;
        let indices = (0..n)
            .map(|_| tokens.parse("vertex index"))
            .collect::<std::result::Result<Vec<usize>, _>>()?;
        fan_triangulate(&indices, &mut faces);
        // optional per-face colour values up to the end of the line are
        // left in `pending` and skipped
        tokens.pending = Vec::new().into_iter();
    }

    Ok(TriangleMesh::from_vertices_and_faces(vertices, faces))
}

impl MeshReader for OffReader {
    fn read_mesh<P: AsRef<Path>>(path: P) -> Result<TriangleMesh> {
        let file = File::open(path)?;
        Ok(parse_off(BufReader::new(file))?)
    }
}

impl MeshWriter for OffWriter {
    fn write_to<W: Write>(mesh: &TriangleMesh, writer: &mut W) -> Result<()> {
        writeln!(writer, "OFF")?;
        writeln!(writer, "{} {} 0", mesh.vertex_count(), mesh.face_count())?;
        for v in &mesh.vertices {
            writeln!(writer, "{} {} {}", v.x, v.y, v.z)?;
        }
        for [a, b, c] in &mesh.faces {
            writeln!(writer, "3 {} {} {}", a, b, c)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_off_with_comments_and_polygons() {
        let text = "OFF\n# a square pyramid\n5 2 0\n0 0 0\n1 0 0\n1 1 0\n0 1 0\n0.5 0.5 1 # apex\n4 0 1 2 3\n3 0 1 4 255 0 0\n";
        let mesh = parse_off(Cursor::new(text)).unwrap();
        assert_eq!(mesh.vertex_count(), 5);
        assert_eq!(mesh.faces, vec![[0, 1, 2], [0, 2, 3], [0, 1, 4]]);
    }

    #[test]
    fn test_parse_off_errors() {
        assert!(matches!(
            parse_off(Cursor::new("PLY\n")),
            Err(IoError::Malformed { .. })
        ));
        assert!(matches!(
            parse_off(Cursor::new("OFF\n2 0 0\n0 0 0\n")),
            Err(IoError::ParseError { .. })
        ));
        match parse_off(Cursor::new("OFF\n1 0 0\n0 zero 0\n")) {
            Err(IoError::ParseError { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_off_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sphere.off");
        let mesh = meshfusion_core::shapes::icosphere(1.0, 1);

        OffWriter::write_mesh(&mesh, &path).unwrap();
        let loaded = OffReader::read_mesh(&path).unwrap();
        assert_eq!(loaded, mesh);
    }
}
