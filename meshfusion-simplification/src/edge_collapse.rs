//! Edge collapse decimation
//!
//! Edges are collapsed cheapest first under the quadric error metric, the
//! surviving vertex moving to the position that best fits the planes of both
//! endpoints. A collapse is refused when it would pinch the surface (the link
//! condition), fold a face over, or leave a vertex with fewer than three
//! neighbors. Closed edge-manifold inputs therefore stay closed and
//! edge-manifold.

use crate::quadric::{best_position, face_quadric, to_f64, Quadric};
use crate::MeshSimplifier;
use meshfusion_core::{Error, Point3f, Result, TriangleMesh};
use nalgebra::Vector3;
use priority_queue::PriorityQueue;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

/// Smallest cosine between a face normal before and after a collapse
const MIN_NORMAL_COSINE: f64 = 0.2;

type EdgeKey = (usize, usize);

#[inline]
fn edge_key(a: usize, b: usize) -> EdgeKey {
    (a.min(b), a.max(b))
}

/// Parameters for quadric decimation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecimationParams {
    /// Stop once the mesh has at most this many faces
    pub target_faces: usize,
    /// Stop before the first collapse whose error exceeds this
    pub max_error: Option<f64>,
    /// Never move vertices that lie on an open boundary
    pub preserve_boundary: bool,
    /// Extra cost of a boundary collapse when boundaries may move
    pub boundary_weight: f64,
}

impl Default for DecimationParams {
    fn default() -> Self {
        Self {
            target_faces: 10_000,
            max_error: None,
            preserve_boundary: true,
            boundary_weight: 100.0,
        }
    }
}

impl DecimationParams {
    #[must_use]
    pub fn with_target_faces(mut self, target_faces: usize) -> Self {
        self.target_faces = target_faces;
        self
    }

    #[must_use]
    pub fn with_max_error(mut self, max_error: f64) -> Self {
        self.max_error = Some(max_error);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_faces == 0 {
            return Err(Error::Configuration("target face count must be positive".to_string()));
        }
        if let Some(max_error) = self.max_error {
            if !(max_error.is_finite() && max_error >= 0.0) {
                return Err(Error::Configuration(format!(
                    "maximum collapse error must be non-negative, got {}",
                    max_error
                )));
            }
        }
        if !(self.boundary_weight.is_finite() && self.boundary_weight >= 0.0) {
            return Err(Error::Configuration(format!(
                "boundary weight must be non-negative, got {}",
                self.boundary_weight
            )));
        }
        Ok(())
    }
}

/// Queue entry; the cheapest edge pops first, ties go to the lowest key
#[derive(Debug, Clone, Copy)]
struct EdgeCost {
    cost: f64,
    edge: EdgeKey,
}

impl PartialEq for EdgeCost {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EdgeCost {}

impl PartialOrd for EdgeCost {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EdgeCost {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.edge.cmp(&self.edge))
    }
}

/// Indexed face list with vertex-to-face adjacency, edited in place
struct CollapseMesh {
    positions: Vec<Point3f>,
    faces: Vec<[usize; 3]>,
    face_alive: Vec<bool>,
    /// Faces around each vertex; may still list dead faces
    vertex_faces: Vec<Vec<usize>>,
    quadrics: Vec<Quadric>,
    on_boundary: Vec<bool>,
    active_faces: usize,
}

impl CollapseMesh {
    fn new(mesh: &TriangleMesh) -> Result<Self> {
        let n = mesh.vertex_count();
        let mut vertex_faces = vec![Vec::new(); n];
        let mut quadrics = vec![Quadric::zeros(); n];
        let mut edge_use: HashMap<EdgeKey, usize> = HashMap::new();

        for (fi, face) in mesh.faces.iter().enumerate() {
            if face.iter().any(|&v| v >= n) {
                return Err(Error::InvalidMesh(format!(
                    "face {} references a vertex beyond {}",
                    fi, n
                )));
            }
            if face[0] == face[1] || face[1] == face[2] || face[2] == face[0] {
                return Err(Error::InvalidMesh(format!("face {} repeats a vertex", fi)));
            }
            for k in 0..3 {
                vertex_faces[face[k]].push(fi);
                *edge_use.entry(edge_key(face[k], face[(k + 1) % 3])).or_insert(0) += 1;
            }
            let [a, b, c] = face.map(|v| mesh.vertices[v]);
            if let Some(q) = face_quadric(&a, &b, &c) {
                for &v in face {
                    quadrics[v] += q;
                }
            }
        }

        let mut on_boundary = vec![false; n];
        for (&(a, b), &count) in &edge_use {
            if count == 1 {
                on_boundary[a] = true;
                on_boundary[b] = true;
            }
        }

        Ok(Self {
            positions: mesh.vertices.clone(),
            faces: mesh.faces.clone(),
            face_alive: vec![true; mesh.face_count()],
            vertex_faces,
            quadrics,
            on_boundary,
            active_faces: mesh.face_count(),
        })
    }

    fn incident(&self, v: usize) -> impl Iterator<Item = usize> + '_ {
        self.vertex_faces[v].iter().copied().filter(move |&f| self.face_alive[f])
    }

    fn neighbors(&self, v: usize) -> BTreeSet<usize> {
        self.incident(v)
            .flat_map(|f| self.faces[f])
            .filter(|&u| u != v)
            .collect()
    }

    /// Every edge of the live faces, in key order
    fn edges(&self) -> BTreeSet<EdgeKey> {
        (0..self.faces.len())
            .filter(|&f| self.face_alive[f])
            .flat_map(|f| {
                let [a, b, c] = self.faces[f];
                [edge_key(a, b), edge_key(b, c), edge_key(c, a)]
            })
            .collect()
    }

    /// Unit normal of `face`, optionally with vertex `moved.0` placed at `moved.1`
    fn normal(&self, face: [usize; 3], moved: Option<(usize, &Vector3<f64>)>) -> Option<Vector3<f64>> {
        let [a, b, c] = face.map(|v| match moved {
            Some((m, p)) if m == v => *p,
            _ => to_f64(&self.positions[v]),
        });
        let normal = (b - a).cross(&(c - a));
        let length = normal.norm();
        (length.is_finite() && length > 0.0).then(|| normal / length)
    }

    /// Whether `b` can merge into `a` at `target` without breaking the surface
    fn can_collapse(&self, a: usize, b: usize, target: &Vector3<f64>) -> bool {
        let shared: Vec<usize> = self.incident(a).filter(|&f| self.faces[f].contains(&b)).collect();
        if shared.is_empty() || shared.len() > 2 {
            return false;
        }

        // link condition: the only common neighbors are the apexes of the edge
        let apexes: BTreeSet<usize> = shared
            .iter()
            .flat_map(|&f| self.faces[f])
            .filter(|&v| v != a && v != b)
            .collect();
        let around_a = self.neighbors(a);
        let around_b = self.neighbors(b);
        if around_a.intersection(&around_b).copied().collect::<BTreeSet<_>>() != apexes {
            return false;
        }

        // no vertex may end up with fewer than three neighbors
        let merged = around_a.union(&around_b).filter(|&&v| v != a && v != b).count();
        if merged < 3 || apexes.iter().any(|&c| self.neighbors(c).len() <= 3) {
            return false;
        }

        for v in [a, b] {
            for f in self.incident(v) {
                let face = self.faces[f];
                if face.contains(&a) && face.contains(&b) {
                    continue;
                }
                let after = match self.normal(face, Some((v, target))) {
                    Some(normal) => normal,
                    None => return false,
                };
                if let Some(before) = self.normal(face, None) {
                    if before.dot(&after) < MIN_NORMAL_COSINE {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Merge `b` into `a` and move `a` to `target`
    fn collapse(&mut self, a: usize, b: usize, target: &Vector3<f64>) {
        for f in std::mem::take(&mut self.vertex_faces[b]) {
            if !self.face_alive[f] {
                continue;
            }
            if self.faces[f].contains(&a) {
                self.face_alive[f] = false;
                self.active_faces -= 1;
                continue;
            }
            for v in self.faces[f].iter_mut().filter(|v| **v == b) {
                *v = a;
            }
            self.vertex_faces[a].push(f);
        }

        let face_alive = &self.face_alive;
        self.vertex_faces[a].retain(|&f| face_alive[f]);
        self.positions[a] = Point3f::new(target.x as f32, target.y as f32, target.z as f32);
        let absorbed = self.quadrics[b];
        self.quadrics[a] += absorbed;
        self.on_boundary[a] |= self.on_boundary[b];
    }

    /// Live faces over the vertices they use, keeping the original order
    fn into_mesh(self) -> TriangleMesh {
        let mut remap = vec![usize::MAX; self.positions.len()];
        let faces: Vec<[usize; 3]> = self
            .faces
            .iter()
            .zip(&self.face_alive)
            .filter(|(_, alive)| **alive)
            .map(|(face, _)| *face)
            .collect();
        for face in &faces {
            for &v in face {
                remap[v] = 0;
            }
        }

        let mut vertices = Vec::new();
        for (v, slot) in remap.iter_mut().enumerate() {
            if *slot == 0 {
                *slot = vertices.len();
                vertices.push(self.positions[v]);
            }
        }
        let faces = faces.into_iter().map(|face| face.map(|v| remap[v])).collect();
        TriangleMesh::from_vertices_and_faces(vertices, faces)
    }
}

/// Quadric edge-collapse decimator
#[derive(Debug, Clone, Default)]
pub struct EdgeCollapseSimplifier {
    pub params: DecimationParams,
}

impl EdgeCollapseSimplifier {
    pub fn new(params: DecimationParams) -> Self {
        Self { params }
    }

    /// Decimate until the configured face count is reached or no edge can go
    pub fn decimate(&self, mesh: &TriangleMesh) -> Result<TriangleMesh> {
        self.params.validate()?;
        self.decimate_to(mesh, self.params.target_faces)
    }

    /// Placement and cost of collapsing `edge`, `None` when it must stay
    fn placement(&self, work: &CollapseMesh, (a, b): EdgeKey) -> Option<(Vector3<f64>, f64)> {
        let boundary = work.on_boundary[a] || work.on_boundary[b];
        if boundary && self.params.preserve_boundary {
            return None;
        }
        let q = work.quadrics[a] + work.quadrics[b];
        let (position, mut cost) = best_position(&q, &work.positions[a], &work.positions[b]);
        if boundary {
            cost += self.params.boundary_weight;
        }
        Some((position, cost))
    }

    fn enqueue(&self, work: &CollapseMesh, queue: &mut PriorityQueue<EdgeKey, EdgeCost>, edge: EdgeKey) {
        match self.placement(work, edge) {
            Some((_, cost)) => {
                queue.push(edge, EdgeCost { cost, edge });
            }
            None => {
                queue.remove(&edge);
            }
        }
    }

    fn decimate_to(&self, mesh: &TriangleMesh, target_faces: usize) -> Result<TriangleMesh> {
        if mesh.faces.is_empty() {
            return Err(Error::InvalidMesh("mesh has no faces to simplify".to_string()));
        }
        if mesh.face_count() <= target_faces {
            return Ok(mesh.clone());
        }

        let mut work = CollapseMesh::new(mesh)?;
        let mut queue = PriorityQueue::new();
        for edge in work.edges() {
            self.enqueue(&work, &mut queue, edge);
        }

        let mut collapses = 0usize;
        let mut refused = 0usize;
        while work.active_faces > target_faces {
            let Some(((a, b), entry)) = queue.pop() else {
                break;
            };
            if self.params.max_error.is_some_and(|max| entry.cost > max) {
                break;
            }
            let Some((target, _)) = self.placement(&work, (a, b)) else {
                continue;
            };
            if !work.can_collapse(a, b, &target) {
                refused += 1;
                continue;
            }

            let stale = work.neighbors(b);
            work.collapse(a, b, &target);
            collapses += 1;
            for n in stale {
                queue.remove(&edge_key(b, n));
            }
            for n in work.neighbors(a) {
                self.enqueue(&work, &mut queue, edge_key(a, n));
            }
        }

        debug!("{} collapses, {} refused", collapses, refused);
        let result = work.into_mesh();
        info!(
            "decimated {} faces to {} ({} vertices)",
            mesh.face_count(),
            result.face_count(),
            result.vertex_count()
        );
        Ok(result)
    }
}

impl MeshSimplifier for EdgeCollapseSimplifier {
    fn simplify(&self, mesh: &TriangleMesh, reduction_ratio: f32) -> Result<TriangleMesh> {
        self.params.validate()?;
        if !(0.0..=1.0).contains(&reduction_ratio) {
            return Err(Error::Configuration(format!(
                "reduction ratio must lie in [0, 1], got {}",
                reduction_ratio
            )));
        }
        if mesh.faces.is_empty() {
            return Err(Error::InvalidMesh("mesh has no faces to simplify".to_string()));
        }
        if reduction_ratio == 0.0 {
            return Ok(mesh.clone());
        }

        let target = ((1.0 - reduction_ratio) * mesh.face_count() as f32) as usize;
        self.decimate_to(mesh, target.max(1))
    }
}
