//! Zone geometry: points, volume elements and boundary markers.
//!
//! Points carry two coordinate sets. `coord` is the current position and is
//! what deformation writes back. `reference` is the position the mesh was
//! loaded with; target boundary displacements are measured from it.

pub mod element;
pub mod mesh_io;
pub mod structured;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GeometryError;
use element::{centroid, face_normal, ElementKind};

#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub coord: Vector3<f64>,
    pub reference: Vector3<f64>,
    pub global_index: u64,
    /// `true` when this partition owns the point, `false` for a halo copy.
    pub domain: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub kind: ElementKind,
    pub nodes: Vec<usize>,
    pub global_index: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryElement {
    pub kind: ElementKind,
    pub nodes: Vec<usize>,
    pub global_index: u64,
}

/// A boundary point seen from one marker. Coordinates, ownership and global
/// index live on the referenced [`Point`].
#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    pub point: usize,
    /// Area-weighted outward normal.
    pub normal: Vector3<f64>,
    /// Target displacement from the reference position.
    pub displacement: Vector3<f64>,
    pub velocity: Vector3<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    #[default]
    Wall,
    Farfield,
    Symmetry,
    Inlet,
    Outlet,
    Interface,
}

impl MarkerKind {
    pub fn name(self) -> &'static str {
        match self {
            MarkerKind::Wall => "wall",
            MarkerKind::Farfield => "farfield",
            MarkerKind::Symmetry => "symmetry",
            MarkerKind::Inlet => "inlet",
            MarkerKind::Outlet => "outlet",
            MarkerKind::Interface => "interface",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub tag: String,
    pub kind: MarkerKind,
    pub elements: Vec<BoundaryElement>,
    pub vertices: Vec<Vertex>,
}

impl Marker {
    pub fn vertex(&self, i_vertex: usize) -> Result<&Vertex, GeometryError> {
        self.vertices.get(i_vertex).ok_or(GeometryError::InvalidIndex {
            what: "vertex",
            index: i_vertex,
            count: self.vertices.len(),
        })
    }

    pub fn vertex_mut(&mut self, i_vertex: usize) -> Result<&mut Vertex, GeometryError> {
        let count = self.vertices.len();
        self.vertices.get_mut(i_vertex).ok_or(GeometryError::InvalidIndex {
            what: "vertex",
            index: i_vertex,
            count,
        })
    }
}

/// Size and shape summary of a mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshQuality {
    pub min_volume: f64,
    pub max_volume: f64,
    pub min_jacobian: f64,
    pub min_jacobian_element: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub n_dim: usize,
    pub points: Vec<Point>,
    pub elements: Vec<Element>,
    pub markers: Vec<Marker>,
}

impl Geometry {
    /// Builds a zone geometry and checks it: node indices in range, element
    /// kinds matching the dimension, consistent orientation. Elements given
    /// with negative orientation are reordered.
    pub fn new(
        n_dim: usize,
        points: Vec<Point>,
        elements: Vec<Element>,
        markers: Vec<(String, MarkerKind, Vec<BoundaryElement>)>,
    ) -> Result<Self, GeometryError> {
        if n_dim != 2 && n_dim != 3 {
            return Err(GeometryError::InvalidMesh(format!(
                "dimension must be 2 or 3, got {n_dim}"
            )));
        }
        let n_point = points.len();
        let mut geometry = Self {
            n_dim,
            points,
            elements: Vec::with_capacity(elements.len()),
            markers: Vec::with_capacity(markers.len()),
        };

        for (i_elem, mut elem) in elements.into_iter().enumerate() {
            geometry.check_element(i_elem, elem.kind, &elem.nodes, n_dim)?;
            let jac = elem.kind.corner_jacobians(&geometry.node_coords(&elem.nodes));
            if jac.iter().all(|&j| j < 0.0) {
                elem.nodes = elem.kind.reversed_order().iter().map(|&k| elem.nodes[k]).collect();
            } else if jac.iter().any(|&j| j <= 0.0) {
                return Err(GeometryError::InvalidMesh(format!(
                    "element {i_elem} is degenerate or inverted"
                )));
            }
            geometry.elements.push(elem);
        }

        let mut tags = BTreeSet::new();
        for (tag, kind, elements) in markers {
            if !tags.insert(tag.clone()) {
                return Err(GeometryError::InvalidMesh(format!("duplicate marker tag '{tag}'")));
            }
            for (i_elem, elem) in elements.iter().enumerate() {
                geometry.check_element(i_elem, elem.kind, &elem.nodes, n_dim - 1)?;
            }
            let mut seen = HashMap::new();
            let mut vertices = Vec::new();
            for elem in &elements {
                for &node in &elem.nodes {
                    seen.entry(node).or_insert_with(|| {
                        vertices.push(Vertex {
                            point: node,
                            normal: Vector3::zeros(),
                            displacement: Vector3::zeros(),
                            velocity: Vector3::zeros(),
                        });
                        vertices.len() - 1
                    });
                }
            }
            geometry.markers.push(Marker { tag, kind, elements, vertices });
        }

        geometry.compute_vertex_normals();
        debug!(
            n_dim,
            n_point,
            n_elem = geometry.elements.len(),
            n_marker = geometry.markers.len(),
            "Geometry built"
        );
        Ok(geometry)
    }

    fn check_element(
        &self,
        i_elem: usize,
        kind: ElementKind,
        nodes: &[usize],
        expected_dim: usize,
    ) -> Result<(), GeometryError> {
        if kind.dimension() != expected_dim {
            return Err(GeometryError::InvalidMesh(format!(
                "element {i_elem}: {kind:?} is not a {expected_dim}D element"
            )));
        }
        if nodes.len() != kind.n_nodes() {
            return Err(GeometryError::InvalidMesh(format!(
                "element {i_elem}: {kind:?} needs {} nodes, got {}",
                kind.n_nodes(),
                nodes.len()
            )));
        }
        if let Some(&bad) = nodes.iter().find(|&&n| n >= self.points.len()) {
            return Err(GeometryError::InvalidMesh(format!(
                "element {i_elem}: node {bad} out of range ({} points)",
                self.points.len()
            )));
        }
        Ok(())
    }

    pub fn n_point(&self) -> usize {
        self.points.len()
    }

    pub fn n_elem(&self) -> usize {
        self.elements.len()
    }

    pub fn n_marker(&self) -> usize {
        self.markers.len()
    }

    pub fn marker(&self, i_marker: usize) -> Result<&Marker, GeometryError> {
        self.markers.get(i_marker).ok_or(GeometryError::InvalidIndex {
            what: "marker",
            index: i_marker,
            count: self.markers.len(),
        })
    }

    pub fn marker_mut(&mut self, i_marker: usize) -> Result<&mut Marker, GeometryError> {
        let count = self.markers.len();
        self.markers.get_mut(i_marker).ok_or(GeometryError::InvalidIndex {
            what: "marker",
            index: i_marker,
            count,
        })
    }

    pub fn vertex(&self, i_marker: usize, i_vertex: usize) -> Result<&Vertex, GeometryError> {
        self.marker(i_marker)?.vertex(i_vertex)
    }

    pub fn vertex_mut(&mut self, i_marker: usize, i_vertex: usize) -> Result<&mut Vertex, GeometryError> {
        self.marker_mut(i_marker)?.vertex_mut(i_vertex)
    }

    pub fn marker_index(&self, tag: &str) -> Option<usize> {
        self.markers.iter().position(|m| m.tag == tag)
    }

    pub fn node_coords(&self, nodes: &[usize]) -> Vec<Vector3<f64>> {
        nodes.iter().map(|&n| self.points[n].coord).collect()
    }

    pub fn coordinates(&self) -> Vec<Vector3<f64>> {
        self.points.iter().map(|p| p.coord).collect()
    }

    pub fn reference_coordinates(&self) -> Vec<Vector3<f64>> {
        self.points.iter().map(|p| p.reference).collect()
    }

    /// Overwrites current coordinates and refreshes vertex normals.
    pub fn set_coordinates(&mut self, coords: &[Vector3<f64>]) -> Result<(), GeometryError> {
        if coords.len() != self.points.len() {
            return Err(GeometryError::LengthMismatch {
                expected: self.points.len(),
                provided: coords.len(),
            });
        }
        for (point, c) in self.points.iter_mut().zip(coords) {
            point.coord = *c;
        }
        self.compute_vertex_normals();
        Ok(())
    }

    /// Moves every point to `coords` and makes that the reference state.
    /// Target displacements keep their values and are measured from the new
    /// reference.
    pub fn rebase_coordinates(&mut self, coords: &[Vector3<f64>]) -> Result<(), GeometryError> {
        self.set_coordinates(coords)?;
        for point in self.points.iter_mut() {
            point.reference = point.coord;
        }
        Ok(())
    }

    /// Smallest corner Jacobian of every element for the given coordinates.
    pub fn min_corner_jacobians(&self, coords: &[Vector3<f64>]) -> Vec<f64> {
        self.elements
            .iter()
            .map(|elem| {
                let x: Vec<_> = elem.nodes.iter().map(|&n| coords[n]).collect();
                elem.kind
                    .corner_jacobians(&x)
                    .into_iter()
                    .fold(f64::INFINITY, f64::min)
            })
            .collect()
    }

    /// First element with a non-positive corner Jacobian, if any.
    pub fn find_invalid_element(&self, coords: &[Vector3<f64>]) -> Option<(usize, f64)> {
        self.min_corner_jacobians(coords)
            .into_iter()
            .enumerate()
            .find(|&(_, j)| !(j > 0.0))
    }

    pub fn quality(&self) -> MeshQuality {
        let coords = self.coordinates();
        let mut quality = MeshQuality {
            min_volume: f64::INFINITY,
            max_volume: 0.0,
            min_jacobian: f64::INFINITY,
            min_jacobian_element: 0,
        };
        for (i_elem, (elem, jac)) in self
            .elements
            .iter()
            .zip(self.min_corner_jacobians(&coords))
            .enumerate()
        {
            let volume = elem.kind.measure(&self.node_coords(&elem.nodes));
            quality.min_volume = quality.min_volume.min(volume);
            quality.max_volume = quality.max_volume.max(volume);
            if jac < quality.min_jacobian {
                quality.min_jacobian = jac;
                quality.min_jacobian_element = i_elem;
            }
        }
        quality
    }

    /// Point -> volume elements that use it.
    pub fn point_elements(&self) -> Vec<Vec<usize>> {
        let mut map = vec![Vec::new(); self.points.len()];
        for (i_elem, elem) in self.elements.iter().enumerate() {
            for &n in &elem.nodes {
                map[n].push(i_elem);
            }
        }
        map
    }

    /// Unique mesh edges `(a, b)` with `a < b`, taken from element simplices.
    pub fn edges(&self) -> Vec<(usize, usize)> {
        let mut edges = BTreeSet::new();
        for elem in &self.elements {
            for simplex in elem.kind.simplices() {
                for (k, &a) in simplex.iter().enumerate() {
                    for &b in &simplex[k + 1..] {
                        let (a, b) = (elem.nodes[a], elem.nodes[b]);
                        edges.insert((a.min(b), a.max(b)));
                    }
                }
            }
        }
        edges.into_iter().collect()
    }

    /// Recomputes area-weighted outward normals of every marker vertex from
    /// the current coordinates.
    pub fn compute_vertex_normals(&mut self) {
        let point_elements = self.point_elements();
        let mut marker_normals = Vec::with_capacity(self.markers.len());
        for marker in &self.markers {
            let index: HashMap<usize, usize> = marker
                .vertices
                .iter()
                .enumerate()
                .map(|(i, v)| (v.point, i))
                .collect();
            let mut normals = vec![Vector3::zeros(); marker.vertices.len()];
            for face in &marker.elements {
                let x = self.node_coords(&face.nodes);
                let mut normal = face_normal(face.kind, &x);
                if let Some(owner) = self.owner_element(&point_elements, &face.nodes) {
                    let inward = centroid(&self.node_coords(&self.elements[owner].nodes)) - centroid(&x);
                    if normal.dot(&inward) > 0.0 {
                        normal = -normal;
                    }
                }
                let share = normal / face.nodes.len() as f64;
                for node in &face.nodes {
                    normals[index[node]] += share;
                }
            }
            marker_normals.push(normals);
        }
        for (marker, normals) in self.markers.iter_mut().zip(marker_normals) {
            for (vertex, normal) in marker.vertices.iter_mut().zip(normals) {
                vertex.normal = normal;
            }
        }
    }

    fn owner_element(&self, point_elements: &[Vec<usize>], face: &[usize]) -> Option<usize> {
        point_elements[face[0]]
            .iter()
            .copied()
            .find(|&e| face.iter().all(|n| self.elements[e].nodes.contains(n)))
    }

    /// Dirichlet displacement for every point that lies on a marker. A point
    /// on several markers takes the first non-zero target in marker order.
    pub fn boundary_displacements(&self) -> BTreeMap<usize, Vector3<f64>> {
        let mut map: BTreeMap<usize, Vector3<f64>> = BTreeMap::new();
        for marker in &self.markers {
            for vertex in &marker.vertices {
                let entry = map.entry(vertex.point).or_insert_with(Vector3::zeros);
                if *entry == Vector3::zeros() {
                    *entry = vertex.displacement;
                }
            }
        }
        map
    }

    pub fn n_halo_points(&self) -> usize {
        self.points.iter().filter(|p| !p.domain).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::structured::{rectangle, CellSize2D, GridDimensions2D};
    use approx::assert_relative_eq;

    fn point(x: f64, y: f64) -> Point {
        let c = Vector3::new(x, y, 0.0);
        Point { coord: c, reference: c, global_index: 0, domain: true }
    }

    #[test]
    fn test_clockwise_triangle_is_reoriented() {
        let points = vec![point(0.0, 0.0), point(0.0, 1.0), point(1.0, 0.0)];
        let elements = vec![Element { kind: ElementKind::Triangle, nodes: vec![0, 1, 2], global_index: 0 }];
        let geometry = Geometry::new(2, points, elements, vec![]).unwrap();
        assert_eq!(geometry.elements[0].nodes, vec![0, 2, 1]);
        assert!(geometry.find_invalid_element(&geometry.coordinates()).is_none());
    }

    #[test]
    fn test_out_of_range_node_rejected() {
        let points = vec![point(0.0, 0.0), point(1.0, 0.0), point(0.0, 1.0)];
        let elements = vec![Element { kind: ElementKind::Triangle, nodes: vec![0, 1, 7], global_index: 0 }];
        assert!(matches!(
            Geometry::new(2, points, elements, vec![]),
            Err(GeometryError::InvalidMesh(_))
        ));
    }

    #[test]
    fn test_wrong_element_dimension_rejected() {
        let points = vec![point(0.0, 0.0), point(1.0, 0.0), point(0.0, 1.0), point(0.0, 0.0)];
        let elements = vec![Element { kind: ElementKind::Tetrahedron, nodes: vec![0, 1, 2, 3], global_index: 0 }];
        assert!(Geometry::new(2, points, elements, vec![]).is_err());
    }

    #[test]
    fn test_marker_vertices_and_outward_normals() {
        let geometry = rectangle(GridDimensions2D(2, 2), CellSize2D(1.0, 1.0)).unwrap();
        let lower = geometry.marker(geometry.marker_index("lower").unwrap()).unwrap();
        assert_eq!(lower.vertices.len(), 3);
        let total: Vector3<f64> = lower.vertices.iter().map(|v| v.normal).sum();
        assert_relative_eq!(total, Vector3::new(0.0, -2.0, 0.0), epsilon = 1e-12);

        let right = geometry.marker(geometry.marker_index("right").unwrap()).unwrap();
        for v in &right.vertices {
            assert!(v.normal.x > 0.0);
        }
    }

    #[test]
    fn test_marker_index_errors() {
        let geometry = rectangle(GridDimensions2D(1, 1), CellSize2D(1.0, 1.0)).unwrap();
        assert!(matches!(
            geometry.marker(4),
            Err(GeometryError::InvalidIndex { what: "marker", index: 4, count: 4 })
        ));
        assert!(matches!(
            geometry.vertex(0, 2),
            Err(GeometryError::InvalidIndex { what: "vertex", index: 2, count: 2 })
        ));
    }

    #[test]
    fn test_edges_of_single_quad() {
        let geometry = rectangle(GridDimensions2D(1, 1), CellSize2D(1.0, 1.0)).unwrap();
        // Four sides plus the splitting diagonal.
        assert_eq!(geometry.edges().len(), 5);
    }

    #[test]
    fn test_quality_of_uniform_grid() {
        let geometry = rectangle(GridDimensions2D(3, 2), CellSize2D(0.5, 0.25)).unwrap();
        let quality = geometry.quality();
        assert_relative_eq!(quality.min_volume, 0.125, epsilon = 1e-12);
        assert_relative_eq!(quality.max_volume, 0.125, epsilon = 1e-12);
        assert_relative_eq!(quality.min_jacobian, 0.125, epsilon = 1e-12);
    }

    #[test]
    fn test_boundary_displacement_prefers_nonzero_target() {
        let mut geometry = rectangle(GridDimensions2D(1, 1), CellSize2D(1.0, 1.0)).unwrap();
        let upper = geometry.marker_index("upper").unwrap();
        let corner = geometry.markers[upper].vertices[0].point;
        geometry.markers[upper].vertices[0].displacement = Vector3::new(0.0, 0.1, 0.0);
        let map = geometry.boundary_displacements();
        assert_eq!(map.len(), 4);
        assert_relative_eq!(map[&corner], Vector3::new(0.0, 0.1, 0.0));
    }
}
