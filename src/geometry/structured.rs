//! Structured rectangle and box meshes.

use nalgebra::Vector3;

use super::element::ElementKind;
use super::{BoundaryElement, Element, Geometry, MarkerKind, Point};
use crate::error::GeometryError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridDimensions2D(pub usize, pub usize); // nx, ny (cells)

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellSize2D(pub f64, pub f64); // dx, dy

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridDimensions3D(pub usize, pub usize, pub usize);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellSize3D(pub f64, pub f64, pub f64);

fn new_point(x: f64, y: f64, z: f64, index: usize) -> Point {
    let c = Vector3::new(x, y, z);
    Point { coord: c, reference: c, global_index: index as u64, domain: true }
}

fn boundary(kind: ElementKind, elems: Vec<Vec<usize>>) -> Vec<BoundaryElement> {
    elems
        .into_iter()
        .enumerate()
        .map(|(i, nodes)| BoundaryElement { kind, nodes, global_index: i as u64 })
        .collect()
}

/// Quadrilateral mesh of `[0, nx*dx] x [0, ny*dy]` with markers `lower`,
/// `right`, `upper`, `left`.
///
/// ```text
///  (0,ny) ---- upper ---- (nx,ny)
///    |                       |
///   left                   right
///    |                       |
///  (0,0) ----- lower ----- (nx,0)
/// ```
pub fn rectangle(dimensions: GridDimensions2D, cell_size: CellSize2D) -> Result<Geometry, GeometryError> {
    let GridDimensions2D(nx, ny) = dimensions;
    let CellSize2D(dx, dy) = cell_size;
    if nx < 1 || ny < 1 {
        return Err(GeometryError::InvalidMesh(
            "grid dimensions (nx, ny) must be at least 1x1".to_string(),
        ));
    }
    if !(dx > 0.0 && dy > 0.0) {
        return Err(GeometryError::InvalidMesh("cell size must be positive".to_string()));
    }
    let id = |i: usize, j: usize| i + j * (nx + 1);

    let mut points = Vec::with_capacity((nx + 1) * (ny + 1));
    for j in 0..=ny {
        for i in 0..=nx {
            points.push(new_point(i as f64 * dx, j as f64 * dy, 0.0, id(i, j)));
        }
    }

    let mut elements = Vec::with_capacity(nx * ny);
    for j in 0..ny {
        for i in 0..nx {
            elements.push(Element {
                kind: ElementKind::Quadrilateral,
                nodes: vec![id(i, j), id(i + 1, j), id(i + 1, j + 1), id(i, j + 1)],
                global_index: (i + j * nx) as u64,
            });
        }
    }

    let line = ElementKind::Line;
    let markers = vec![
        ("lower".to_string(), MarkerKind::Wall, boundary(line, (0..nx).map(|i| vec![id(i, 0), id(i + 1, 0)]).collect())),
        ("right".to_string(), MarkerKind::Wall, boundary(line, (0..ny).map(|j| vec![id(nx, j), id(nx, j + 1)]).collect())),
        ("upper".to_string(), MarkerKind::Wall, boundary(line, (0..nx).map(|i| vec![id(i + 1, ny), id(i, ny)]).collect())),
        ("left".to_string(), MarkerKind::Wall, boundary(line, (0..ny).map(|j| vec![id(0, j + 1), id(0, j)]).collect())),
    ];

    Geometry::new(2, points, elements, markers)
}

/// Hexahedral mesh of a box with markers `xmin`, `xmax`, `ymin`, `ymax`,
/// `zmin`, `zmax`.
pub fn cuboid(dimensions: GridDimensions3D, cell_size: CellSize3D) -> Result<Geometry, GeometryError> {
    let GridDimensions3D(nx, ny, nz) = dimensions;
    let CellSize3D(dx, dy, dz) = cell_size;
    if nx < 1 || ny < 1 || nz < 1 {
        return Err(GeometryError::InvalidMesh(
            "grid dimensions (nx, ny, nz) must be at least 1x1x1".to_string(),
        ));
    }
    if !(dx > 0.0 && dy > 0.0 && dz > 0.0) {
        return Err(GeometryError::InvalidMesh("cell size must be positive".to_string()));
    }
    let id = |i: usize, j: usize, k: usize| i + j * (nx + 1) + k * (nx + 1) * (ny + 1);

    let mut points = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
    for k in 0..=nz {
        for j in 0..=ny {
            for i in 0..=nx {
                points.push(new_point(i as f64 * dx, j as f64 * dy, k as f64 * dz, id(i, j, k)));
            }
        }
    }

    let mut elements = Vec::with_capacity(nx * ny * nz);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                elements.push(Element {
                    kind: ElementKind::Hexahedron,
                    nodes: vec![
                        id(i, j, k),
                        id(i + 1, j, k),
                        id(i + 1, j + 1, k),
                        id(i, j + 1, k),
                        id(i, j, k + 1),
                        id(i + 1, j, k + 1),
                        id(i + 1, j + 1, k + 1),
                        id(i, j + 1, k + 1),
                    ],
                    global_index: (i + j * nx + k * nx * ny) as u64,
                });
            }
        }
    }

    let quad = ElementKind::Quadrilateral;
    let mut xmin = Vec::new();
    let mut xmax = Vec::new();
    for k in 0..nz {
        for j in 0..ny {
            xmin.push(vec![id(0, j, k), id(0, j, k + 1), id(0, j + 1, k + 1), id(0, j + 1, k)]);
            xmax.push(vec![id(nx, j, k), id(nx, j + 1, k), id(nx, j + 1, k + 1), id(nx, j, k + 1)]);
        }
    }
    let mut ymin = Vec::new();
    let mut ymax = Vec::new();
    for k in 0..nz {
        for i in 0..nx {
            ymin.push(vec![id(i, 0, k), id(i + 1, 0, k), id(i + 1, 0, k + 1), id(i, 0, k + 1)]);
            ymax.push(vec![id(i, ny, k), id(i, ny, k + 1), id(i + 1, ny, k + 1), id(i + 1, ny, k)]);
        }
    }
    let mut zmin = Vec::new();
    let mut zmax = Vec::new();
    for j in 0..ny {
        for i in 0..nx {
            zmin.push(vec![id(i, j, 0), id(i, j + 1, 0), id(i + 1, j + 1, 0), id(i + 1, j, 0)]);
            zmax.push(vec![id(i, j, nz), id(i + 1, j, nz), id(i + 1, j + 1, nz), id(i, j + 1, nz)]);
        }
    }

    let markers = vec![
        ("xmin".to_string(), MarkerKind::Wall, boundary(quad, xmin)),
        ("xmax".to_string(), MarkerKind::Wall, boundary(quad, xmax)),
        ("ymin".to_string(), MarkerKind::Wall, boundary(quad, ymin)),
        ("ymax".to_string(), MarkerKind::Wall, boundary(quad, ymax)),
        ("zmin".to_string(), MarkerKind::Wall, boundary(quad, zmin)),
        ("zmax".to_string(), MarkerKind::Wall, boundary(quad, zmax)),
    ];

    Geometry::new(3, points, elements, markers)
}
