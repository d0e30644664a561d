use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Line,
    Triangle,
    Quadrilateral,
    Tetrahedron,
    Hexahedron,
}

// Corner -> (a, b, c) neighbours, ordered so a valid hexahedron has a
// positive det[a - corner, b - corner, c - corner] at every corner.
const HEX_CORNERS: [[usize; 4]; 8] = [
    [0, 1, 3, 4],
    [1, 2, 0, 5],
    [2, 3, 1, 6],
    [3, 0, 2, 7],
    [4, 7, 5, 0],
    [5, 4, 6, 1],
    [6, 5, 7, 2],
    [7, 6, 4, 3],
];

const TRI_SIMPLICES: &[&[usize]] = &[&[0, 1, 2]];
const QUAD_SIMPLICES: &[&[usize]] = &[&[0, 1, 2], &[0, 2, 3]];
const TET_SIMPLICES: &[&[usize]] = &[&[0, 1, 2, 3]];
// Six tetrahedra around the 0-6 diagonal.
const HEX_SIMPLICES: &[&[usize]] = &[
    &[0, 1, 2, 6],
    &[0, 2, 3, 6],
    &[0, 3, 7, 6],
    &[0, 7, 4, 6],
    &[0, 4, 5, 6],
    &[0, 5, 1, 6],
];
const LINE_SIMPLICES: &[&[usize]] = &[&[0, 1]];

impl ElementKind {
    pub fn n_nodes(self) -> usize {
        match self {
            ElementKind::Line => 2,
            ElementKind::Triangle => 3,
            ElementKind::Quadrilateral => 4,
            ElementKind::Tetrahedron => 4,
            ElementKind::Hexahedron => 8,
        }
    }

    /// Topological dimension.
    pub fn dimension(self) -> usize {
        match self {
            ElementKind::Line => 1,
            ElementKind::Triangle | ElementKind::Quadrilateral => 2,
            ElementKind::Tetrahedron | ElementKind::Hexahedron => 3,
        }
    }

    /// Split into simplices, as local node indices.
    pub fn simplices(self) -> &'static [&'static [usize]] {
        match self {
            ElementKind::Line => LINE_SIMPLICES,
            ElementKind::Triangle => TRI_SIMPLICES,
            ElementKind::Quadrilateral => QUAD_SIMPLICES,
            ElementKind::Tetrahedron => TET_SIMPLICES,
            ElementKind::Hexahedron => HEX_SIMPLICES,
        }
    }

    /// Local node order with the opposite orientation.
    pub fn reversed_order(self) -> &'static [usize] {
        match self {
            ElementKind::Line => &[1, 0],
            ElementKind::Triangle => &[0, 2, 1],
            ElementKind::Quadrilateral => &[0, 3, 2, 1],
            ElementKind::Tetrahedron => &[0, 2, 1, 3],
            ElementKind::Hexahedron => &[4, 5, 6, 7, 0, 1, 2, 3],
        }
    }

    /// Signed Jacobian at each corner of a volume element. All entries are
    /// positive for a valid, positively oriented element.
    pub fn corner_jacobians(self, x: &[Vector3<f64>]) -> Vec<f64> {
        debug_assert_eq!(x.len(), self.n_nodes());
        match self {
            ElementKind::Line => vec![(x[1] - x[0]).norm()],
            ElementKind::Triangle | ElementKind::Quadrilateral => {
                let n = x.len();
                (0..n)
                    .map(|i| {
                        let next = x[(i + 1) % n] - x[i];
                        let prev = x[(i + n - 1) % n] - x[i];
                        cross2(&next, &prev)
                    })
                    .collect()
            }
            ElementKind::Tetrahedron => vec![det3(&(x[1] - x[0]), &(x[2] - x[0]), &(x[3] - x[0]))],
            ElementKind::Hexahedron => HEX_CORNERS
                .iter()
                .map(|&[c, a, b, d]| det3(&(x[a] - x[c]), &(x[b] - x[c]), &(x[d] - x[c])))
                .collect(),
        }
    }

    /// Signed length, area or volume.
    pub fn measure(self, x: &[Vector3<f64>]) -> f64 {
        self.simplices()
            .iter()
            .map(|s| simplex_measure(s.iter().map(|&i| x[i]).collect::<Vec<_>>().as_slice()))
            .sum()
    }
}

fn cross2(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

fn det3(a: &Vector3<f64>, b: &Vector3<f64>, c: &Vector3<f64>) -> f64 {
    Matrix3::from_columns(&[*a, *b, *c]).determinant()
}

/// Signed measure of a line, triangle (in the xy plane) or tetrahedron.
pub fn simplex_measure(x: &[Vector3<f64>]) -> f64 {
    match x.len() {
        2 => (x[1] - x[0]).norm(),
        3 => 0.5 * cross2(&(x[1] - x[0]), &(x[2] - x[0])),
        4 => det3(&(x[1] - x[0]), &(x[2] - x[0]), &(x[3] - x[0])) / 6.0,
        _ => 0.0,
    }
}

/// Area-weighted normal of a boundary element: a line in 2D, a triangle or
/// quadrilateral in 3D. Orientation follows the node order.
pub fn face_normal(kind: ElementKind, x: &[Vector3<f64>]) -> Vector3<f64> {
    match kind {
        ElementKind::Line => {
            let d = x[1] - x[0];
            Vector3::new(d.y, -d.x, 0.0)
        }
        ElementKind::Triangle => 0.5 * (x[1] - x[0]).cross(&(x[2] - x[0])),
        ElementKind::Quadrilateral => 0.5 * (x[2] - x[0]).cross(&(x[3] - x[1])),
        _ => Vector3::zeros(),
    }
}

pub fn centroid(x: &[Vector3<f64>]) -> Vector3<f64> {
    if x.is_empty() {
        return Vector3::zeros();
    }
    x.iter().fold(Vector3::zeros(), |acc, p| acc + p) / x.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_cube() -> Vec<Vector3<f64>> {
        vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(1.0, 0.0, 1.0),
            Vector3::new(1.0, 1.0, 1.0),
            Vector3::new(0.0, 1.0, 1.0),
        ]
    }

    #[test]
    fn test_hexahedron_corner_jacobians_positive() {
        let x = unit_cube();
        let jac = ElementKind::Hexahedron.corner_jacobians(&x);
        assert_eq!(jac.len(), 8);
        for j in jac {
            assert_relative_eq!(j, 1.0, epsilon = 1e-12);
        }
        assert_relative_eq!(ElementKind::Hexahedron.measure(&x), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_reversed_hexahedron_is_negative() {
        let x = unit_cube();
        let flipped: Vec<_> = ElementKind::Hexahedron.reversed_order().iter().map(|&i| x[i]).collect();
        assert!(ElementKind::Hexahedron.corner_jacobians(&flipped).iter().all(|&j| j < 0.0));
    }

    #[test]
    fn test_quadrilateral_measure_and_inversion() {
        let mut x = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(2.0, 0.0, 0.0),
            Vector3::new(2.0, 1.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        ];
        assert_relative_eq!(ElementKind::Quadrilateral.measure(&x), 2.0, epsilon = 1e-12);
        assert!(ElementKind::Quadrilateral.corner_jacobians(&x).iter().all(|&j| j > 0.0));

        // Push node 2 across the diagonal: the quad becomes non-convex and
        // the Jacobian at that corner turns negative.
        x[2] = Vector3::new(0.5, 0.25, 0.0);
        let jac = ElementKind::Quadrilateral.corner_jacobians(&x);
        assert!(jac[2] < 0.0);
    }

    #[test]
    fn test_face_normal_of_line_points_right_of_direction() {
        let x = [Vector3::new(0.0, 0.0, 0.0), Vector3::new(2.0, 0.0, 0.0)];
        let n = face_normal(ElementKind::Line, &x);
        assert_relative_eq!(n, Vector3::new(0.0, -2.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_tetrahedron_volume() {
        let x = [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
        ];
        assert_relative_eq!(ElementKind::Tetrahedron.measure(&x), 1.0 / 6.0, epsilon = 1e-12);
    }
}
