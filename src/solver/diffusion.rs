use tracing::debug;

use crate::config::Config;
use crate::error::SolverError;
use crate::geometry::Geometry;
use crate::numerics::Numerics;

/// Scalar field relaxed towards the discrete Laplace solution on the edge
/// graph. Points on markers listed in `markers.dirichlet` keep their value.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffusionSolver {
    field: Vec<f64>,
    fixed: Vec<Option<f64>>,
    source: Vec<f64>,
    relaxation: f64,
    iterations: usize,
}

impl DiffusionSolver {
    pub fn new(geometry: &Geometry, config: &Config) -> Result<Self, SolverError> {
        let n_point = geometry.n_point();
        let mut fixed = vec![None; n_point];
        for marker in &geometry.markers {
            let Some(&value) = config.markers.dirichlet.get(&marker.tag) else {
                continue;
            };
            if !value.is_finite() {
                return Err(SolverError::InvalidParameter(format!(
                    "Dirichlet value on marker '{}' is not finite",
                    marker.tag
                )));
            }
            for vertex in &marker.vertices {
                fixed[vertex.point].get_or_insert(value);
            }
        }
        let field = fixed.iter().map(|f| f.unwrap_or(0.0)).collect();
        Ok(Self {
            field,
            fixed,
            source: vec![0.0; n_point],
            relaxation: config.relaxation,
            iterations: 0,
        })
    }

    pub fn field(&self) -> &[f64] {
        &self.field
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Volumetric source subtracted from the balance at every point, such as
    /// the harmonic-balance time derivative.
    pub fn set_source(&mut self, source: Vec<f64>) -> Result<(), SolverError> {
        if source.len() != self.field.len() {
            return Err(SolverError::LengthMismatch {
                expected: self.field.len(),
                provided: source.len(),
            });
        }
        self.source = source;
        Ok(())
    }

    /// One under-relaxed Jacobi sweep. Returns the RMS update.
    pub fn iterate(&mut self, numerics: &Numerics) -> Result<f64, SolverError> {
        let n = self.field.len();
        if numerics.dual_volumes.len() != n {
            return Err(SolverError::LengthMismatch {
                expected: n,
                provided: numerics.dual_volumes.len(),
            });
        }
        let mut flux = vec![0.0; n];
        let mut diagonal = vec![0.0; n];
        for edge in &numerics.edges {
            flux[edge.a] += edge.weight * self.field[edge.b];
            flux[edge.b] += edge.weight * self.field[edge.a];
            diagonal[edge.a] += edge.weight;
            diagonal[edge.b] += edge.weight;
        }

        let mut sum_sq = 0.0;
        let mut next = self.field.clone();
        for i in 0..n {
            if self.fixed[i].is_some() || diagonal[i] == 0.0 {
                continue;
            }
            let target = (flux[i] - numerics.dual_volumes[i] * self.source[i]) / diagonal[i];
            let delta = self.relaxation * (target - self.field[i]);
            next[i] += delta;
            sum_sq += delta * delta;
        }
        if next.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::LinearSolve("diffusion field diverged".to_string()));
        }
        self.field = next;
        self.iterations += 1;

        let residual = if n == 0 { 0.0 } else { (sum_sq / n as f64).sqrt() };
        debug!(iteration = self.iterations, residual, "Diffusion sweep");
        Ok(residual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverKind;
    use crate::geometry::structured::{rectangle, CellSize2D, GridDimensions2D};
    use approx::assert_relative_eq;

    fn heat_config() -> Config {
        let mut config = Config::default();
        config.solver = SolverKind::Heat;
        config.markers.dirichlet.insert("left".to_string(), 0.0);
        config.markers.dirichlet.insert("right".to_string(), 1.0);
        config
    }

    #[test]
    fn test_converges_within_boundary_bounds() {
        let geometry = rectangle(GridDimensions2D(4, 2), CellSize2D(0.25, 0.5)).unwrap();
        let config = heat_config();
        let numerics = Numerics::new(SolverKind::Heat, &geometry, &config).unwrap();
        let mut solver = DiffusionSolver::new(&geometry, &config).unwrap();

        let mut residual = f64::INFINITY;
        for _ in 0..2000 {
            residual = solver.iterate(&numerics).unwrap();
            if residual < 1e-12 {
                break;
            }
        }
        assert!(residual < 1e-12);
        assert!(solver.field().iter().all(|u| (0.0..=1.0).contains(u)));
    }

    #[test]
    fn test_uniform_boundary_gives_uniform_field() {
        let geometry = rectangle(GridDimensions2D(3, 3), CellSize2D(1.0, 1.0)).unwrap();
        let mut config = Config::default();
        for tag in ["lower", "right", "upper", "left"] {
            config.markers.dirichlet.insert(tag.to_string(), 2.0);
        }
        let numerics = Numerics::new(SolverKind::Heat, &geometry, &config).unwrap();
        let mut solver = DiffusionSolver::new(&geometry, &config).unwrap();
        for _ in 0..200 {
            solver.iterate(&numerics).unwrap();
        }
        for u in solver.field() {
            assert_relative_eq!(*u, 2.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_fixed_points_and_source_length() {
        let geometry = rectangle(GridDimensions2D(2, 2), CellSize2D(1.0, 1.0)).unwrap();
        let config = heat_config();
        let numerics = Numerics::new(SolverKind::Heat, &geometry, &config).unwrap();
        let mut solver = DiffusionSolver::new(&geometry, &config).unwrap();
        solver.iterate(&numerics).unwrap();
        let right = geometry.marker_index("right").unwrap();
        for v in &geometry.markers[right].vertices {
            assert_eq!(solver.field()[v.point], 1.0);
        }
        assert_eq!(solver.iterations(), 1);
        assert!(matches!(solver.set_source(vec![0.0; 2]), Err(SolverError::LengthMismatch { .. })));
    }
}
