use std::collections::BTreeMap;

use nalgebra::Vector3;
use tracing::debug;

use crate::config::Config;
use crate::error::SolverError;
use crate::geometry::Geometry;
use crate::numerics::elasticity::{solve_displacement, ElementModulus, Material};
use crate::numerics::Numerics;

/// Linear-elastic structure clamped on `markers.clamped` and loaded by
/// point forces, typically the fluid loads of an FSI interface.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuralSolver {
    clamped: BTreeMap<usize, Vector3<f64>>,
    loads: Vec<Vector3<f64>>,
    displacement: Vec<Vector3<f64>>,
    iterations: usize,
}

impl StructuralSolver {
    pub fn new(geometry: &Geometry, config: &Config) -> Result<Self, SolverError> {
        let mut clamped = BTreeMap::new();
        for marker in geometry.markers.iter().filter(|m| config.markers.clamped.contains(&m.tag)) {
            for vertex in &marker.vertices {
                clamped.insert(vertex.point, Vector3::zeros());
            }
        }
        if clamped.is_empty() {
            return Err(SolverError::InvalidParameter(
                "structural zone has no clamped marker".to_string(),
            ));
        }
        let n_point = geometry.n_point();
        Ok(Self {
            clamped,
            loads: vec![Vector3::zeros(); n_point],
            displacement: vec![Vector3::zeros(); n_point],
            iterations: 0,
        })
    }

    pub fn displacement(&self) -> &[Vector3<f64>] {
        &self.displacement
    }

    /// Replaces every point load.
    pub fn set_point_loads(&mut self, loads: &BTreeMap<usize, Vector3<f64>>) -> Result<(), SolverError> {
        let n_point = self.loads.len();
        self.loads.iter_mut().for_each(|f| *f = Vector3::zeros());
        for (&point, force) in loads {
            let slot = self.loads.get_mut(point).ok_or(SolverError::LengthMismatch {
                expected: n_point,
                provided: point + 1,
            })?;
            *slot = *force;
        }
        Ok(())
    }

    /// Solves the static equilibrium for the current loads on the reference
    /// configuration. Returns the RMS change of the displacement.
    pub fn iterate(&mut self, geometry: &Geometry, numerics: &Numerics) -> Result<f64, SolverError> {
        let material: Material = numerics.material.ok_or_else(|| {
            SolverError::InvalidParameter("structural numerics carry no material".to_string())
        })?;
        let solution = solve_displacement(
            geometry,
            &geometry.reference_coordinates(),
            ElementModulus::Uniform(material.youngs_modulus),
            material.poisson_ratio,
            &self.loads,
            &self.clamped,
        )?;
        let n = solution.len().max(1) as f64;
        let change = solution
            .iter()
            .zip(&self.displacement)
            .map(|(new, old)| (new - old).norm_squared())
            .sum::<f64>();
        self.displacement = solution;
        self.iterations += 1;
        let residual = (change / n).sqrt();
        debug!(iteration = self.iterations, residual, "Structural solve");
        Ok(residual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverKind;
    use crate::geometry::structured::{rectangle, CellSize2D, GridDimensions2D};

    fn cantilever_config() -> Config {
        let mut config = Config::default();
        config.solver = SolverKind::FemElasticity;
        config.markers.clamped.push("left".to_string());
        config
    }

    #[test]
    fn test_tip_load_bends_cantilever() {
        let geometry = rectangle(GridDimensions2D(8, 2), CellSize2D(0.5, 0.25)).unwrap();
        let config = cantilever_config();
        let numerics = Numerics::new(SolverKind::FemElasticity, &geometry, &config).unwrap();
        let mut solver = StructuralSolver::new(&geometry, &config).unwrap();

        let right = geometry.marker_index("right").unwrap();
        let loads: BTreeMap<usize, Vector3<f64>> = geometry.markers[right]
            .vertices
            .iter()
            .map(|v| (v.point, Vector3::new(0.0, -1.0, 0.0)))
            .collect();
        solver.set_point_loads(&loads).unwrap();
        let first = solver.iterate(&geometry, &numerics).unwrap();
        assert!(first > 0.0);

        for v in &geometry.markers[right].vertices {
            assert!(solver.displacement()[v.point].y < 0.0);
        }
        let left = geometry.marker_index("left").unwrap();
        for v in &geometry.markers[left].vertices {
            assert_eq!(solver.displacement()[v.point], Vector3::zeros());
        }

        let second = solver.iterate(&geometry, &numerics).unwrap();
        assert!(second < 1e-12);
    }

    #[test]
    fn test_requires_clamped_marker() {
        let geometry = rectangle(GridDimensions2D(2, 2), CellSize2D(1.0, 1.0)).unwrap();
        let config = Config::default();
        assert!(StructuralSolver::new(&geometry, &config).is_err());
    }
}
